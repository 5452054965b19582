//! Commitment repository

use sqlx::SqliteConnection;
use tempo_core::error::{CoreError, CoreResult};
use tempo_core::models::Commitment;
use tempo_core::types::CommitmentId;

pub async fn insert(conn: &mut SqliteConnection, commitment: &Commitment) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO commitments (
            id, client_id, client_name, target_hours, window_type,
            rolling_window_weeks, hard_minimum, proof_required, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(commitment.id)
    .bind(&commitment.client_id)
    .bind(&commitment.client_name)
    .bind(commitment.target_hours)
    .bind(commitment.window_type)
    .bind(commitment.rolling_window_weeks)
    .bind(commitment.hard_minimum)
    .bind(commitment.proof_required)
    .bind(commitment.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get(
    conn: &mut SqliteConnection,
    commitment_id: CommitmentId,
) -> CoreResult<Option<Commitment>> {
    let commitment =
        sqlx::query_as::<_, Commitment>("SELECT * FROM commitments WHERE id = ?")
            .bind(commitment_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(commitment)
}

pub async fn list(conn: &mut SqliteConnection) -> CoreResult<Vec<Commitment>> {
    let commitments =
        sqlx::query_as::<_, Commitment>("SELECT * FROM commitments ORDER BY created_at ASC")
            .fetch_all(&mut *conn)
            .await?;
    Ok(commitments)
}

pub async fn delete(conn: &mut SqliteConnection, commitment_id: CommitmentId) -> CoreResult<()> {
    let result = sqlx::query("DELETE FROM commitments WHERE id = ?")
        .bind(commitment_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!(
            "commitment not found: {commitment_id}"
        )));
    }
    Ok(())
}
