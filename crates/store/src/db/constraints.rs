//! Scheduling constraint repository

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tempo_core::error::{CoreError, CoreResult};
use tempo_core::models::{Constraint, ConstraintKind};
use tempo_core::types::ConstraintId;

pub async fn insert(conn: &mut SqliteConnection, constraint: &Constraint) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO constraints (id, kind, config, active_from, active_to, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(constraint.id)
    .bind(constraint.kind)
    .bind(&constraint.config)
    .bind(constraint.active_from)
    .bind(constraint.active_to)
    .bind(constraint.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list(conn: &mut SqliteConnection) -> CoreResult<Vec<Constraint>> {
    let constraints =
        sqlx::query_as::<_, Constraint>("SELECT * FROM constraints ORDER BY created_at ASC")
            .fetch_all(&mut *conn)
            .await?;
    Ok(constraints)
}

/// Constraints of one kind active at `at` (half-open activity window)
pub async fn active_of_kind(
    conn: &mut SqliteConnection,
    kind: ConstraintKind,
    at: DateTime<Utc>,
) -> CoreResult<Vec<Constraint>> {
    let constraints = sqlx::query_as::<_, Constraint>(
        r#"
        SELECT * FROM constraints
        WHERE kind = ?
          AND (active_from IS NULL OR active_from <= ?)
          AND (active_to IS NULL OR active_to > ?)
        ORDER BY created_at ASC
        "#,
    )
    .bind(kind)
    .bind(at)
    .bind(at)
    .fetch_all(&mut *conn)
    .await?;
    Ok(constraints)
}

pub async fn delete(conn: &mut SqliteConnection, constraint_id: ConstraintId) -> CoreResult<()> {
    let result = sqlx::query("DELETE FROM constraints WHERE id = ?")
        .bind(constraint_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!(
            "constraint not found: {constraint_id}"
        )));
    }
    Ok(())
}
