//! VIP policy repository

use sqlx::types::Json;
use sqlx::SqliteConnection;
use tempo_core::error::{CoreError, CoreResult};
use tempo_core::models::VipPolicy;
use tempo_core::types::VipId;

pub async fn insert(conn: &mut SqliteConnection, policy: &VipPolicy) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO vip_policies (
            id, participant_hash, display_name, priority_weight, conditions, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(policy.id)
    .bind(&policy.participant_hash)
    .bind(&policy.display_name)
    .bind(policy.priority_weight)
    .bind(Json(&policy.conditions))
    .bind(policy.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list(conn: &mut SqliteConnection) -> CoreResult<Vec<VipPolicy>> {
    let policies = sqlx::query_as::<_, VipPolicy>(
        "SELECT * FROM vip_policies ORDER BY priority_weight DESC, created_at ASC",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(policies)
}

pub async fn delete(conn: &mut SqliteConnection, vip_id: VipId) -> CoreResult<()> {
    let result = sqlx::query("DELETE FROM vip_policies WHERE id = ?")
        .bind(vip_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("VIP policy not found: {vip_id}")));
    }
    Ok(())
}
