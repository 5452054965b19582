//! Time allocation repository

use sqlx::SqliteConnection;
use tempo_core::error::CoreResult;
use tempo_core::models::TimeAllocation;
use tempo_core::types::EventId;

/// Insert or update the allocation for an event (one allocation per event)
pub async fn upsert(conn: &mut SqliteConnection, allocation: &TimeAllocation) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO allocations (
            id, event_id, billing_category, client_id, rate, confidence,
            locked, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (event_id) DO UPDATE SET
            billing_category = excluded.billing_category,
            client_id = excluded.client_id,
            rate = excluded.rate,
            confidence = excluded.confidence,
            locked = excluded.locked,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(allocation.id)
    .bind(allocation.event_id)
    .bind(allocation.billing_category)
    .bind(&allocation.client_id)
    .bind(allocation.rate)
    .bind(allocation.confidence)
    .bind(allocation.locked)
    .bind(allocation.created_at)
    .bind(allocation.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_for_event(
    conn: &mut SqliteConnection,
    event_id: EventId,
) -> CoreResult<Option<TimeAllocation>> {
    let allocation =
        sqlx::query_as::<_, TimeAllocation>("SELECT * FROM allocations WHERE event_id = ?")
            .bind(event_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(allocation)
}

/// Billable allocations for one client, joined against their events
pub async fn billable_for_client(
    conn: &mut SqliteConnection,
    client_id: &str,
) -> CoreResult<Vec<TimeAllocation>> {
    let allocations = sqlx::query_as::<_, TimeAllocation>(
        "SELECT * FROM allocations WHERE client_id = ? AND billing_category = 'BILLABLE'",
    )
    .bind(client_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(allocations)
}

/// All allocations, for drift analysis over category shares
pub async fn list(conn: &mut SqliteConnection) -> CoreResult<Vec<TimeAllocation>> {
    let allocations = sqlx::query_as::<_, TimeAllocation>("SELECT * FROM allocations")
        .fetch_all(&mut *conn)
        .await?;
    Ok(allocations)
}
