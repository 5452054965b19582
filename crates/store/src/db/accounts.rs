//! Account repository

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tempo_core::error::{CoreError, CoreResult};
use tempo_core::models::{Account, AccountStatus, Provider};
use tempo_core::types::AccountId;

/// Insert a new account; `(provider, provider_subject)` must be unique
/// within the partition.
pub async fn insert(conn: &mut SqliteConnection, account: &Account) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO accounts (
            id, user_id, provider, provider_subject, email, status,
            write_capable, feed_url, feed_etag, feed_last_modified,
            feed_content_hash, feed_last_refresh_at, feed_last_success_at,
            feed_consecutive_failures, feed_refresh_interval_ms,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(account.id)
    .bind(account.user_id)
    .bind(account.provider)
    .bind(&account.provider_subject)
    .bind(&account.email)
    .bind(account.status)
    .bind(account.write_capable)
    .bind(&account.feed_url)
    .bind(&account.feed_etag)
    .bind(&account.feed_last_modified)
    .bind(&account.feed_content_hash)
    .bind(account.feed_last_refresh_at)
    .bind(account.feed_last_success_at)
    .bind(account.feed_consecutive_failures)
    .bind(account.feed_refresh_interval_ms)
    .bind(account.created_at)
    .bind(account.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> CoreResult<Option<Account>> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(account)
}

/// Get an account or fail with `UnknownAccount`
pub async fn require(conn: &mut SqliteConnection, account_id: AccountId) -> CoreResult<Account> {
    get(conn, account_id)
        .await?
        .ok_or(CoreError::UnknownAccount(account_id))
}

pub async fn get_by_subject(
    conn: &mut SqliteConnection,
    provider: Provider,
    provider_subject: &str,
) -> CoreResult<Option<Account>> {
    let account = sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE provider = ? AND provider_subject = ?",
    )
    .bind(provider)
    .bind(provider_subject)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(account)
}

/// List accounts, optionally filtered by provider
pub async fn list(
    conn: &mut SqliteConnection,
    provider: Option<Provider>,
) -> CoreResult<Vec<Account>> {
    let accounts = match provider {
        Some(provider) => {
            sqlx::query_as::<_, Account>(
                "SELECT * FROM accounts WHERE provider = ? ORDER BY created_at ASC",
            )
            .bind(provider)
            .fetch_all(&mut *conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, Account>("SELECT * FROM accounts ORDER BY created_at ASC")
                .fetch_all(&mut *conn)
                .await?
        }
    };
    Ok(accounts)
}

pub async fn update_status(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    status: AccountStatus,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    let result = sqlx::query("UPDATE accounts SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(now)
        .bind(account_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::UnknownAccount(account_id));
    }
    Ok(())
}

/// Conditional-fetch state persisted after a successful feed refresh
pub struct FeedRefreshUpdate {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_hash: Option<String>,
    pub refreshed_at: DateTime<Utc>,
    pub succeeded: bool,
}

/// Record a refresh attempt. Success resets `feed_consecutive_failures` to
/// zero and advances `feed_last_success_at`; failure increments the counter
/// and leaves the conditional-fetch state untouched.
pub async fn record_feed_refresh(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    update: &FeedRefreshUpdate,
) -> CoreResult<()> {
    if update.succeeded {
        sqlx::query(
            r#"
            UPDATE accounts SET
                feed_etag = COALESCE(?, feed_etag),
                feed_last_modified = COALESCE(?, feed_last_modified),
                feed_content_hash = COALESCE(?, feed_content_hash),
                feed_last_refresh_at = ?,
                feed_last_success_at = ?,
                feed_consecutive_failures = 0,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.etag)
        .bind(&update.last_modified)
        .bind(&update.content_hash)
        .bind(update.refreshed_at)
        .bind(update.refreshed_at)
        .bind(update.refreshed_at)
        .bind(account_id)
        .execute(&mut *conn)
        .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE accounts SET
                feed_last_refresh_at = ?,
                feed_consecutive_failures = feed_consecutive_failures + 1,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.refreshed_at)
        .bind(update.refreshed_at)
        .bind(account_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Hard-delete an account; its events cascade
pub async fn delete(conn: &mut SqliteConnection, account_id: AccountId) -> CoreResult<bool> {
    let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
        .bind(account_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Count locked allocations attached to an account's events; a non-zero
/// count blocks account deletion with `InUse`.
pub async fn locked_allocation_count(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> CoreResult<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM allocations a
        JOIN events e ON e.id = a.event_id
        WHERE e.origin_account_id = ? AND a.locked = 1
        "#,
    )
    .bind(account_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}
