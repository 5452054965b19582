//! Onboarding session repository
//!
//! A partition holds at most one unfinished session; completed sessions are
//! retained for resume-token lookups until the retention horizon.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use tempo_core::error::CoreResult;
use tempo_core::models::{
    OnboardingSession, OnboardingStep, Provider, SessionAccount, SessionAccountStatus,
};
use tempo_core::types::{SessionId, UserId};

/// Session row without its account list
#[derive(Debug, Clone, FromRow)]
struct SessionRow {
    id: SessionId,
    user_id: UserId,
    session_token: String,
    step: OnboardingStep,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

async fn hydrate(
    conn: &mut SqliteConnection,
    row: SessionRow,
) -> CoreResult<OnboardingSession> {
    let accounts = sqlx::query_as::<_, SessionAccount>(
        "SELECT account_id, provider, email, status, calendar_count, error_class, position \
         FROM onboarding_session_accounts WHERE session_id = ? ORDER BY position ASC",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(OnboardingSession {
        id: row.id,
        user_id: row.user_id,
        session_token: row.session_token,
        step: row.step,
        accounts,
        created_at: row.created_at,
        updated_at: row.updated_at,
        completed_at: row.completed_at,
    })
}

pub async fn insert(
    conn: &mut SqliteConnection,
    session_id: SessionId,
    user_id: UserId,
    session_token: &str,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO onboarding_sessions (id, user_id, session_token, step, created_at, updated_at)
        VALUES (?, ?, ?, 'welcome', ?, ?)
        "#,
    )
    .bind(session_id)
    .bind(user_id)
    .bind(session_token)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// The unfinished session, if any
pub async fn unfinished(conn: &mut SqliteConnection) -> CoreResult<Option<OnboardingSession>> {
    let row = sqlx::query_as::<_, SessionRow>(
        "SELECT * FROM onboarding_sessions WHERE step != 'complete' \
         ORDER BY created_at DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(hydrate(conn, row).await?)),
        None => Ok(None),
    }
}

/// The most recent session regardless of step
pub async fn latest(conn: &mut SqliteConnection) -> CoreResult<Option<OnboardingSession>> {
    let row = sqlx::query_as::<_, SessionRow>(
        "SELECT * FROM onboarding_sessions ORDER BY created_at DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(hydrate(conn, row).await?)),
        None => Ok(None),
    }
}

pub async fn get(
    conn: &mut SqliteConnection,
    session_id: SessionId,
) -> CoreResult<Option<OnboardingSession>> {
    let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM onboarding_sessions WHERE id = ?")
        .bind(session_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(hydrate(conn, row).await?)),
        None => Ok(None),
    }
}

pub async fn get_by_token(
    conn: &mut SqliteConnection,
    session_token: &str,
) -> CoreResult<Option<OnboardingSession>> {
    let row = sqlx::query_as::<_, SessionRow>(
        "SELECT * FROM onboarding_sessions WHERE session_token = ?",
    )
    .bind(session_token)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(hydrate(conn, row).await?)),
        None => Ok(None),
    }
}

/// Delete an unfinished session (used by `replace=true`)
pub async fn delete(conn: &mut SqliteConnection, session_id: SessionId) -> CoreResult<()> {
    sqlx::query("DELETE FROM onboarding_sessions WHERE id = ?")
        .bind(session_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Idempotent account upsert: a re-submitted `account_id` updates in place
/// and keeps its original position.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_account(
    conn: &mut SqliteConnection,
    session_id: SessionId,
    account_id: &str,
    provider: Provider,
    email: Option<&str>,
    status: SessionAccountStatus,
    calendar_count: i64,
    error_class: Option<&str>,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO onboarding_session_accounts (
            session_id, account_id, provider, email, status, calendar_count,
            error_class, position
        )
        VALUES (
            ?, ?, ?, ?, ?, ?, ?,
            (SELECT COALESCE(MAX(position), -1) + 1
             FROM onboarding_session_accounts WHERE session_id = ?)
        )
        ON CONFLICT (session_id, account_id) DO UPDATE SET
            provider = excluded.provider,
            email = excluded.email,
            status = excluded.status,
            calendar_count = excluded.calendar_count,
            error_class = excluded.error_class
        "#,
    )
    .bind(session_id)
    .bind(account_id)
    .bind(provider)
    .bind(email)
    .bind(status)
    .bind(calendar_count)
    .bind(error_class)
    .bind(session_id)
    .execute(&mut *conn)
    .await?;

    touch(conn, session_id, now).await
}

/// Update one account's status; silently a no-op when the account is not in
/// the session.
pub async fn update_account_status(
    conn: &mut SqliteConnection,
    session_id: SessionId,
    account_id: &str,
    status: SessionAccountStatus,
    calendar_count: Option<i64>,
    error_class: Option<&str>,
    now: DateTime<Utc>,
) -> CoreResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE onboarding_session_accounts SET
            status = ?,
            calendar_count = COALESCE(?, calendar_count),
            error_class = ?
        WHERE session_id = ? AND account_id = ?
        "#,
    )
    .bind(status)
    .bind(calendar_count)
    .bind(error_class)
    .bind(session_id)
    .bind(account_id)
    .execute(&mut *conn)
    .await?;

    let updated = result.rows_affected() > 0;
    if updated {
        touch(conn, session_id, now).await?;
    }
    Ok(updated)
}

pub async fn set_step(
    conn: &mut SqliteConnection,
    session_id: SessionId,
    step: OnboardingStep,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    sqlx::query("UPDATE onboarding_sessions SET step = ?, updated_at = ? WHERE id = ?")
        .bind(step)
        .bind(now)
        .bind(session_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn complete(
    conn: &mut SqliteConnection,
    session_id: SessionId,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    sqlx::query(
        "UPDATE onboarding_sessions SET step = 'complete', completed_at = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(now)
    .bind(now)
    .bind(session_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn touch(
    conn: &mut SqliteConnection,
    session_id: SessionId,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    sqlx::query("UPDATE onboarding_sessions SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(session_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
