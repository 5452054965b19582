//! Partition schema migrations
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`
//! and tracked per partition in the `schema_version` table. Scripts are
//! idempotent (`CREATE TABLE IF NOT EXISTS` only), so re-applying one is a
//! no-op; the version table just prevents the wasted work.
//!
//! Migrations run lazily when a partition is opened; every subsequent
//! operation cheaply re-checks the cached version.

use sqlx::{Connection, SqliteConnection};
use tempo_core::error::{CoreError, CoreResult};

struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("migrations/001_baseline.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("migrations/002_governance.sql"),
    },
    Migration {
        version: 3,
        sql: include_str!("migrations/003_onboarding.sql"),
    },
];

/// Highest migration version this binary knows about
pub const CURRENT_VERSION: i64 = 3;

async fn ensure_schema_version_table(conn: &mut SqliteConnection) -> CoreResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Highest applied migration version, 0 for a fresh partition
pub async fn current_version(conn: &mut SqliteConnection) -> CoreResult<i64> {
    let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(&mut *conn)
        .await?;
    Ok(version)
}

/// Run all pending migrations, returning the number applied.
///
/// Forward-compat guard: a partition written by a newer binary is rejected
/// rather than partially understood.
pub async fn run_migrations(conn: &mut SqliteConnection) -> CoreResult<usize> {
    ensure_schema_version_table(conn).await?;

    let current = current_version(conn).await?;
    if current > CURRENT_VERSION {
        return Err(CoreError::Internal(format!(
            "partition schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = conn.begin().await?;
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
            .bind(migration.version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(version = migration.version, "applied partition migration");
        applied += 1;
    }

    Ok(applied)
}
