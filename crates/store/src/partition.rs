//! Per-user storage partitions
//!
//! Each user's canonical graph lives in its own SQLite database with one
//! logical writer: a [`Partition`] owns a single connection behind an async
//! mutex, so operations within a partition serialize in arrival order while
//! different partitions proceed in parallel. Every operation runs in one
//! transaction; external fan-out (mirror intents) happens after the commit.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use tempo_core::error::{CoreError, CoreResult};
use tempo_core::governance::CommitmentWindow;
use tempo_core::models::{
    Account, AccountStatus, CanonicalEvent, Commitment, Constraint, ConstraintKind, DeltaSummary,
    EventDelta, EventSource, OnboardingSession, OnboardingStep, Provider, SessionAccountStatus,
    TimeAllocation, VipConditions, VipPolicy, WindowType, WorkingHoursConfig,
};
use tempo_core::security::hash_participant_email;
use tempo_core::types::{
    AccountId, AllocationId, CommitmentId, ConstraintId, EventId, SessionId, UserId, VipId,
};
use tempo_core::upgrade::UpgradePlan;

use crate::db::{accounts, allocations, commitments, constraints, events, sessions, vip};
use crate::delta;
use crate::health::{account_health, AccountHealth};
use crate::migrations;
use crate::mirror::MirrorSender;

/// Completed onboarding sessions stay resumable for this long
const SESSION_RETENTION_DAYS: i64 = 30;

/// One page of canonical events
#[derive(Debug, Clone)]
pub struct EventPage {
    pub items: Vec<CanonicalEvent>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Parameters for creating an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub provider: Provider,
    pub provider_subject: String,
    pub email: Option<String>,
    pub status: AccountStatus,
    pub write_capable: bool,
    pub feed_url: Option<String>,
    pub feed_refresh_interval_ms: Option<i64>,
}

/// Result of a downgrade
#[derive(Debug, Clone)]
pub struct DowngradeOutcome {
    pub new_account: Option<Account>,
    pub preserved_event_count: u64,
    pub warning: Option<String>,
}

/// Registry of open partitions, addressed by `user_id`
#[derive(Clone)]
pub struct Ces {
    inner: Arc<CesInner>,
}

struct CesInner {
    data_dir: PathBuf,
    mirrors: MirrorSender,
    partitions: Mutex<HashMap<UserId, Arc<Partition>>>,
}

impl Ces {
    pub fn new(data_dir: impl Into<PathBuf>, mirrors: MirrorSender) -> Self {
        Self {
            inner: Arc::new(CesInner {
                data_dir: data_dir.into(),
                mirrors,
                partitions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    /// Open (or return the already-open) partition for a user.
    ///
    /// Opening is lazy: the database file is created on first touch and
    /// migrations run before any operation sees the connection.
    pub async fn partition(&self, user_id: UserId) -> CoreResult<Arc<Partition>> {
        let mut partitions = self.inner.partitions.lock().await;
        if let Some(partition) = partitions.get(&user_id) {
            return Ok(partition.clone());
        }

        let users_dir = self.inner.data_dir.join("users");
        tokio::fs::create_dir_all(&users_dir)
            .await
            .map_err(CoreError::internal)?;

        let path = users_dir.join(format!("{user_id}.db"));
        let partition =
            Arc::new(Partition::open(user_id, &path, self.inner.mirrors.clone()).await?);
        partitions.insert(user_id, partition.clone());

        tracing::debug!(%user_id, "opened user partition");
        Ok(partition)
    }

    /// Users with an existing partition on disk
    pub async fn list_users(&self) -> CoreResult<Vec<UserId>> {
        let users_dir = self.inner.data_dir.join("users");
        let mut users = Vec::new();

        let mut entries = match tokio::fs::read_dir(&users_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(users),
            Err(e) => return Err(CoreError::internal(e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(CoreError::internal)? {
            let name = entry.file_name();
            let Some(stem) = Path::new(&name).file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if Path::new(&name).extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            if let Ok(user_id) = stem.parse::<UserId>() {
                users.push(user_id);
            }
        }

        users.sort();
        Ok(users)
    }
}

/// A single user's partition: the single writer for that user's state
pub struct Partition {
    user_id: UserId,
    conn: Mutex<SqliteConnection>,
    mirrors: MirrorSender,
    schema_version: AtomicI64,
}

impl Partition {
    async fn open(user_id: UserId, path: &Path, mirrors: MirrorSender) -> CoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(CoreError::from)?;

        let partition = Self {
            user_id,
            conn: Mutex::new(conn),
            mirrors,
            schema_version: AtomicI64::new(0),
        };
        partition.migrate().await?;
        Ok(partition)
    }

    /// In-memory partition for tests
    pub async fn open_in_memory(user_id: UserId, mirrors: MirrorSender) -> CoreResult<Self> {
        let conn = SqliteConnection::connect("sqlite::memory:")
            .await
            .map_err(CoreError::from)?;
        let partition = Self {
            user_id,
            conn: Mutex::new(conn),
            mirrors,
            schema_version: AtomicI64::new(0),
        };
        partition.migrate().await?;
        Ok(partition)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    async fn migrate(&self) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        migrations::run_migrations(&mut conn).await?;
        self.schema_version
            .store(migrations::CURRENT_VERSION, Ordering::Release);
        Ok(())
    }

    /// Every operation checks the schema before touching data. The check is
    /// an atomic load once the open-time migration has run; a stale version
    /// re-runs the migration chain.
    async fn ensure_schema(&self, conn: &mut SqliteConnection) -> CoreResult<()> {
        if self.schema_version.load(Ordering::Acquire) == migrations::CURRENT_VERSION {
            return Ok(());
        }
        migrations::run_migrations(conn).await?;
        self.schema_version
            .store(migrations::CURRENT_VERSION, Ordering::Release);
        Ok(())
    }

    // ----- deltas ---------------------------------------------------------

    /// Apply a provider/feed delta to one account.
    ///
    /// The merge itself commits atomically; mirror fan-out happens after the
    /// commit and is best-effort.
    pub async fn apply_provider_delta(
        &self,
        account_id: AccountId,
        delta: EventDelta,
    ) -> CoreResult<DeltaSummary> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        let account = accounts::require(&mut conn, account_id).await?;

        let mut tx = conn.begin().await?;
        let applied = delta::apply(&mut tx, self.user_id, &account, delta, now).await?;
        tx.commit().await?;

        let delta::AppliedDelta {
            mut summary,
            intents,
        } = applied;
        delta::dispatch_intents(&self.mirrors, intents, &mut summary);

        tracing::debug!(
            %account_id,
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            "applied provider delta"
        );
        Ok(summary)
    }

    // ----- events ---------------------------------------------------------

    /// List canonical events in `[start, end]`, paginated
    pub async fn list_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cursor: Option<&str>,
        limit: i64,
    ) -> CoreResult<EventPage> {
        let limit = limit.clamp(1, 500);
        let after = cursor.map(decode_cursor).transpose()?;

        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        let mut items = events::list_range(&mut conn, start, end, after, limit + 1).await?;
        let has_more = items.len() as i64 > limit;
        if has_more {
            items.truncate(limit as usize);
        }

        let next_cursor = if has_more {
            items.last().and_then(|event| {
                event
                    .sort_instant()
                    .map(|ts| encode_cursor(&ts.to_rfc3339(), event.id))
            })
        } else {
            None
        };

        Ok(EventPage {
            items,
            next_cursor,
            has_more,
        })
    }

    /// Unpaginated snapshot for the analytics kernel
    pub async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<CanonicalEvent>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        events::list_range(&mut conn, start, end, None, i64::MAX).await
    }

    pub async fn get_event(&self, event_id: EventId) -> CoreResult<Option<CanonicalEvent>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        events::get(&mut conn, event_id).await
    }

    /// All events of one account (upgrade planner input)
    pub async fn account_events(&self, account_id: AccountId) -> CoreResult<Vec<CanonicalEvent>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        accounts::require(&mut conn, account_id).await?;
        events::account_events(&mut conn, account_id).await
    }

    // ----- accounts -------------------------------------------------------

    pub async fn create_account(&self, new: NewAccount) -> CoreResult<Account> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        if accounts::get_by_subject(&mut conn, new.provider, &new.provider_subject)
            .await?
            .is_some()
        {
            return Err(CoreError::Conflict(format!(
                "account already exists for {:?} subject",
                new.provider
            )));
        }

        let account = Account {
            id: AccountId::new(),
            user_id: self.user_id,
            provider: new.provider,
            provider_subject: new.provider_subject,
            email: new.email,
            status: new.status,
            write_capable: new.write_capable,
            feed_url: new.feed_url,
            feed_etag: None,
            feed_last_modified: None,
            feed_content_hash: None,
            feed_last_refresh_at: None,
            feed_last_success_at: None,
            feed_consecutive_failures: 0,
            feed_refresh_interval_ms: new.feed_refresh_interval_ms.unwrap_or(900_000),
            created_at: now,
            updated_at: now,
        };
        accounts::insert(&mut conn, &account).await?;
        Ok(account)
    }

    pub async fn get_account(&self, account_id: AccountId) -> CoreResult<Option<Account>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        accounts::get(&mut conn, account_id).await
    }

    pub async fn list_accounts(&self, provider: Option<Provider>) -> CoreResult<Vec<Account>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        accounts::list(&mut conn, provider).await
    }

    pub async fn find_account_by_subject(
        &self,
        provider: Provider,
        provider_subject: &str,
    ) -> CoreResult<Option<Account>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        accounts::get_by_subject(&mut conn, provider, provider_subject).await
    }

    /// Transition an account's status; invalid transitions are conflicts.
    pub async fn update_account_status(
        &self,
        account_id: AccountId,
        status: AccountStatus,
    ) -> CoreResult<Account> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        let account = accounts::require(&mut conn, account_id).await?;
        if !account.status.can_transition_to(status) {
            return Err(CoreError::Conflict(format!(
                "account status cannot change from {:?} to {:?}",
                account.status, status
            )));
        }

        accounts::update_status(&mut conn, account_id, status, now).await?;
        accounts::require(&mut conn, account_id).await
    }

    pub async fn record_feed_refresh(
        &self,
        account_id: AccountId,
        update: &accounts::FeedRefreshUpdate,
    ) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        accounts::require(&mut conn, account_id).await?;
        accounts::record_feed_refresh(&mut conn, account_id, update).await
    }

    /// Hard-delete an account and its events. Locked allocations on those
    /// events make the account `InUse`.
    pub async fn delete_account(&self, account_id: AccountId) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        accounts::require(&mut conn, account_id).await?;
        if accounts::locked_allocation_count(&mut conn, account_id).await? > 0 {
            return Err(CoreError::InUse("account".to_string()));
        }

        let mut tx = conn.begin().await?;
        accounts::delete(&mut tx, account_id).await?;
        tx.commit().await?;
        Ok(())
    }

    // ----- constraints ----------------------------------------------------

    pub async fn add_constraint(
        &self,
        kind: ConstraintKind,
        config: serde_json::Value,
        active_from: Option<DateTime<Utc>>,
        active_to: Option<DateTime<Utc>>,
    ) -> CoreResult<Constraint> {
        if kind == ConstraintKind::WorkingHours {
            // Reject unparseable working-hours payloads up front
            serde_json::from_value::<WorkingHoursConfig>(config.clone())
                .map_err(|e| CoreError::InvalidArgument(format!("working_hours config: {e}")))?;
        }

        let constraint = Constraint {
            id: ConstraintId::new(),
            kind,
            config,
            active_from,
            active_to,
            created_at: Utc::now(),
        };

        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        constraints::insert(&mut conn, &constraint).await?;
        Ok(constraint)
    }

    pub async fn list_constraints(&self) -> CoreResult<Vec<Constraint>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        constraints::list(&mut conn).await
    }

    pub async fn delete_constraint(&self, constraint_id: ConstraintId) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        constraints::delete(&mut conn, constraint_id).await
    }

    /// Active working-hours configuration at `at`, defaulting to Mon-Fri
    /// 09:00-17:00 UTC when no constraint is set.
    pub async fn working_hours(&self, at: DateTime<Utc>) -> CoreResult<WorkingHoursConfig> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        let active = constraints::active_of_kind(&mut conn, ConstraintKind::WorkingHours, at).await?;
        let config = active
            .last()
            .and_then(|c| serde_json::from_value(c.config.clone()).ok())
            .unwrap_or_default();
        Ok(config)
    }

    /// Whole trip days overlapping `[start, end)`
    pub async fn trip_days(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<u32> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        let trips = constraints::list(&mut conn).await?;
        let mut days = 0i64;
        for trip in trips.iter().filter(|c| c.kind == ConstraintKind::Trip) {
            let trip_start = trip.active_from.unwrap_or(start).max(start);
            let trip_end = trip.active_to.unwrap_or(end).min(end);
            if trip_end > trip_start {
                days += (trip_end - trip_start).num_days();
            }
        }
        Ok(days.max(0) as u32)
    }

    // ----- VIP policies ---------------------------------------------------

    pub async fn create_vip_policy(
        &self,
        email: &str,
        display_name: String,
        priority_weight: f64,
        conditions: VipConditions,
    ) -> CoreResult<VipPolicy> {
        if !(0.0..=10.0).contains(&priority_weight) {
            return Err(CoreError::InvalidArgument(
                "priority_weight must be within [0.0, 10.0]".to_string(),
            ));
        }
        if email.trim().is_empty() || !email.contains('@') {
            return Err(CoreError::InvalidArgument(
                "a participant email is required".to_string(),
            ));
        }

        let policy = VipPolicy {
            id: VipId::new(),
            participant_hash: hash_participant_email(email),
            display_name,
            priority_weight,
            conditions,
            created_at: Utc::now(),
        };

        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        vip::insert(&mut conn, &policy).await?;
        Ok(policy)
    }

    pub async fn list_vip_policies(&self) -> CoreResult<Vec<VipPolicy>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        vip::list(&mut conn).await
    }

    pub async fn delete_vip_policy(&self, vip_id: VipId) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        vip::delete(&mut conn, vip_id).await
    }

    // ----- allocations ----------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_allocation(
        &self,
        event_id: EventId,
        billing_category: tempo_core::models::BillingCategory,
        client_id: Option<String>,
        rate: Option<f64>,
        confidence: f64,
        locked: bool,
    ) -> CoreResult<TimeAllocation> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        if events::get(&mut conn, event_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("event not found: {event_id}")));
        }

        if let Some(existing) = allocations::get_for_event(&mut conn, event_id).await? {
            if existing.locked && !locked {
                return Err(CoreError::Conflict(
                    "allocation is locked and cannot be reclassified".to_string(),
                ));
            }
        }

        let allocation = TimeAllocation {
            id: AllocationId::new(),
            event_id,
            billing_category,
            client_id,
            rate,
            confidence: confidence.clamp(0.0, 1.0),
            locked,
            created_at: now,
            updated_at: now,
        };
        allocations::upsert(&mut conn, &allocation).await?;

        // Upsert may have kept the original row id; return the stored row
        allocations::get_for_event(&mut conn, event_id)
            .await?
            .ok_or_else(|| CoreError::Internal("allocation upsert lost".to_string()))
    }

    pub async fn get_allocation(&self, event_id: EventId) -> CoreResult<Option<TimeAllocation>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        allocations::get_for_event(&mut conn, event_id).await
    }

    pub async fn list_allocations(&self) -> CoreResult<Vec<TimeAllocation>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        allocations::list(&mut conn).await
    }

    // ----- commitments ----------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create_commitment(
        &self,
        client_id: String,
        client_name: String,
        target_hours: f64,
        window_type: WindowType,
        rolling_window_weeks: i64,
        hard_minimum: bool,
        proof_required: bool,
    ) -> CoreResult<Commitment> {
        if target_hours < 0.0 {
            return Err(CoreError::InvalidArgument(
                "target_hours must not be negative".to_string(),
            ));
        }
        if rolling_window_weeks < 1 {
            return Err(CoreError::InvalidArgument(
                "rolling_window_weeks must be at least 1".to_string(),
            ));
        }

        let commitment = Commitment {
            id: CommitmentId::new(),
            client_id,
            client_name,
            target_hours,
            window_type,
            rolling_window_weeks,
            hard_minimum,
            proof_required,
            created_at: Utc::now(),
        };

        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        commitments::insert(&mut conn, &commitment).await?;
        Ok(commitment)
    }

    pub async fn get_commitment(
        &self,
        commitment_id: CommitmentId,
    ) -> CoreResult<Option<Commitment>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        commitments::get(&mut conn, commitment_id).await
    }

    pub async fn list_commitments(&self) -> CoreResult<Vec<Commitment>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        commitments::list(&mut conn).await
    }

    pub async fn delete_commitment(&self, commitment_id: CommitmentId) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        commitments::delete(&mut conn, commitment_id).await
    }

    /// Billable allocation/event pairs for one client inside a window; the
    /// governance engine computes status and proofs from these.
    pub async fn commitment_entries(
        &self,
        client_id: &str,
        window: CommitmentWindow,
    ) -> CoreResult<Vec<(CanonicalEvent, TimeAllocation)>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        let allocs = allocations::billable_for_client(&mut conn, client_id).await?;
        let mut entries = Vec::with_capacity(allocs.len());
        for allocation in allocs {
            if let Some(event) = events::get(&mut conn, allocation.event_id).await? {
                let overlaps = match (event.sort_instant(), event.end_instant()) {
                    (Some(start), Some(end)) => start < window.end && end > window.start,
                    _ => false,
                };
                if overlaps {
                    entries.push((event, allocation));
                }
            }
        }
        Ok(entries)
    }

    // ----- onboarding -----------------------------------------------------

    /// Create the onboarding session. With an unfinished session present the
    /// call fails `SessionExists` unless `replace` is set, which discards
    /// the old session.
    pub async fn create_onboarding_session(
        &self,
        session_id: SessionId,
        session_token: &str,
        replace: bool,
    ) -> CoreResult<OnboardingSession> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        if let Some(existing) = sessions::unfinished(&mut conn).await? {
            if !replace {
                return Err(CoreError::SessionExists);
            }
            sessions::delete(&mut conn, existing.id).await?;
        }

        let mut tx = conn.begin().await?;
        sessions::insert(&mut tx, session_id, self.user_id, session_token, now).await?;
        tx.commit().await?;

        sessions::get(&mut conn, session_id)
            .await?
            .ok_or_else(|| CoreError::Internal("session vanished after insert".to_string()))
    }

    /// Most recent session, complete or not
    pub async fn onboarding_session(&self) -> CoreResult<Option<OnboardingSession>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;
        sessions::latest(&mut conn).await
    }

    /// Resume a session by its opaque token, within the retention TTL
    pub async fn onboarding_session_by_token(
        &self,
        session_token: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<OnboardingSession>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        let session = sessions::get_by_token(&mut conn, session_token).await?;
        Ok(session.filter(|s| now - s.created_at < Duration::days(SESSION_RETENTION_DAYS)))
    }

    /// Idempotent account attach; moves the session into `connecting`.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_onboarding_account(
        &self,
        account_id: &str,
        provider: Provider,
        email: Option<String>,
        status: SessionAccountStatus,
        calendar_count: i64,
        error_class: Option<String>,
    ) -> CoreResult<OnboardingSession> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        let session = sessions::unfinished(&mut conn)
            .await?
            .ok_or_else(|| CoreError::NotFound("no active onboarding session".to_string()))?;
        if session.step == OnboardingStep::Complete {
            return Err(CoreError::SessionComplete);
        }

        let mut tx = conn.begin().await?;
        sessions::upsert_account(
            &mut tx,
            session.id,
            account_id,
            provider,
            email.as_deref(),
            status,
            calendar_count,
            error_class.as_deref(),
            now,
        )
        .await?;
        sessions::set_step(&mut tx, session.id, OnboardingStep::Connecting, now).await?;
        tx.commit().await?;

        sessions::get(&mut conn, session.id)
            .await?
            .ok_or_else(|| CoreError::Internal("session vanished".to_string()))
    }

    /// Update one session account's status. Unknown accounts are a silent
    /// no-op by design (cross-tab races resolve to the same final set).
    pub async fn update_onboarding_account_status(
        &self,
        account_id: &str,
        status: SessionAccountStatus,
        calendar_count: Option<i64>,
        error_class: Option<String>,
    ) -> CoreResult<OnboardingSession> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        let session = sessions::unfinished(&mut conn)
            .await?
            .ok_or_else(|| CoreError::NotFound("no active onboarding session".to_string()))?;
        if session.step == OnboardingStep::Complete {
            return Err(CoreError::SessionComplete);
        }

        let updated = sessions::update_account_status(
            &mut conn,
            session.id,
            account_id,
            status,
            calendar_count,
            error_class.as_deref(),
            now,
        )
        .await?;
        if !updated {
            tracing::debug!(account_id, "status update for unknown session account ignored");
        }

        sessions::get(&mut conn, session.id)
            .await?
            .ok_or_else(|| CoreError::Internal("session vanished".to_string()))
    }

    /// Complete the session. Idempotent: completing an already-complete
    /// session returns it unchanged.
    pub async fn complete_onboarding_session(&self) -> CoreResult<OnboardingSession> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        let session = sessions::latest(&mut conn)
            .await?
            .ok_or_else(|| CoreError::NotFound("no onboarding session".to_string()))?;
        if session.step == OnboardingStep::Complete {
            return Ok(session);
        }

        sessions::complete(&mut conn, session.id, now).await?;
        sessions::get(&mut conn, session.id)
            .await?
            .ok_or_else(|| CoreError::Internal("session vanished".to_string()))
    }

    // ----- upgrade / downgrade -------------------------------------------

    /// Apply a computed upgrade plan: merged rows keep their feed-era
    /// canonical ids, provider duplicates are superseded, the feed account
    /// is marked upgraded and the OAuth account activated. One transaction.
    pub async fn apply_upgrade(
        &self,
        ics_account_id: AccountId,
        oauth_account_id: AccountId,
        plan: &UpgradePlan,
    ) -> CoreResult<()> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        accounts::require(&mut conn, ics_account_id).await?;
        accounts::require(&mut conn, oauth_account_id).await?;

        let mut tx = conn.begin().await?;
        for merge in &plan.merges {
            // The superseded provider row must go first so the merged row
            // can take over its (account, origin_event_id) identity.
            events::delete(&mut tx, merge.superseded).await?;
            let mut merged = merge.merged.clone();
            merged.origin_account_id = oauth_account_id;
            merged.updated_at = now;
            events::update(&mut tx, &merged).await?;
        }
        // Orphaned feed events move to the OAuth account so deleting the
        // feed account cannot cascade them away.
        for orphan in &plan.orphans {
            let mut kept = orphan.clone();
            kept.origin_account_id = oauth_account_id;
            kept.updated_at = now;
            events::update(&mut tx, &kept).await?;
        }
        accounts::update_status(&mut tx, ics_account_id, AccountStatus::Upgraded, now).await?;
        accounts::update_status(&mut tx, oauth_account_id, AccountStatus::Active, now).await?;
        // No events reference the feed account any more; drop the row so
        // feed listings and refresh scheduling stop seeing it.
        accounts::delete(&mut tx, ics_account_id).await?;
        tx.commit().await?;

        tracing::info!(
            %ics_account_id,
            %oauth_account_id,
            merged = plan.merges.len(),
            orphans = plan.orphans.len(),
            "upgraded feed account to OAuth"
        );
        Ok(())
    }

    /// Downgrade a revoked OAuth account to a read-only feed account. The
    /// event snapshot moves to the new account with canonical ids intact.
    pub async fn apply_downgrade(
        &self,
        oauth_account_id: AccountId,
        feed_url: Option<String>,
    ) -> CoreResult<DowngradeOutcome> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        accounts::require(&mut conn, oauth_account_id).await?;
        let event_count = events::count_for_account(&mut conn, oauth_account_id).await?;

        let Some(feed_url) = feed_url else {
            accounts::update_status(&mut conn, oauth_account_id, AccountStatus::Downgraded, now)
                .await?;
            return Ok(DowngradeOutcome {
                new_account: None,
                preserved_event_count: event_count.max(0) as u64,
                warning: Some(
                    "no public feed URL is known for this account; events are preserved \
                     but will not refresh automatically"
                        .to_string(),
                ),
            });
        };

        let new_account = Account {
            id: AccountId::new(),
            user_id: self.user_id,
            provider: Provider::IcsFeed,
            provider_subject: feed_url.clone(),
            email: None,
            status: AccountStatus::Active,
            write_capable: false,
            feed_url: Some(feed_url),
            feed_etag: None,
            feed_last_modified: None,
            feed_content_hash: None,
            feed_last_refresh_at: None,
            feed_last_success_at: None,
            feed_consecutive_failures: 0,
            feed_refresh_interval_ms: 900_000,
            created_at: now,
            updated_at: now,
        };

        let mut tx = conn.begin().await?;
        accounts::insert(&mut tx, &new_account).await?;
        let moved =
            events::move_to_account(&mut tx, oauth_account_id, new_account.id, EventSource::IcsFeed, now)
                .await?;
        accounts::update_status(&mut tx, oauth_account_id, AccountStatus::Downgraded, now).await?;
        tx.commit().await?;

        Ok(DowngradeOutcome {
            new_account: Some(new_account),
            preserved_event_count: moved,
            warning: None,
        })
    }

    // ----- health ---------------------------------------------------------

    /// Per-account sync health
    pub async fn sync_health(&self, now: DateTime<Utc>) -> CoreResult<Vec<AccountHealth>> {
        let mut conn = self.conn.lock().await;
        self.ensure_schema(&mut conn).await?;

        let accounts_list = accounts::list(&mut conn, None).await?;
        let mut health = Vec::with_capacity(accounts_list.len());
        for account in accounts_list {
            let event_count = events::count_for_account(&mut conn, account.id).await?;
            health.push(account_health(&account, event_count, now));
        }
        Ok(health)
    }
}

fn encode_cursor(sort_ts: &str, id: EventId) -> String {
    URL_SAFE_NO_PAD.encode(format!("{sort_ts}|{id}"))
}

fn decode_cursor(cursor: &str) -> CoreResult<(String, EventId)> {
    let invalid = || CoreError::InvalidArgument("invalid cursor".to_string());
    let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
    let decoded = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (ts, id) = decoded.split_once('|').ok_or_else(invalid)?;
    let id = id.parse::<EventId>().map_err(|_| invalid())?;
    Ok((ts.to_string(), id))
}
