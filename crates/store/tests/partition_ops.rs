//! Partition operation tests
//!
//! Exercise the CES against an in-memory partition: delta merge rules,
//! onboarding session lifecycle, upgrade/downgrade flows and pagination.

use chrono::{TimeZone, Utc};
use tempo_core::error::CoreError;
use tempo_core::models::{
    AccountStatus, Attendee, BillingCategory, ConferenceData, EventDelta, EventPayload,
    EventStatus, EventUpsert, MirrorOperation, Provider, SessionAccountStatus, WindowType,
};
use tempo_core::types::UserId;
use tempo_core::upgrade::plan_upgrade;
use tempo_store::{mirror_channel, MirrorReceiver, NewAccount, Partition};

async fn partition() -> (Partition, MirrorReceiver) {
    let (tx, rx) = mirror_channel();
    let partition = Partition::open_in_memory(UserId::new(), tx).await.unwrap();
    (partition, rx)
}

fn new_account(provider: Provider, subject: &str) -> NewAccount {
    NewAccount {
        provider,
        provider_subject: subject.to_string(),
        email: None,
        status: AccountStatus::Active,
        write_capable: provider != Provider::IcsFeed,
        feed_url: (provider == Provider::IcsFeed).then(|| subject.to_string()),
        feed_refresh_interval_ms: None,
    }
}

fn upsert(origin_event_id: &str, version: i64, title: &str) -> EventUpsert {
    EventUpsert {
        origin_event_id: origin_event_id.to_string(),
        version: Some(version),
        payload: EventPayload {
            title: Some(title.to_string()),
            start: Some(Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2026, 3, 2, 11, 0, 0).unwrap()),
            ..EventPayload::default()
        },
    }
}

#[tokio::test]
async fn delta_insert_update_and_out_of_order() {
    let (partition, _rx) = partition().await;
    let account = partition
        .create_account(new_account(Provider::Google, "sub-1"))
        .await
        .unwrap();

    // Insert
    let summary = partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts: vec![upsert("e1", 1, "First")],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.created, 1);

    // Newer version overwrites
    let summary = partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts: vec![upsert("e1", 3, "Renamed")],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.updated, 1);

    // Out-of-order older version is dropped
    let summary = partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts: vec![upsert("e1", 2, "Stale title")],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.created, 0);

    let events = partition.account_events(account.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].title, "Renamed");
    assert_eq!(events[0].version, 3);
}

#[tokio::test]
async fn delta_enrichment_merges_without_version_bump() {
    let (partition, _rx) = partition().await;
    let account = partition
        .create_account(new_account(Provider::Google, "sub-1"))
        .await
        .unwrap();

    partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts: vec![upsert("e1", 5, "Meeting")],
                deletes: vec![],
            },
        )
        .await
        .unwrap();

    // Older upsert carrying attendees the stored row lacks
    let mut enrich = upsert("e1", 2, "Ignored title");
    enrich.payload.attendees = vec![Attendee {
        email: Some("a@example.com".to_string()),
        display_name: None,
        response_status: None,
    }];
    let summary = partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts: vec![enrich],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.updated, 1);

    let events = partition.account_events(account.id).await.unwrap();
    assert_eq!(events[0].version, 5, "enrichment must not move the version");
    assert_eq!(events[0].title, "Meeting", "enrichment must not touch the body");
    assert_eq!(events[0].attendees.len(), 1);
}

#[tokio::test]
async fn delta_unique_identity_invariant() {
    let (partition, _rx) = partition().await;
    let account = partition
        .create_account(new_account(Provider::Google, "sub-1"))
        .await
        .unwrap();

    for _ in 0..3 {
        partition
            .apply_provider_delta(
                account.id,
                EventDelta {
                    upserts: vec![upsert("same-origin", 1, "Event")],
                    deletes: vec![],
                },
            )
            .await
            .unwrap();
    }

    let events = partition.account_events(account.id).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn delta_delete_cancels_and_blanks_body() {
    let (partition, _rx) = partition().await;
    let account = partition
        .create_account(new_account(Provider::Google, "sub-1"))
        .await
        .unwrap();

    partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts: vec![upsert("e1", 1, "Doomed")],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    let event_id = partition.account_events(account.id).await.unwrap()[0].id;

    let summary = partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts: vec![],
                deletes: vec!["e1".to_string()],
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.deleted, 1);

    let event = partition.get_event(event_id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Cancelled);
    assert!(event.title.is_empty());

    // Blanked cancelled events never appear in range listings
    let page = partition
        .list_events(
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap(),
            None,
            100,
        )
        .await
        .unwrap();
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn delta_mirrors_enqueued_for_write_capable_account() {
    let (partition, mut rx) = partition().await;
    let account = partition
        .create_account(new_account(Provider::Google, "sub-1"))
        .await
        .unwrap();

    let summary = partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts: vec![upsert("e1", 1, "Mirrored")],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.mirrors_enqueued, 1);
    assert!(summary.errors.is_empty());

    let intent = rx.recv().await.unwrap();
    assert_eq!(intent.target_account_id, account.id);
    assert_eq!(intent.operation, MirrorOperation::Upsert);
    assert_eq!(intent.version, 1);
}

#[tokio::test]
async fn delta_feed_account_enqueues_no_mirrors() {
    let (partition, _rx) = partition().await;
    let account = partition
        .create_account(new_account(Provider::IcsFeed, "https://example.com/c.ics"))
        .await
        .unwrap();

    let summary = partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts: vec![upsert("e1", 1, "Feed event")],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.mirrors_enqueued, 0);
}

#[tokio::test]
async fn delta_unknown_account_fails() {
    let (partition, _rx) = partition().await;
    let err = partition
        .apply_provider_delta(tempo_core::types::AccountId::new(), EventDelta::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownAccount(_)));
}

#[tokio::test]
async fn provider_takeover_of_feed_row_by_ical_uid() {
    let (partition, _rx) = partition().await;
    let feed = partition
        .create_account(new_account(Provider::IcsFeed, "https://example.com/c.ics"))
        .await
        .unwrap();
    let oauth = partition
        .create_account(new_account(Provider::Google, "sub-1"))
        .await
        .unwrap();

    let mut feed_upsert = upsert("shared@g", 1, "Feed view");
    feed_upsert.payload.ical_uid = Some("shared@g".to_string());
    partition
        .apply_provider_delta(
            feed.id,
            EventDelta {
                upserts: vec![feed_upsert],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    let canonical_id = partition.account_events(feed.id).await.unwrap()[0].id;

    let mut provider_upsert = upsert("g-123", 2, "Provider view");
    provider_upsert.payload.ical_uid = Some("shared@g".to_string());
    let summary = partition
        .apply_provider_delta(
            oauth.id,
            EventDelta {
                upserts: vec![provider_upsert],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.created, 0);
    assert_eq!(summary.updated, 1);

    // One event total: the provider row took the feed row over in place
    let event = partition.get_event(canonical_id).await.unwrap().unwrap();
    assert_eq!(event.title, "Provider view");
    assert_eq!(event.origin_account_id, oauth.id);
    assert!(partition.account_events(feed.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn list_events_paginates_with_cursor() {
    let (partition, _rx) = partition().await;
    let account = partition
        .create_account(new_account(Provider::Google, "sub-1"))
        .await
        .unwrap();

    let upserts = (0..5)
        .map(|i| {
            let mut u = upsert(&format!("e{i}"), 1, &format!("Event {i}"));
            u.payload.start = Some(Utc.with_ymd_and_hms(2026, 3, 2, 9 + i, 0, 0).unwrap());
            u.payload.end = Some(Utc.with_ymd_and_hms(2026, 3, 2, 10 + i, 0, 0).unwrap());
            u
        })
        .collect();
    partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts,
                deletes: vec![],
            },
        )
        .await
        .unwrap();

    let range_start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let range_end = Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap();

    let first = partition
        .list_events(range_start, range_end, None, 2)
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);
    assert!(first.has_more);
    let cursor = first.next_cursor.clone().unwrap();

    let second = partition
        .list_events(range_start, range_end, Some(&cursor), 2)
        .await
        .unwrap();
    assert_eq!(second.items.len(), 2);
    assert!(second.has_more);
    assert_ne!(first.items[0].id, second.items[0].id);

    let third = partition
        .list_events(range_start, range_end, second.next_cursor.as_deref(), 2)
        .await
        .unwrap();
    assert_eq!(third.items.len(), 1);
    assert!(!third.has_more);
    assert!(third.next_cursor.is_none());

    // Ascending by start across pages
    let mut all: Vec<_> = first.items;
    all.extend(second.items);
    all.extend(third.items);
    let starts: Vec<_> = all.iter().map(|e| e.start.unwrap()).collect();
    let mut sorted = starts.clone();
    sorted.sort();
    assert_eq!(starts, sorted);
}

#[tokio::test]
async fn onboarding_session_lifecycle() {
    let (partition, _rx) = partition().await;
    let session_id = tempo_core::types::SessionId::new();
    let token = tempo_core::security::generate_session_token();

    let session = partition
        .create_onboarding_session(session_id, &token, false)
        .await
        .unwrap();
    assert_eq!(session.step, tempo_core::models::OnboardingStep::Welcome);

    // Second create without replace conflicts
    let err = partition
        .create_onboarding_session(tempo_core::types::SessionId::new(), "other-token", false)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::SessionExists));

    // Idempotent add: same account_id three times, last submission wins
    for count in [0, 2, 3] {
        partition
            .add_onboarding_account(
                "acct-google-1",
                Provider::Google,
                Some("user@example.com".to_string()),
                SessionAccountStatus::Connecting,
                count,
                None,
            )
            .await
            .unwrap();
    }
    let session = partition.onboarding_session().await.unwrap().unwrap();
    assert_eq!(session.step, tempo_core::models::OnboardingStep::Connecting);
    assert_eq!(session.accounts.len(), 1);
    assert_eq!(session.accounts[0].calendar_count, 3);

    // Status update for an unknown account is a silent no-op
    let session = partition
        .update_onboarding_account_status(
            "nobody",
            SessionAccountStatus::Error,
            None,
            Some("auth_failed".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(session.accounts.len(), 1);

    partition
        .update_onboarding_account_status("acct-google-1", SessionAccountStatus::Synced, Some(4), None)
        .await
        .unwrap();

    // Resume by token
    let resumed = partition
        .onboarding_session_by_token(&token, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resumed.id, session_id);
    assert!(partition
        .onboarding_session_by_token("wrong-token", Utc::now())
        .await
        .unwrap()
        .is_none());

    // Complete is idempotent and freezes the session
    let done = partition.complete_onboarding_session().await.unwrap();
    assert!(done.completed_at.is_some());
    let again = partition.complete_onboarding_session().await.unwrap();
    assert_eq!(done.completed_at, again.completed_at);

    let err = partition
        .add_onboarding_account(
            "late",
            Provider::Microsoft,
            None,
            SessionAccountStatus::Connecting,
            0,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::SessionComplete | CoreError::NotFound(_)
    ));
}

#[tokio::test]
async fn upgrade_preserves_identity_and_loses_nothing() {
    let (partition, _rx) = partition().await;
    let feed = partition
        .create_account(new_account(Provider::IcsFeed, "https://example.com/c.ics"))
        .await
        .unwrap();

    let mut shared = upsert("shared@g", 1, "Shared event");
    shared.payload.ical_uid = Some("shared@g".to_string());
    let mut orphan = upsert("orphan@g", 1, "Feed only");
    orphan.payload.ical_uid = Some("orphan@g".to_string());
    partition
        .apply_provider_delta(
            feed.id,
            EventDelta {
                upserts: vec![shared, orphan],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    let ics_events = partition.account_events(feed.id).await.unwrap();
    let shared_canonical_id = ics_events
        .iter()
        .find(|e| e.ical_uid.as_deref() == Some("shared@g"))
        .unwrap()
        .id;

    // OAuth account created as part of the flow; its events land under a
    // pending account until activation
    let oauth = partition
        .create_account(NewAccount {
            status: AccountStatus::Pending,
            ..new_account(Provider::Google, "sub-1")
        })
        .await
        .unwrap();
    // Build the OAuth event rows without triggering the feed takeover path
    let oauth_events: Vec<tempo_core::models::CanonicalEvent> = {
        let mut oauth_shared = ics_events
            .iter()
            .find(|e| e.ical_uid.as_deref() == Some("shared@g"))
            .cloned()
            .unwrap();
        oauth_shared.id = tempo_core::types::EventId::new();
        oauth_shared.origin_account_id = oauth.id;
        oauth_shared.origin_event_id = "g-shared".to_string();
        oauth_shared.attendees = vec![
            Attendee {
                email: Some("a@x.com".to_string()),
                display_name: None,
                response_status: None,
            },
            Attendee {
                email: Some("b@x.com".to_string()),
                display_name: None,
                response_status: None,
            },
        ];
        oauth_shared.conference_data = Some(ConferenceData {
            url: "https://meet.example.com/x".to_string(),
            kind: None,
        });
        vec![oauth_shared]
    };

    let plan = plan_upgrade(&ics_events, &oauth_events);
    assert_eq!(plan.merges.len(), 1);
    assert_eq!(plan.orphans.len(), 1);

    partition
        .apply_upgrade(feed.id, oauth.id, &plan)
        .await
        .unwrap();

    // Merged event kept its feed-era canonical id and gained enrichment
    let merged = partition
        .get_event(shared_canonical_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(merged.attendees.len(), 2);
    assert!(merged.conference_data.is_some());
    assert_eq!(merged.origin_account_id, oauth.id);

    // Zero loss: orphan survived under the OAuth account
    let oauth_rows = partition.account_events(oauth.id).await.unwrap();
    assert_eq!(oauth_rows.len(), 2);

    // Feed account is gone, OAuth account active
    assert!(partition.get_account(feed.id).await.unwrap().is_none());
    let oauth_account = partition.get_account(oauth.id).await.unwrap().unwrap();
    assert_eq!(oauth_account.status, AccountStatus::Active);
}

#[tokio::test]
async fn downgrade_moves_snapshot_to_feed_account() {
    let (partition, _rx) = partition().await;
    let oauth = partition
        .create_account(new_account(Provider::Google, "sub-1"))
        .await
        .unwrap();

    let upserts = (0..50).map(|i| upsert(&format!("e{i}"), 1, "Event")).collect();
    partition
        .apply_provider_delta(
            oauth.id,
            EventDelta {
                upserts,
                deletes: vec![],
            },
        )
        .await
        .unwrap();

    let outcome = partition
        .apply_downgrade(oauth.id, Some("https://calendar.example.com/pub.ics".to_string()))
        .await
        .unwrap();

    assert_eq!(outcome.preserved_event_count, 50);
    assert!(outcome.warning.is_none());
    let new_account = outcome.new_account.unwrap();
    assert_eq!(new_account.provider, Provider::IcsFeed);
    assert!(!new_account.write_capable);

    assert_eq!(partition.account_events(new_account.id).await.unwrap().len(), 50);
    let old = partition.get_account(oauth.id).await.unwrap().unwrap();
    assert_eq!(old.status, AccountStatus::Downgraded);
}

#[tokio::test]
async fn downgrade_without_feed_url_warns() {
    let (partition, _rx) = partition().await;
    let oauth = partition
        .create_account(new_account(Provider::Google, "sub-1"))
        .await
        .unwrap();

    let outcome = partition.apply_downgrade(oauth.id, None).await.unwrap();
    assert!(outcome.new_account.is_none());
    let warning = outcome.warning.unwrap();
    assert!(warning.contains("refresh"));

    let old = partition.get_account(oauth.id).await.unwrap().unwrap();
    assert_eq!(old.status, AccountStatus::Downgraded);
}

#[tokio::test]
async fn locked_allocation_blocks_account_deletion() {
    let (partition, _rx) = partition().await;
    let account = partition
        .create_account(new_account(Provider::Google, "sub-1"))
        .await
        .unwrap();
    partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts: vec![upsert("e1", 1, "Billable work")],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    let event_id = partition.account_events(account.id).await.unwrap()[0].id;

    partition
        .upsert_allocation(
            event_id,
            BillingCategory::Billable,
            Some("acme".to_string()),
            Some(200.0),
            1.0,
            true,
        )
        .await
        .unwrap();

    let err = partition.delete_account(account.id).await.unwrap_err();
    assert!(matches!(err, CoreError::InUse(_)));
}

#[tokio::test]
async fn commitment_entries_join_window() {
    let (partition, _rx) = partition().await;
    let account = partition
        .create_account(new_account(Provider::Google, "sub-1"))
        .await
        .unwrap();
    partition
        .apply_provider_delta(
            account.id,
            EventDelta {
                upserts: vec![upsert("e1", 1, "Client work")],
                deletes: vec![],
            },
        )
        .await
        .unwrap();
    let event_id = partition.account_events(account.id).await.unwrap()[0].id;
    partition
        .upsert_allocation(
            event_id,
            BillingCategory::Billable,
            Some("acme".to_string()),
            Some(250.0),
            1.0,
            false,
        )
        .await
        .unwrap();

    let commitment = partition
        .create_commitment(
            "acme".to_string(),
            "Acme Corp".to_string(),
            20.0,
            WindowType::Weekly,
            1,
            false,
            true,
        )
        .await
        .unwrap();

    let window = tempo_core::governance::commitment_window(
        &commitment,
        Utc.with_ymd_and_hms(2026, 3, 6, 0, 0, 0).unwrap(),
    );
    let entries = partition.commitment_entries("acme", window).await.unwrap();
    assert_eq!(entries.len(), 1);

    let empty = partition.commitment_entries("globex", window).await.unwrap();
    assert!(empty.is_empty());
}
