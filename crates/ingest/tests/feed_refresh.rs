//! Feed refresh lifecycle tests against a local HTTP server

use axum::routing::get;
use axum::Router;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use tempo_core::ics::FeedErrorCategory;
use tempo_core::models::{AccountStatus, Provider};
use tempo_core::types::UserId;
use tempo_ingest::{refresh_feed, FeedFetcher, RefreshOutcome};
use tempo_store::{mirror_channel, NewAccount, Partition};
use tokio_util::sync::CancellationToken;

/// Mutable response the test server returns for every request
#[derive(Clone)]
struct FeedResponse {
    status: u16,
    body: String,
    etag: Option<String>,
}

type SharedResponse = Arc<Mutex<FeedResponse>>;

async fn serve_feed(response: SharedResponse) -> String {
    let app = Router::new().route(
        "/cal.ics",
        get({
            let response = response.clone();
            move || {
                let response = response.clone();
                async move {
                    let reply = response.lock().unwrap().clone();
                    let mut builder = axum::http::Response::builder()
                        .status(reply.status)
                        .header("Content-Type", "text/calendar");
                    if let Some(etag) = &reply.etag {
                        builder = builder.header("ETag", etag);
                    }
                    builder
                        .body(axum::body::Body::from(reply.body))
                        .expect("response build")
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/cal.ics")
}

fn vevent(uid: &str, sequence: i64, summary: &str) -> String {
    format!(
        "BEGIN:VEVENT\r\nUID:{uid}\r\nDTSTART:20260302T100000Z\r\nDTEND:20260302T110000Z\r\nSUMMARY:{summary}\r\nSEQUENCE:{sequence}\r\nEND:VEVENT\r\n"
    )
}

fn calendar(events: &[String]) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//Feed//EN\r\n{}END:VCALENDAR\r\n",
        events.concat()
    )
}

async fn feed_partition(url: &str) -> (Partition, tempo_core::types::AccountId) {
    let (tx, _rx) = mirror_channel();
    // The receiver is dropped; feed accounts never mirror, so sends are moot
    let partition = Partition::open_in_memory(UserId::new(), tx).await.unwrap();
    let account = partition
        .create_account(NewAccount {
            provider: Provider::IcsFeed,
            provider_subject: url.to_string(),
            email: None,
            status: AccountStatus::Active,
            write_capable: false,
            feed_url: Some(url.to_string()),
            feed_refresh_interval_ms: None,
        })
        .await
        .unwrap();
    (partition, account.id)
}

#[tokio::test]
async fn refresh_imports_then_diffs_added_modified_deleted() {
    let response = Arc::new(Mutex::new(FeedResponse {
        status: 200,
        body: calendar(&[
            vevent("A", 0, "Event A"),
            vevent("B", 0, "Event B"),
            vevent("C", 0, "Event C"),
        ]),
        etag: None,
    }));
    let url = serve_feed(response.clone()).await;
    let (partition, account_id) = feed_partition(&url).await;

    let fetcher = FeedFetcher::new().unwrap();
    let cancel = CancellationToken::new();

    let now = Utc::now();
    let outcome = refresh_feed(&partition, &fetcher, account_id, now, &cancel)
        .await
        .unwrap();
    let RefreshOutcome::Updated(summary) = outcome else {
        panic!("expected initial import");
    };
    assert_eq!(summary.created, 3);

    // Re-publish: A bumped to SEQUENCE=2, B gone, D new, C untouched
    response.lock().unwrap().body = calendar(&[
        vevent("A", 2, "Event A"),
        vevent("C", 0, "Event C"),
        vevent("D", 0, "Event D"),
    ]);

    let later = now + Duration::minutes(6);
    let outcome = refresh_feed(&partition, &fetcher, account_id, later, &cancel)
        .await
        .unwrap();
    let RefreshOutcome::Updated(summary) = outcome else {
        panic!("expected diff application");
    };
    assert_eq!(summary.created, 1, "D added");
    assert_eq!(summary.updated, 1, "A modified");
    assert_eq!(summary.deleted, 1, "B deleted");

    let account = partition.get_account(account_id).await.unwrap().unwrap();
    assert_eq!(account.feed_consecutive_failures, 0);
    assert!(account.feed_content_hash.is_some());
}

#[tokio::test]
async fn refresh_within_five_minutes_is_skipped() {
    let response = Arc::new(Mutex::new(FeedResponse {
        status: 200,
        body: calendar(&[vevent("A", 0, "Event A")]),
        etag: None,
    }));
    let url = serve_feed(response).await;
    let (partition, account_id) = feed_partition(&url).await;

    let fetcher = FeedFetcher::new().unwrap();
    let cancel = CancellationToken::new();
    let now = Utc::now();

    refresh_feed(&partition, &fetcher, account_id, now, &cancel)
        .await
        .unwrap();

    let soon = now + Duration::minutes(1);
    let outcome = refresh_feed(&partition, &fetcher, account_id, soon, &cancel)
        .await
        .unwrap();
    assert!(matches!(outcome, RefreshOutcome::Skipped { .. }));

    // Observed refresh timestamp is still the first attempt's
    let account = partition.get_account(account_id).await.unwrap().unwrap();
    assert_eq!(
        account.feed_last_refresh_at.map(|t| t.timestamp()),
        Some(now.timestamp())
    );
}

#[tokio::test]
async fn refresh_unchanged_on_identical_body() {
    let response = Arc::new(Mutex::new(FeedResponse {
        status: 200,
        body: calendar(&[vevent("A", 0, "Event A")]),
        etag: None,
    }));
    let url = serve_feed(response).await;
    let (partition, account_id) = feed_partition(&url).await;

    let fetcher = FeedFetcher::new().unwrap();
    let cancel = CancellationToken::new();
    let now = Utc::now();

    refresh_feed(&partition, &fetcher, account_id, now, &cancel)
        .await
        .unwrap();
    let outcome = refresh_feed(
        &partition,
        &fetcher,
        account_id,
        now + Duration::minutes(10),
        &cancel,
    )
    .await
    .unwrap();
    assert!(matches!(outcome, RefreshOutcome::Unchanged));
}

#[tokio::test]
async fn refresh_304_counts_as_success() {
    let response = Arc::new(Mutex::new(FeedResponse {
        status: 304,
        body: String::new(),
        etag: Some("\"v1\"".to_string()),
    }));
    let url = serve_feed(response).await;
    let (partition, account_id) = feed_partition(&url).await;

    let fetcher = FeedFetcher::new().unwrap();
    let cancel = CancellationToken::new();

    let outcome = refresh_feed(&partition, &fetcher, account_id, Utc::now(), &cancel)
        .await
        .unwrap();
    assert!(matches!(outcome, RefreshOutcome::Unchanged));

    let account = partition.get_account(account_id).await.unwrap().unwrap();
    assert_eq!(account.feed_consecutive_failures, 0);
    assert!(account.feed_last_success_at.is_some());
}

#[tokio::test]
async fn refresh_dead_feed_marks_account() {
    let response = Arc::new(Mutex::new(FeedResponse {
        status: 410,
        body: String::new(),
        etag: None,
    }));
    let url = serve_feed(response).await;
    let (partition, account_id) = feed_partition(&url).await;

    let fetcher = FeedFetcher::new().unwrap();
    let cancel = CancellationToken::new();

    let outcome = refresh_feed(&partition, &fetcher, account_id, Utc::now(), &cancel)
        .await
        .unwrap();
    let RefreshOutcome::Failed(class) = outcome else {
        panic!("expected failure");
    };
    assert_eq!(class.category, FeedErrorCategory::Dead);
    assert!(!class.retryable);
    assert!(class.user_action_required);

    let account = partition.get_account(account_id).await.unwrap().unwrap();
    assert_eq!(account.feed_consecutive_failures, 1);
    assert_eq!(account.status, AccountStatus::Error);
}

#[tokio::test]
async fn refresh_transport_failure_is_timeout() {
    // Bind and immediately drop a listener so the port refuses connections
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = format!("http://{addr}/cal.ics");
    let (partition, account_id) = feed_partition(&url).await;

    let fetcher = FeedFetcher::new().unwrap();
    let cancel = CancellationToken::new();

    let outcome = refresh_feed(&partition, &fetcher, account_id, Utc::now(), &cancel)
        .await
        .unwrap();
    let RefreshOutcome::Failed(class) = outcome else {
        panic!("expected failure");
    };
    assert_eq!(class.category, FeedErrorCategory::Timeout);
    assert!(class.retryable);

    let account = partition.get_account(account_id).await.unwrap().unwrap();
    assert_eq!(account.feed_consecutive_failures, 1);
}
