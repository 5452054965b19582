//! End-to-end API flow tests
//!
//! Drives the router directly with `tower::ServiceExt::oneshot` against a
//! tempdir-backed store and local ICS feed servers: onboarding, zero-auth
//! feed import, event listing, tier gating, and the commitment proof
//! export/download loop.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use tempo_api::{create_router, AppState};
use tempo_core::security::{sign_token, AuthClaims, Tier};
use tempo_core::types::UserId;
use tempo_ingest::FeedFetcher;
use tempo_store::{mirror_channel, Ces, ProofStore};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    _data_dir: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let (mirror_tx, _mirror_rx) = mirror_channel();

    let ces = Ces::new(data_dir.path(), mirror_tx);
    let proofs = ProofStore::new(data_dir.path().join("proofs"));
    let fetcher = FeedFetcher::new().expect("fetcher");
    let state = AppState::new(ces, proofs, fetcher, "test-secret".to_string());

    TestApp {
        router: create_router(state, "*"),
        _data_dir: data_dir,
    }
}

fn token(user_id: UserId, tier: Tier) -> String {
    sign_token(
        &AuthClaims {
            user_id,
            tier,
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        },
        "test-secret",
    )
    .expect("token")
}

async fn request(
    app: &TestApp,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        // Give the governor a client key; oneshot has no socket peer
        .header("x-forwarded-for", "203.0.113.10");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };
    (status, json)
}

/// Serve a fixed ICS body on a fresh local port
async fn serve_ics(body: String) -> String {
    let app = Router::new().route(
        "/feed.ics",
        get(move || {
            let body = body.clone();
            async move {
                (
                    [(header::CONTENT_TYPE, "text/calendar")],
                    body,
                )
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}/feed.ics", addr.port())
}

fn vevent_at(uid: &str, start: DateTime<Utc>, hours: i64) -> String {
    format!(
        "BEGIN:VEVENT\r\nUID:{uid}\r\nDTSTART:{}\r\nDTEND:{}\r\nSUMMARY:Client session {uid}\r\nSEQUENCE:0\r\nEND:VEVENT\r\n",
        start.format("%Y%m%dT%H%M%SZ"),
        (start + Duration::hours(hours)).format("%Y%m%dT%H%M%SZ"),
    )
}

fn calendar(events: &[String]) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//Feeds//EN\r\n{}END:VCALENDAR\r\n",
        events.concat()
    )
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let app = test_app();

    let (status, body) = request(&app, "GET", "/v1/events", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error_code"], "auth_required");

    let (status, _) = request(&app, "GET", "/v1/events", Some("garbage.token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Liveness stays open
    let (status, _) = request(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn onboarding_flow_with_idempotent_account_add() {
    let app = test_app();
    let token = token(UserId::new(), Tier::Free);

    let (status, body) =
        request(&app, "POST", "/v1/onboarding/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["step"], "welcome");
    let session_token = body["data"]["session_token"].as_str().unwrap().to_string();

    // Duplicate create conflicts unless replace=true
    let (status, body) =
        request(&app, "POST", "/v1/onboarding/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "session_exists");
    let (status, _) = request(
        &app,
        "POST",
        "/v1/onboarding/session?replace=true",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Same account id submitted twice converges to one entry, last wins
    for count in [1, 3] {
        let (status, _) = request(
            &app,
            "POST",
            "/v1/onboarding/session/account",
            Some(&token),
            Some(serde_json::json!({
                "account_id": "google-1",
                "provider": "google",
                "email": "user@example.com",
                "status": "connected",
                "calendar_count": count,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = request(&app, "GET", "/v1/onboarding/status", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["active"], true);
    assert_eq!(body["data"]["step"], "connecting");
    assert_eq!(body["data"]["account_count"], 1);
    assert_eq!(body["data"]["accounts"][0]["calendar_count"], 3);

    // Progress one account, then complete
    let (status, _) = request(
        &app,
        "PATCH",
        "/v1/onboarding/session/account",
        Some(&token),
        Some(serde_json::json!({
            "account_id": "google-1",
            "status": "synced",
            "calendar_count": 4,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(
        &app,
        "POST",
        "/v1/onboarding/session/complete",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["step"], "complete");
    assert!(body["data"]["completed_at"].is_string());

    // Completion froze the session
    let (status, _) = request(
        &app,
        "POST",
        "/v1/onboarding/session/account",
        Some(&token),
        Some(serde_json::json!({"account_id": "late", "provider": "microsoft"})),
    )
    .await;
    assert!(status == StatusCode::CONFLICT || status == StatusCode::NOT_FOUND);

    // Old session token no longer resolves after the replace
    let (status, _) = request(
        &app,
        "GET",
        &format!("/v1/onboarding/resume/{session_token}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn three_feed_zero_auth_import() {
    let app = test_app();
    let token = token(UserId::new(), Tier::Free);
    let base = Utc::now() - Duration::days(1);

    // Google-style, Outlook-style and Apple-style feeds with 3, 2, 2 events
    let feeds = [
        calendar(&[
            vevent_at("g1@google.com", base, 1),
            vevent_at("g2@google.com", base + Duration::hours(2), 1),
            vevent_at("g3@google.com", base + Duration::hours(4), 1),
        ]),
        calendar(&[
            vevent_at("o1@outlook.com", base + Duration::hours(6), 1),
            vevent_at("o2@outlook.com", base + Duration::hours(8), 1),
        ]),
        calendar(&[
            vevent_at("a1@icloud.com", base + Duration::hours(10), 1),
            vevent_at("a2@icloud.com", base + Duration::hours(12), 1),
        ]),
    ];

    let mut imported = Vec::new();
    for body in feeds {
        let url = serve_ics(body).await;
        let (status, body) = request(
            &app,
            "POST",
            "/v1/feeds",
            Some(&token),
            Some(serde_json::json!({"url": url})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        imported.push(body["data"]["events_imported"].as_u64().unwrap());
    }
    assert_eq!(imported, vec![3, 2, 2]);

    let (status, body) = request(&app, "GET", "/v1/feeds", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    for feed in body["data"].as_array().unwrap() {
        assert_eq!(feed["provider"], "ics_feed");
    }

    // All seven events in one range listing
    // Query timestamps use the Z suffix; a +00:00 offset would decode as a
    // space in the query string
    let start = (base - Duration::days(1)).format("%Y-%m-%dT%H:%M:%SZ");
    let end = (base + Duration::days(2)).format("%Y-%m-%dT%H:%M:%SZ");
    let (status, body) = request(
        &app,
        "GET",
        &format!("/v1/events?start={start}&end={end}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 7);
    assert_eq!(body["meta"]["has_more"], false);

    // Feed health reports fresh
    let (_, feeds_body) = request(&app, "GET", "/v1/feeds", Some(&token), None).await;
    let feed_id = feeds_body["data"][0]["id"].as_str().unwrap();
    let (status, body) = request(
        &app,
        "GET",
        &format!("/v1/feeds/{feed_id}/health"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["staleness"], "fresh");
    assert_eq!(body["data"]["is_dead"], false);
    assert_eq!(body["data"]["consecutive_failures"], 0);

    // Immediate manual refresh trips the five-minute window
    let (status, body) = request(
        &app,
        "POST",
        &format!("/v1/feeds/{feed_id}/refresh"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error_code"], "rate_limited");
}

#[tokio::test]
async fn tier_gating_on_governance_endpoints() {
    let app = test_app();
    let user_id = UserId::new();
    let free = token(user_id, Tier::Free);
    let premium = token(user_id, Tier::Premium);

    let (status, body) = request(&app, "GET", "/v1/vip-policies", Some(&free), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "forbidden");

    let (status, _) = request(&app, "GET", "/v1/commitments", Some(&free), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(&app, "GET", "/v1/vip-policies", Some(&premium), None).await;
    assert_eq!(status, StatusCode::OK);

    // Core reads stay available at free tier
    let (status, _) = request(&app, "GET", "/v1/events", Some(&free), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(
        &app,
        "POST",
        "/v1/vip-policies",
        Some(&premium),
        Some(serde_json::json!({
            "email": "ceo@example.com",
            "display_name": "CEO",
            "priority_weight": 9.5,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    // Only the hash of the address is stored or returned
    assert!(body["data"]["participant_hash"].as_str().unwrap().len() == 64);
    assert!(body.to_string().find("ceo@example.com").is_none());
}

#[tokio::test]
async fn commitment_proof_export_and_download() {
    let app = test_app();
    let user_id = UserId::new();
    let premium = token(user_id, Tier::Premium);
    let base = Utc::now() - Duration::days(2);

    // Import four 1-hour client sessions through a feed
    let url = serve_ics(calendar(&[
        vevent_at("s1@feed", base, 1),
        vevent_at("s2@feed", base + Duration::hours(2), 1),
        vevent_at("s3@feed", base + Duration::hours(4), 1),
        vevent_at("s4@feed", base + Duration::hours(6), 1),
    ]))
    .await;
    let (status, _) = request(
        &app,
        "POST",
        "/v1/feeds",
        Some(&premium),
        Some(serde_json::json!({"url": url})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let start = (base - Duration::days(1)).format("%Y-%m-%dT%H:%M:%SZ");
    let end = (base + Duration::days(1)).format("%Y-%m-%dT%H:%M:%SZ");
    let (_, events) = request(
        &app,
        "GET",
        &format!("/v1/events?start={start}&end={end}"),
        Some(&premium),
        None,
    )
    .await;
    let event_ids: Vec<String> = events["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(event_ids.len(), 4);

    // Allocate all four to the client as billable time
    for event_id in &event_ids {
        let (status, _) = request(
            &app,
            "POST",
            &format!("/v1/events/{event_id}/allocation"),
            Some(&premium),
            Some(serde_json::json!({
                "billing_category": "BILLABLE",
                "client_id": "acme",
                "rate": 250.0,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // 20 h target, 4 h actual: well under
    let (status, body) = request(
        &app,
        "POST",
        "/v1/commitments",
        Some(&premium),
        Some(serde_json::json!({
            "client_id": "acme",
            "client_name": "Acme Corp",
            "target_hours": 20.0,
            "window_type": "WEEKLY",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let commitment_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = request(
        &app,
        "GET",
        &format!("/v1/commitments/{commitment_id}/status"),
        Some(&premium),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "under");
    assert_eq!(body["data"]["actual_hours"], 4.0);
    assert_eq!(body["data"]["billable_event_count"], 4);

    // Export a CSV proof and verify the embedded hash end to end
    let (status, body) = request(
        &app,
        "POST",
        &format!("/v1/commitments/{commitment_id}/export"),
        Some(&premium),
        Some(serde_json::json!({"format": "csv"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let key = body["data"]["key"].as_str().unwrap().to_string();
    let proof_hash = body["data"]["proof_hash"].as_str().unwrap().to_string();
    assert!(key.starts_with(&format!("proofs/{user_id}/")));

    let download = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/v1/proofs/{key}"))
                .header("x-forwarded-for", "203.0.113.10")
                .header(header::AUTHORIZATION, format!("Bearer {premium}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(
        download.headers().get("x-proof-hash").unwrap(),
        proof_hash.as_str()
    );
    let bytes = axum::body::to_bytes(download.into_body(), usize::MAX)
        .await
        .unwrap();
    let document = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(document.contains(&proof_hash));
    assert!(document.contains("status,under"));

    // A different user cannot fetch the key: 404, not 403
    let stranger = token(UserId::new(), Tier::Premium);
    let (status, body) = request(
        &app,
        "GET",
        &format!("/v1/proofs/{key}"),
        Some(&stranger),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "not_found");
}

#[tokio::test]
async fn analytics_endpoints_respond() {
    let app = test_app();
    let token = token(UserId::new(), Tier::Free);

    let (status, body) = request(
        &app,
        "GET",
        "/v1/cognitive-load?date=2026-03-02",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["score"], 0);

    let (status, _) = request(
        &app,
        "GET",
        "/v1/cognitive-load?date=2026-03-02&range=week",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(
        &app,
        "GET",
        "/v1/risk-scores?weeks=2",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["risk_level"], "LOW");

    let (status, body) = request(
        &app,
        "GET",
        "/v1/probabilistic-availability?granularity_minutes=60",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 24);

    let (status, _) = request(
        &app,
        "GET",
        "/v1/probabilistic-availability?granularity_minutes=0",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
