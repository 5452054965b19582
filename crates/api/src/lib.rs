//! Tempo API Server Library

pub mod config;
pub mod envelope;
pub mod error;
pub mod middleware;
pub mod routes;

use axum::{middleware as axum_middleware, Router};
use moka::future::Cache;
use tempo_core::security::AuthClaims;
use tempo_ingest::FeedFetcher;
use tempo_store::{Ces, ProofStore};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::bearer_auth::bearer_auth;
use crate::middleware::rate_limit::{UserOrIpKeyExtractor, API_BURST_SIZE, API_PERIOD_MS};

#[derive(Clone)]
pub struct AppState {
    pub ces: Ces,
    pub proofs: ProofStore,
    pub fetcher: FeedFetcher,
    pub auth_cache: Cache<String, AuthClaims>,
    pub auth_secret: String,
}

impl AppState {
    pub fn new(ces: Ces, proofs: ProofStore, fetcher: FeedFetcher, auth_secret: String) -> Self {
        let auth_cache = Cache::builder()
            .time_to_live(std::time::Duration::from_secs(300))
            .max_capacity(10_000)
            .build();
        Self {
            ces,
            proofs,
            fetcher,
            auth_cache,
            auth_secret,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::onboarding::create_session,
        routes::onboarding::get_session,
        routes::onboarding::add_account,
        routes::onboarding::update_account,
        routes::onboarding::complete_session,
        routes::onboarding::status,
        routes::onboarding::resume,
        routes::feeds::add_feed,
        routes::feeds::list_feeds,
        routes::feeds::feed_health,
        routes::feeds::refresh_feed,
        routes::feeds::upgrade_feed,
        routes::feeds::downgrade,
        routes::events::list_events,
        routes::events::export_ics,
        routes::events::put_allocation,
        routes::events::get_allocation,
        routes::accounts::list_accounts,
        routes::accounts::sync_health,
        routes::accounts::delete_account,
        routes::constraints::create_constraint,
        routes::constraints::list_constraints,
        routes::constraints::delete_constraint,
        routes::vip::create_policy,
        routes::vip::list_policies,
        routes::vip::delete_policy,
        routes::commitments::create_commitment,
        routes::commitments::list_commitments,
        routes::commitments::get_status,
        routes::commitments::export_proof,
        routes::commitments::delete_commitment,
        routes::commitments::download_proof,
        routes::analytics::cognitive_load,
        routes::analytics::context_switches,
        routes::analytics::deep_work,
        routes::analytics::risk_scores,
        routes::analytics::probabilistic_availability,
    ),
    components(
        schemas(
            tempo_core::models::CanonicalEvent,
            tempo_core::models::EventStatus,
            tempo_core::models::Transparency,
            tempo_core::models::Visibility,
            tempo_core::models::EventSource,
            tempo_core::models::Provider,
            tempo_core::models::Account,
            tempo_core::models::AccountStatus,
            tempo_core::models::Attendee,
            tempo_core::models::Organizer,
            tempo_core::models::ConferenceData,
            tempo_core::models::BillingCategory,
            tempo_core::models::TimeAllocation,
            tempo_core::models::Commitment,
            tempo_core::models::WindowType,
            tempo_core::models::VipPolicy,
            tempo_core::models::VipConditions,
            tempo_core::models::OnboardingStep,
            tempo_core::models::SessionAccountStatus,
            tempo_core::models::SessionAccount,
            tempo_core::models::OnboardingSession,
            routes::health::HealthResponse,
            routes::onboarding::AddAccountRequest,
            routes::onboarding::UpdateAccountRequest,
            routes::feeds::AddFeedRequest,
            routes::feeds::AddFeedResponse,
            routes::feeds::UpgradeRequest,
            routes::feeds::DowngradeRequest,
            routes::events::AllocationRequest,
            routes::constraints::CreateConstraintRequest,
            tempo_core::models::Constraint,
            tempo_core::models::ConstraintKind,
            tempo_core::models::WorkingHoursConfig,
            routes::vip::CreateVipRequest,
            routes::commitments::CreateCommitmentRequest,
            routes::commitments::ExportRequest,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "onboarding", description = "Progressive onboarding session"),
        (name = "feeds", description = "ICS feed lifecycle"),
        (name = "events", description = "Canonical events and allocations"),
        (name = "accounts", description = "Connected accounts"),
        (name = "constraints", description = "Scheduling constraints"),
        (name = "vip", description = "VIP policies (premium)"),
        (name = "commitments", description = "Commitments and proofs (premium)"),
        (name = "analytics", description = "Calendar intelligence"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .build(),
                ),
            );
        }
    }
}

/// Create the application router
pub fn create_router(state: AppState, cors_origin: &str) -> Router {
    let cors = if cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        match cors_origin.parse::<axum::http::HeaderValue>() {
            Ok(origin) => CorsLayer::new()
                .allow_origin(AllowOrigin::exact(origin))
                .allow_methods(Any)
                .allow_headers(Any),
            Err(e) => {
                // Startup configuration problem; refusing to serve with a
                // broken CORS policy is safer than guessing.
                panic!("invalid CORS origin {cors_origin:?}: {e}");
            }
        }
    };

    let authed = routes::onboarding::routes()
        .merge(routes::feeds::routes())
        .merge(routes::events::routes())
        .merge(routes::accounts::routes())
        .merge(routes::constraints::routes())
        .merge(routes::vip::routes())
        .merge(routes::commitments::routes())
        .merge(routes::analytics::routes())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            bearer_auth,
        ))
        .layer(GovernorLayer::new(
            GovernorConfigBuilder::default()
                .period(std::time::Duration::from_millis(API_PERIOD_MS))
                .burst_size(API_BURST_SIZE)
                .key_extractor(UserOrIpKeyExtractor)
                .finish()
                .expect("governor config"),
        ));

    Router::new()
        .merge(routes::health::routes())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/v1", authed)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %response.status(),
                            "finished processing request"
                        );
                    },
                ),
        )
        .with_state(state)
}

/// Run the API server until the listener fails or the task is cancelled
pub async fn run_api(state: AppState, config: &config::Config) -> Result<(), std::io::Error> {
    let app = create_router(state, &config.cors_allowed_origin);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
}
