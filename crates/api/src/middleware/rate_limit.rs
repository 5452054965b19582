//! Rate limiting middleware
//!
//! Implements request rate limiting using `tower-governor`, keyed by the
//! authenticated user when available, falling back to the client IP.

use axum::extract::ConnectInfo;
use axum::http::Request;
use std::net::{IpAddr, SocketAddr};
use tempo_core::types::UserId;
use tower_governor::errors::GovernorError;
use tower_governor::key_extractor::KeyExtractor;

use super::bearer_auth::AuthenticatedUser;

// Target rate: 300 requests/minute = 1 request every 200ms
pub const API_PERIOD_MS: u64 = 200;
pub const API_BURST_SIZE: u32 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    User(UserId),
    Ip(IpAddr),
}

#[derive(Clone)]
pub struct UserOrIpKeyExtractor;

impl KeyExtractor for UserOrIpKeyExtractor {
    type Key = RateLimitKey;

    fn extract<B>(&self, req: &Request<B>) -> Result<Self::Key, GovernorError> {
        if let Some(user) = req.extensions().get::<AuthenticatedUser>() {
            return Ok(RateLimitKey::User(user.user_id));
        }

        let headers = req.headers();

        // X-Forwarded-For first (the deployment sits behind a proxy), first
        // hop wins
        if let Some(header) = headers.get("x-forwarded-for") {
            if let Ok(val) = header.to_str() {
                if let Some(client_ip) = val.split(',').next() {
                    if let Ok(ip) = client_ip.trim().parse::<IpAddr>() {
                        return Ok(RateLimitKey::Ip(ip));
                    }
                }
            }
        }

        if let Some(header) = headers.get("x-real-ip") {
            if let Ok(val) = header.to_str() {
                if let Ok(ip) = val.trim().parse::<IpAddr>() {
                    return Ok(RateLimitKey::Ip(ip));
                }
            }
        }

        if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
            return Ok(RateLimitKey::Ip(addr.ip()));
        }

        Err(GovernorError::UnableToExtractKey)
    }
}
