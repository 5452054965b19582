//! Bearer token authentication middleware
//!
//! Verifies HMAC-signed bearer tokens carrying `user_id` and tier. Token
//! issuance belongs to the identity collaborator; this middleware only
//! verifies signatures against the shared secret. Verified claims are
//! cached briefly so hot clients skip the HMAC per request.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use tempo_core::error::CoreError;
use tempo_core::security::{verify_token, AuthClaims, Tier};
use tempo_core::types::UserId;

use crate::error::ApiError;
use crate::AppState;

/// Authenticated requester, attached to request extensions
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub tier: Tier,
}

impl From<AuthClaims> for AuthenticatedUser {
    fn from(claims: AuthClaims) -> Self {
        Self {
            user_id: claims.user_id,
            tier: claims.tier,
        }
    }
}

/// Reject requests below the required tier
pub fn require_tier(user: &AuthenticatedUser, minimum: Tier) -> Result<(), ApiError> {
    if user.tier >= minimum {
        Ok(())
    } else {
        Err(ApiError(CoreError::Forbidden))
    }
}

pub async fn bearer_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError(CoreError::AuthRequired))?
        .to_string();

    let claims = match state.auth_cache.get(&token).await {
        Some(claims) if claims.exp > Utc::now().timestamp() => claims,
        _ => {
            let claims = verify_token(&token, &state.auth_secret, Utc::now())?;
            state.auth_cache.insert(token, claims.clone()).await;
            claims
        }
    };

    request
        .extensions_mut()
        .insert(AuthenticatedUser::from(claims));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_gate() {
        let free = AuthenticatedUser {
            user_id: UserId::new(),
            tier: Tier::Free,
        };
        let premium = AuthenticatedUser {
            user_id: UserId::new(),
            tier: Tier::Premium,
        };
        let enterprise = AuthenticatedUser {
            user_id: UserId::new(),
            tier: Tier::Enterprise,
        };

        assert!(require_tier(&free, Tier::Free).is_ok());
        assert!(require_tier(&free, Tier::Premium).is_err());
        assert!(require_tier(&premium, Tier::Premium).is_ok());
        assert!(require_tier(&enterprise, Tier::Premium).is_ok());
    }
}
