//! Security utilities for Tempo
//!
//! This module provides security-related functionality including:
//! - SHA-256 content hashing (feed change detection, proof documents)
//! - Participant email hashing for VIP policies
//! - HMAC-signed bearer tokens carrying `user_id` and tier
//! - Opaque onboarding session tokens

use crate::error::{CoreError, CoreResult};
use crate::types::UserId;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Compute the SHA-256 digest of arbitrary bytes as a hex string
///
/// Used for feed-body change detection and proof document hashing. Hashes
/// are based on content, never on timestamps, so identical inputs always
/// produce identical digests.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash a participant email for VIP policy storage
///
/// Emails are normalized (trimmed, lowercased) before hashing so the same
/// address always maps to the same policy regardless of input casing.
pub fn hash_participant_email(email: &str) -> String {
    sha256_hex(email.trim().to_lowercase().as_bytes())
}

/// Generate an opaque onboarding session token
///
/// 32 random bytes, hex encoded. The token is single-purpose and carries
/// no PII; possession is sufficient to resume a session.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Subscription tier carried by the bearer credential
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Premium,
    Enterprise,
}

/// Claims carried by a verified bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub user_id: UserId,
    pub tier: Tier,
    /// Expiry as a Unix timestamp (seconds)
    pub exp: i64,
}

/// Sign bearer claims into a `payload.signature` token
///
/// The payload is base64url-encoded JSON; the signature is the hex HMAC-SHA256
/// of the encoded payload under `secret`. Token issuance normally happens in
/// the identity collaborator; this function exists for tooling and tests.
pub fn sign_token(claims: &AuthClaims, secret: &str) -> CoreResult<String> {
    let payload = serde_json::to_vec(claims)?;
    let encoded = URL_SAFE_NO_PAD.encode(payload);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::Internal(format!("HMAC init failed: {e}")))?;
    mac.update(encoded.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(format!("{encoded}.{signature}"))
}

/// Verify a bearer token and return its claims
///
/// Rejects malformed tokens, bad signatures and expired claims with
/// [`CoreError::AuthRequired`]; the caller maps this to HTTP 401.
pub fn verify_token(token: &str, secret: &str, now: DateTime<Utc>) -> CoreResult<AuthClaims> {
    let (encoded, signature) = token.rsplit_once('.').ok_or(CoreError::AuthRequired)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::Internal(format!("HMAC init failed: {e}")))?;
    mac.update(encoded.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    // Hex comparison of equal-length digests
    if expected != signature {
        return Err(CoreError::AuthRequired);
    }

    let payload = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| CoreError::AuthRequired)?;
    let claims: AuthClaims =
        serde_json::from_slice(&payload).map_err(|_| CoreError::AuthRequired)?;

    if claims.exp <= now.timestamp() {
        return Err(CoreError::AuthRequired);
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_sha256_hex_is_deterministic() {
        let digest1 = sha256_hex(b"feed body");
        let digest2 = sha256_hex(b"feed body");
        assert_eq!(digest1, digest2);
        assert_ne!(digest1, sha256_hex(b"other body"));
        assert!(digest1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest1.len(), 64);
    }

    #[test]
    fn test_hash_participant_email_normalizes() {
        assert_eq!(
            hash_participant_email("  Alice@Example.COM "),
            hash_participant_email("alice@example.com")
        );
        assert_ne!(
            hash_participant_email("alice@example.com"),
            hash_participant_email("bob@example.com")
        );
    }

    #[test]
    fn test_session_tokens_are_unique() {
        let token1 = generate_session_token();
        let token2 = generate_session_token();
        assert_ne!(token1, token2);
        assert_eq!(token1.len(), 64);
    }

    #[test]
    fn test_token_roundtrip() {
        let now = Utc::now();
        let claims = AuthClaims {
            user_id: UserId::new(),
            tier: Tier::Premium,
            exp: (now + Duration::hours(1)).timestamp(),
        };

        let token = sign_token(&claims, "secret").unwrap();
        let verified = verify_token(&token, "secret", now).unwrap();

        assert_eq!(verified.user_id, claims.user_id);
        assert_eq!(verified.tier, Tier::Premium);
    }

    #[test]
    fn test_token_rejects_wrong_secret() {
        let now = Utc::now();
        let claims = AuthClaims {
            user_id: UserId::new(),
            tier: Tier::Free,
            exp: (now + Duration::hours(1)).timestamp(),
        };

        let token = sign_token(&claims, "secret").unwrap();
        assert!(matches!(
            verify_token(&token, "other-secret", now),
            Err(CoreError::AuthRequired)
        ));
    }

    #[test]
    fn test_token_rejects_expired() {
        let now = Utc::now();
        let claims = AuthClaims {
            user_id: UserId::new(),
            tier: Tier::Free,
            exp: (now - Duration::minutes(1)).timestamp(),
        };

        let token = sign_token(&claims, "secret").unwrap();
        assert!(matches!(
            verify_token(&token, "secret", now),
            Err(CoreError::AuthRequired)
        ));
    }

    #[test]
    fn test_token_rejects_tampered_payload() {
        let now = Utc::now();
        let claims = AuthClaims {
            user_id: UserId::new(),
            tier: Tier::Free,
            exp: (now + Duration::hours(1)).timestamp(),
        };

        let token = sign_token(&claims, "secret").unwrap();
        let other = AuthClaims {
            tier: Tier::Enterprise,
            ..claims
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&other).unwrap());
        let signature = token.rsplit_once('.').unwrap().1;
        let forged = format!("{forged_payload}.{signature}");

        assert!(matches!(
            verify_token(&forged, "secret", now),
            Err(CoreError::AuthRequired)
        ));
    }

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Free < Tier::Premium);
        assert!(Tier::Premium < Tier::Enterprise);
    }
}
