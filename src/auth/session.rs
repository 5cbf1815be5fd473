//! Stateless signed web sessions.
//!
//! A session token is `payload.mac`: the payload is base64url JSON claims
//! (subject, issued-at, expiry), the MAC a blake3 keyed hash over the encoded
//! payload. The server verifies without any session table; a token is
//! invalidated only by expiry or by the user logging in again.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::ott::TelegramId;
use crate::error::{AppError, AppResult};

/// Name of the cookie the session token travels in.
pub const SESSION_COOKIE: &str = "kuzka_session";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    tg_id: TelegramId,
    iat: i64,
    exp: i64,
}

/// Issues and verifies signed session tokens.
pub struct SessionBinder {
    key: [u8; 32],
    ttl: Duration,
}

impl SessionBinder {
    pub fn new(key: [u8; 32], ttl_hours: i64) -> Self {
        Self {
            key,
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Issue a session token for a redeemed identity.
    pub fn bind(&self, tg_id: TelegramId) -> String {
        self.bind_at(tg_id, Utc::now())
    }

    fn bind_at(&self, tg_id: TelegramId, now: DateTime<Utc>) -> String {
        let claims = Claims {
            tg_id,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        let payload = URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&claims).expect("claims always serialize"));
        let mac = blake3::keyed_hash(&self.key, payload.as_bytes());
        format!("{payload}.{}", URL_SAFE_NO_PAD.encode(mac.as_bytes()))
    }

    /// Verify a presented token and return its subject.
    pub fn verify(&self, token: &str) -> AppResult<TelegramId> {
        self.verify_at(token, Utc::now())
    }

    fn verify_at(&self, token: &str, now: DateTime<Utc>) -> AppResult<TelegramId> {
        let (payload, mac_b64) = token
            .split_once('.')
            .ok_or(AppError::SessionInvalidOrExpired)?;

        let mac_bytes: [u8; 32] = URL_SAFE_NO_PAD
            .decode(mac_b64)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or(AppError::SessionInvalidOrExpired)?;

        // blake3::Hash equality is constant-time.
        let expected = blake3::keyed_hash(&self.key, payload.as_bytes());
        if expected != blake3::Hash::from(mac_bytes) {
            return Err(AppError::SessionInvalidOrExpired);
        }

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|v| serde_json::from_slice(&v).ok())
            .ok_or(AppError::SessionInvalidOrExpired)?;

        if now.timestamp() >= claims.exp {
            return Err(AppError::SessionInvalidOrExpired);
        }
        Ok(claims.tg_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binder() -> SessionBinder {
        SessionBinder::new([42u8; 32], 12)
    }

    #[test]
    fn test_bind_verify_round_trip() {
        let b = binder();
        let token = b.bind(123456789);
        assert_eq!(b.verify(&token).unwrap(), 123456789);
    }

    #[test]
    fn test_expired_session_rejected() {
        let b = binder();
        let t0 = Utc::now();
        let token = b.bind_at(1, t0);
        assert_eq!(b.verify_at(&token, t0 + Duration::hours(11)).unwrap(), 1);
        assert!(matches!(
            b.verify_at(&token, t0 + Duration::hours(13)),
            Err(AppError::SessionInvalidOrExpired)
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let b = binder();
        let token = b.bind(1);
        let (payload, mac) = token.split_once('.').unwrap();

        // Forge claims for another subject but keep the original MAC.
        let forged_claims = serde_json::json!({
            "tg_id": 2,
            "iat": 0,
            "exp": i64::MAX,
        });
        let forged_payload = URL_SAFE_NO_PAD.encode(forged_claims.to_string());
        let forged = format!("{forged_payload}.{mac}");
        assert!(b.verify(&forged).is_err());

        // Truncated MAC.
        let truncated = format!("{payload}.{}", &mac[..10]);
        assert!(b.verify(&truncated).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = binder().bind(1);
        let other = SessionBinder::new([43u8; 32], 12);
        assert!(matches!(
            other.verify(&token),
            Err(AppError::SessionInvalidOrExpired)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let b = binder();
        assert!(b.verify("").is_err());
        assert!(b.verify("no-dot-here").is_err());
        assert!(b.verify("a.b").is_err());
    }
}
