//! One-time login tokens bridging a Telegram identity into a web session.
//!
//! The bot issues a token, the login link carries it, and the web layer
//! redeems it. Redemption is a single atomic check-and-set per token: the
//! first redemption before expiry binds the session and opens a short grace
//! window during which re-redemption (double-clicked link, redirect replay)
//! succeeds idempotently with the same identity. Outside that window a
//! consumed token is dead.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// Telegram user id, the subject identity carried by a token.
pub type TelegramId = i64;

/// Tokens expire 10 minutes after issuance.
pub const TOKEN_TTL_SECS: i64 = 600;
/// A consumed token keeps answering with the same identity for 60 seconds.
pub const GRACE_WINDOW_SECS: i64 = 60;

const TOKEN_BYTES: usize = 32;

/// Store abstraction for one-time login tokens. Injected wherever tokens are
/// issued or redeemed; any backend with atomic per-token check-and-set
/// semantics qualifies.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Generate and record a fresh token for `subject`.
    async fn issue(&self, subject: TelegramId) -> String;

    /// Atomically redeem a token. Succeeds for the first redemption before
    /// expiry and for repeat redemptions inside the grace window; everything
    /// else is `TokenExpiredOrInvalid`.
    async fn redeem(&self, token: &str) -> AppResult<TelegramId>;
}

#[derive(Debug, Clone)]
struct TokenEntry {
    subject: TelegramId,
    expires_at: DateTime<Utc>,
    /// Set on first redemption; the entry answers idempotently until then.
    grace_until: Option<DateTime<Utc>>,
}

/// In-process token store. The DashMap entry lock is the serialization point:
/// two concurrent redemptions of the same fresh token cannot both observe it
/// unconsumed.
pub struct MemoryTokenStore {
    tokens: DashMap<String, TokenEntry>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    fn issue_at(&self, subject: TelegramId, now: DateTime<Utc>) -> String {
        // Bounded hygiene: each issuance sweeps out dead entries, so the map
        // never grows past the issuance rate even if links are never opened.
        self.purge_expired_at(now);

        let token = generate_token();
        self.tokens.insert(
            token.clone(),
            TokenEntry {
                subject,
                expires_at: now + Duration::seconds(TOKEN_TTL_SECS),
                grace_until: None,
            },
        );
        debug!(token_prefix = log_prefix(&token).as_str(), subject, "issued login token");
        token
    }

    fn redeem_at(&self, token: &str, now: DateTime<Utc>) -> AppResult<TelegramId> {
        match self.tokens.entry(token.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if now >= entry.expires_at {
                    occupied.remove();
                    return Err(AppError::TokenExpiredOrInvalid);
                }
                match entry.grace_until {
                    None => {
                        entry.grace_until = Some(now + Duration::seconds(GRACE_WINDOW_SECS));
                        debug!(token_prefix = log_prefix(token).as_str(), "fresh redemption");
                        Ok(entry.subject)
                    }
                    Some(grace_until) if now < grace_until => {
                        debug!(
                            token_prefix = log_prefix(token).as_str(),
                            "grace-window redemption"
                        );
                        Ok(entry.subject)
                    }
                    Some(_) => {
                        occupied.remove();
                        Err(AppError::TokenExpiredOrInvalid)
                    }
                }
            }
            Entry::Vacant(_) => Err(AppError::TokenExpiredOrInvalid),
        }
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, entry| {
            now < entry.expires_at
                && entry.grace_until.map(|g| now < g).unwrap_or(true)
        });
        before.saturating_sub(self.tokens.len())
    }

    /// Drop tokens past expiry or past their grace window.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tokens.len()
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn issue(&self, subject: TelegramId) -> String {
        self.issue_at(subject, Utc::now())
    }

    async fn redeem(&self, token: &str) -> AppResult<TelegramId> {
        self.redeem_at(token, Utc::now())
    }
}

/// Only a short prefix of a token ever reaches the logs.
fn log_prefix(token: &str) -> String {
    token.chars().take(8).collect()
}

/// 32 random bytes, base64url without padding: 43 chars, 256 bits of entropy.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Cheap shape check for tokens arriving in a query string, run before the
/// store is consulted.
pub fn looks_like_login_token(candidate: &str) -> bool {
    (16..=256).contains(&candidate.len())
        && candidate.bytes().all(|b| {
            b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~' | b'=' | b'+' | b'/')
        })
}
