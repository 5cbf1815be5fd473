//! Wildberries seller API client.
//!
//! Covers the two endpoints the dashboard and bot need (seller profile and
//! account balance) plus a diagnostics probe. WB publishes tight per-minute
//! rate limits, so balance reads go through a short TTL cache and 429/5xx
//! responses are retried a bounded number of times with backoff.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::WbConfig;
use crate::wb::cache::BalanceCache;

const USER_AGENT_VALUE: &str = "KuzkaSellerBot/1.0 (+wb)";
const BASE_BACKOFF: Duration = Duration::from_millis(400);
const MAX_RETRY_AFTER: Duration = Duration::from_millis(2500);

/// Wildberries API errors
#[derive(Debug, Error)]
pub enum WbError {
    #[error("401 Unauthorized (check API key and scopes)")]
    Unauthorized,

    #[error("429 Too Many Requests (WB rate limit, try again later)")]
    RateLimited,

    #[error("WB returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("WB network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected WB payload: {0}")]
    Payload(String),
}

pub type WbResult<T> = Result<T, WbError>;

/// Seller profile from the common API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default, rename = "tradeMark")]
    pub trade_mark: Option<String>,
}

/// Normalized account balance. WB has shipped at least four shapes for this
/// payload; callers only ever see this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub current: f64,
    pub for_withdraw: f64,
}

/// Outcome of probing one endpoint
#[derive(Debug, Clone, Serialize)]
pub struct Probe {
    pub ok: bool,
    pub ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Live check of the stored API key against both endpoints
#[derive(Debug, Clone, Serialize)]
pub struct PingReport {
    pub seller_info: Probe,
    pub account_balance: Probe,
}

/// Client for the Wildberries seller APIs
pub struct WbClient {
    http: Client,
    common_api_url: String,
    finance_api_url: String,
    max_retries: u32,
    balance_cache: BalanceCache,
}

impl std::fmt::Debug for WbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WbClient")
            .field("common_api_url", &self.common_api_url)
            .field("finance_api_url", &self.finance_api_url)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl WbClient {
    /// Create a new client from config
    pub fn new(config: &WbConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            common_api_url: config.common_api_url.trim_end_matches('/').to_string(),
            finance_api_url: config.finance_api_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            balance_cache: BalanceCache::new(config.balance_cache_ttl_secs),
        }
    }

    /// Seller profile
    pub async fn seller_info(&self, token: &str) -> WbResult<SellerInfo> {
        let url = format!("{}/api/v1/seller-info", self.common_api_url);
        let payload = self.get_json(&url, token).await?;
        serde_json::from_value(payload).map_err(|e| WbError::Payload(e.to_string()))
    }

    /// Account balance, normalized, uncached
    pub async fn account_balance(&self, token: &str) -> WbResult<Balance> {
        let url = format!("{}/api/v1/account/balance", self.finance_api_url);
        let payload = self.get_json(&url, token).await?;
        normalize_balance(&payload)
    }

    /// Account balance through the 60-second cache
    pub async fn account_balance_cached(&self, token: &str) -> WbResult<Balance> {
        if let Some(balance) = self.balance_cache.get(token) {
            debug!("balance served from cache");
            return Ok(balance);
        }
        let balance = self.account_balance(token).await?;
        self.balance_cache.insert(token, balance.clone());
        Ok(balance)
    }

    /// Probe both endpoints concurrently with a live (uncached) balance read.
    pub async fn ping_token(&self, token: &str) -> PingReport {
        async fn probe<T>(fut: impl std::future::Future<Output = WbResult<T>>) -> Probe {
            let started = Instant::now();
            let result = fut.await;
            let ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(_) => Probe {
                    ok: true,
                    ms,
                    error: None,
                },
                Err(e) => Probe {
                    ok: false,
                    ms,
                    error: Some(e.to_string()),
                },
            }
        }

        let (seller_info, account_balance) = tokio::join!(
            probe(self.seller_info(token)),
            probe(self.account_balance(token)),
        );
        PingReport {
            seller_info,
            account_balance,
        }
    }

    fn headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        // WB expects the bare token, no "Bearer" scheme.
        if let Ok(value) = HeaderValue::from_str(token) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers
    }

    /// GET with bounded retries on 429/5xx/network errors. 401 fails fast.
    async fn get_json(&self, url: &str, token: &str) -> WbResult<Value> {
        let mut attempt = 0;
        loop {
            let sent = self
                .http
                .get(url)
                .headers(Self::headers(token))
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    if attempt < self.max_retries {
                        warn!("WB request error, retrying: {e}");
                        tokio::time::sleep(backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(WbError::Network(e));
                }
            };

            let status = response.status();
            match status {
                StatusCode::UNAUTHORIZED => return Err(WbError::Unauthorized),
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt < self.max_retries {
                        let wait = retry_after(&response).unwrap_or_else(|| backoff(attempt));
                        tokio::time::sleep(wait.min(MAX_RETRY_AFTER)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(WbError::RateLimited);
                }
                s if s.is_server_error() => {
                    let body = shorten(&response.text().await.unwrap_or_default());
                    if attempt < self.max_retries {
                        tokio::time::sleep(backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(WbError::Status {
                        status: s.as_u16(),
                        body,
                    });
                }
                s if s.is_client_error() => {
                    let body = shorten(&response.text().await.unwrap_or_default());
                    return Err(WbError::Status {
                        status: s.as_u16(),
                        body,
                    });
                }
                _ => {
                    let payload: Value = response
                        .json()
                        .await
                        .map_err(|e| WbError::Payload(format!("invalid JSON: {e}")))?;
                    return Ok(unwrap_envelope(payload));
                }
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    BASE_BACKOFF * 2u32.pow(attempt)
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<f64>()
        .ok()
        .map(Duration::from_secs_f64)
}

fn shorten(text: &str) -> String {
    const LIMIT: usize = 800;
    if text.len() <= LIMIT {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < LIMIT - 3)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    }
}

/// WB often wraps the useful payload in {"data": {...}}.
fn unwrap_envelope(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) if map.get("data").map(Value::is_object).unwrap_or(false) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn first_present<'a>(payload: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| payload.get(*name).filter(|v| !v.is_null()))
}

fn as_f64(value: &Value) -> WbResult<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| WbError::Payload(format!("non-finite number: {n}"))),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| WbError::Payload(format!("cannot parse number from {s:?}"))),
        other => Err(WbError::Payload(format!("cannot parse number from {other}"))),
    }
}

/// Normalize the various balance payload shapes WB has shipped:
/// `current`/`currentBalance`/`balance`/`total` for the total and
/// `for_withdraw`/`forWithdraw`/`available`/`forWithdrawPresent` for the
/// withdrawable part.
pub fn normalize_balance(payload: &Value) -> WbResult<Balance> {
    let currency = first_present(payload, &["currency"]);
    let current = first_present(payload, &["current", "currentBalance", "balance", "total"]);
    let for_withdraw = first_present(
        payload,
        &["for_withdraw", "forWithdraw", "available", "forWithdrawPresent"],
    );

    let (Some(currency), Some(current), Some(for_withdraw)) = (currency, current, for_withdraw)
    else {
        let keys = match payload.as_object() {
            Some(map) => map.keys().cloned().collect::<Vec<_>>().join(", "),
            None => format!("{payload}"),
        };
        return Err(WbError::Payload(format!(
            "unrecognized balance shape, expected currency/current/for_withdraw, got: {keys}"
        )));
    };

    Ok(Balance {
        currency: currency
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| currency.to_string()),
        current: as_f64(current)?,
        for_withdraw: as_f64(for_withdraw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_snake_case_shape() {
        let b = normalize_balance(&json!({
            "currency": "RUB", "current": 49985.47, "for_withdraw": 0
        }))
        .unwrap();
        assert_eq!(b.currency, "RUB");
        assert_eq!(b.current, 49985.47);
        assert_eq!(b.for_withdraw, 0.0);
    }

    #[test]
    fn test_normalize_camel_case_shapes() {
        let b = normalize_balance(&json!({
            "currency": "RUB", "currentBalance": 100, "forWithdraw": 40
        }))
        .unwrap();
        assert_eq!(b.current, 100.0);
        assert_eq!(b.for_withdraw, 40.0);

        let b = normalize_balance(&json!({
            "currency": "RUB", "balance": "250.5", "forWithdrawPresent": "10"
        }))
        .unwrap();
        assert_eq!(b.current, 250.5);
        assert_eq!(b.for_withdraw, 10.0);

        let b = normalize_balance(&json!({
            "currency": "EUR", "total": 7, "available": 3
        }))
        .unwrap();
        assert_eq!(b.currency, "EUR");
        assert_eq!(b.current, 7.0);
        assert_eq!(b.for_withdraw, 3.0);
    }

    #[test]
    fn test_normalize_rejects_unknown_shape() {
        assert!(normalize_balance(&json!({"foo": 1})).is_err());
        assert!(normalize_balance(&json!({"currency": "RUB", "current": "abc", "for_withdraw": 0})).is_err());
        assert!(normalize_balance(&json!(null)).is_err());
    }

    #[test]
    fn test_unwrap_envelope() {
        let wrapped = json!({"data": {"currency": "RUB"}});
        assert_eq!(unwrap_envelope(wrapped), json!({"currency": "RUB"}));

        let flat = json!({"currency": "RUB"});
        assert_eq!(unwrap_envelope(flat.clone()), flat);

        // Non-object "data" is left alone.
        let listy = json!({"data": [1, 2]});
        assert_eq!(unwrap_envelope(listy.clone()), listy);
    }

    #[test]
    fn test_seller_info_deserializes_loosely() {
        let info: SellerInfo =
            serde_json::from_value(json!({"name": "ООО Ромашка", "sid": "12345", "extra": true}))
                .unwrap();
        assert_eq!(info.name.as_deref(), Some("ООО Ромашка"));
        assert_eq!(info.sid.as_deref(), Some("12345"));
        assert!(info.trade_mark.is_none());
    }

    #[test]
    fn test_shorten_long_body() {
        let long = "x".repeat(2000);
        let short = shorten(&long);
        assert!(short.len() <= 800);
        assert!(short.ends_with("..."));
        assert_eq!(shorten("small"), "small");
    }

    #[test]
    fn test_backoff_growth() {
        assert_eq!(backoff(0), Duration::from_millis(400));
        assert_eq!(backoff(1), Duration::from_millis(800));
        assert_eq!(backoff(2), Duration::from_millis(1600));
    }
}
