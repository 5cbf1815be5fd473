use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Telegram bot configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// Bot API token from @BotFather
    pub bot_token: String,
    /// Per-user cooldown for balance/analytics requests
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    20
}

/// Web server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used for login links
    pub public_base_url: String,
}

impl WebConfig {
    /// Build the one-time login URL handed out by the bot.
    pub fn login_url(&self, token: &str) -> String {
        format!(
            "{}/login/tg?token={}",
            self.public_base_url.trim_end_matches('/'),
            token
        )
    }
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Master-key material for the credential cipher and session signing.
///
/// `master_key` is the current key ("base64:<urlsafe-b64>" or bare base64,
/// decoding to 32 bytes). `previous_keys` maps older key versions to their
/// keys so records written before a rotation stay readable while sellers
/// re-enter secrets at their own pace.
#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub master_key: String,
    #[serde(default = "default_key_version")]
    pub key_version: i32,
    #[serde(default)]
    pub previous_keys: HashMap<i32, String>,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
}

fn default_key_version() -> i32 {
    1
}

fn default_session_ttl_hours() -> i64 {
    12
}

/// Wildberries API endpoints and client tuning
#[derive(Debug, Deserialize, Clone)]
pub struct WbConfig {
    #[serde(default = "default_common_api_url")]
    pub common_api_url: String,
    #[serde(default = "default_finance_api_url")]
    pub finance_api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Balance responses are cached this long to respect WB rate limits
    #[serde(default = "default_balance_cache_ttl_secs")]
    pub balance_cache_ttl_secs: u64,
}

fn default_common_api_url() -> String {
    "https://common-api.wildberries.ru".to_string()
}

fn default_finance_api_url() -> String {
    "https://finance-api.wildberries.ru".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_max_retries() -> u32 {
    2
}

fn default_balance_cache_ttl_secs() -> u64 {
    60
}

impl Default for WbConfig {
    fn default() -> Self {
        Self {
            common_api_url: default_common_api_url(),
            finance_api_url: default_finance_api_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            balance_cache_ttl_secs: default_balance_cache_ttl_secs(),
        }
    }
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub web: WebConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub wb: WbConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default config file
            .add_source(File::with_name("config/default").required(false))
            // Override with local config if present
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (prefix: KUZKA_)
            // e.g., KUZKA_TELEGRAM__BOT_TOKEN, KUZKA_SECURITY__MASTER_KEY
            .add_source(
                Environment::with_prefix("KUZKA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Initialize the global config singleton
    pub fn init() -> Result<&'static Self, ConfigError> {
        let config = Self::load()?;
        Ok(CONFIG.get_or_init(|| config))
    }

    /// Get reference to the global config
    pub fn get() -> &'static Self {
        CONFIG
            .get()
            .expect("Config not initialized. Call AppConfig::init() first.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_url_trailing_slash() {
        let web = WebConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_base_url: "https://bot.example.com/".to_string(),
        };
        assert_eq!(
            web.login_url("abc123"),
            "https://bot.example.com/login/tg?token=abc123"
        );
    }

    #[test]
    fn test_wb_config_defaults() {
        let wb = WbConfig::default();
        assert_eq!(wb.common_api_url, "https://common-api.wildberries.ru");
        assert_eq!(wb.balance_cache_ttl_secs, 60);
        assert_eq!(wb.max_retries, 2);
    }
}
