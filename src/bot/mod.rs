pub mod commands;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use teloxide::prelude::*;
use tracing::info;

use crate::config::WebConfig;
use crate::web::AppState;
use commands::Command;

/// Per-user cooldown for WB-facing requests, so one tap-happy seller cannot
/// burn the account's rate limit.
pub struct Cooldown {
    last: DashMap<i64, Instant>,
    period: Duration,
}

impl Cooldown {
    pub fn new(period_secs: u64) -> Self {
        Self {
            last: DashMap::new(),
            period: Duration::from_secs(period_secs),
        }
    }

    /// Returns the seconds left to wait, or records the request and allows it.
    pub fn check(&self, tg_id: i64) -> Option<u64> {
        let now = Instant::now();
        if let Some(last) = self.last.get(&tg_id) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.period {
                return Some((self.period - elapsed).as_secs().max(1));
            }
        }
        self.last.insert(tg_id, now);
        None
    }
}

/// Shared data accessible in all bot handlers
pub struct BotContext {
    pub app: AppState,
    pub web: WebConfig,
    pub cooldown: Cooldown,
}

impl BotContext {
    pub fn new(app: AppState, web: WebConfig, cooldown_secs: u64) -> Self {
        Self {
            app,
            web,
            cooldown: Cooldown::new(cooldown_secs),
        }
    }

    /// One-time login URL for the web dashboard.
    pub async fn login_url(&self, tg_id: i64) -> String {
        let token = self.app.tokens.issue(tg_id).await;
        self.web.login_url(&token)
    }
}

/// Run the bot with long polling until shutdown.
pub async fn run(bot: Bot, ctx: Arc<BotContext>) {
    info!("Starting Telegram bot...");

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(commands::handle_command),
        )
        .branch(dptree::endpoint(commands::handle_text));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_allows_first_then_blocks() {
        let cooldown = Cooldown::new(60);
        assert_eq!(cooldown.check(1), None);
        assert!(cooldown.check(1).is_some());
        // Other users are unaffected.
        assert_eq!(cooldown.check(2), None);
    }

    #[test]
    fn test_zero_cooldown_never_blocks() {
        let cooldown = Cooldown::new(0);
        assert_eq!(cooldown.check(1), None);
        assert_eq!(cooldown.check(1), None);
    }
}
