use kuzka::{
    auth::{MemoryTokenStore, SessionBinder, TokenStore},
    bot::{self, BotContext},
    config::AppConfig,
    crypto::CredentialCipher,
    db,
    wb::WbClient,
    web::{self, AppState},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging first
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kuzka=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kuzka Seller Bot v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::init()?;
    info!("Configuration loaded");

    // Master keys must parse before anything touches the database.
    let cipher = Arc::new(
        CredentialCipher::from_config(&config.security)
            .map_err(|e| anyhow::anyhow!("Invalid master key configuration: {e}"))?,
    );
    let session_key = cipher
        .session_key()
        .map_err(|e| anyhow::anyhow!("Failed to derive session key: {e}"))?;
    let sessions = Arc::new(SessionBinder::new(
        session_key,
        config.security.session_ttl_hours,
    ));

    // Initialize database
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    info!("Database connected: {}", config.database.url);

    // Run migrations
    db::init_db(&pool).await?;

    let tokens: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    let wb = Arc::new(WbClient::new(&config.wb));

    let state = AppState {
        pool,
        tokens,
        cipher,
        sessions,
        wb,
    };

    // Start web server in background
    let app = web::create_router(state.clone());
    let web_addr = format!("{}:{}", config.web.host, config.web.port);
    let listener = TcpListener::bind(&web_addr).await?;
    info!("Web server listening on http://{}", web_addr);

    let web_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Web server error: {}", e);
        }
    });

    // Start Telegram bot (long polling)
    let bot = Bot::new(&config.telegram.bot_token);
    let ctx = Arc::new(BotContext::new(
        state,
        config.web.clone(),
        config.telegram.cooldown_secs,
    ));
    bot::run(bot, ctx).await;
    info!("Telegram bot shut down");

    web_handle.abort();

    Ok(())
}
