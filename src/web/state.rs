use std::sync::Arc;

use crate::auth::{SessionBinder, TokenStore};
use crate::crypto::CredentialCipher;
use crate::db::DbPool;
use crate::wb::WbClient;

/// Shared state for web handlers and bot commands.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub tokens: Arc<dyn TokenStore>,
    pub cipher: Arc<CredentialCipher>,
    pub sessions: Arc<SessionBinder>,
    pub wb: Arc<WbClient>,
}
