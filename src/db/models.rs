use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::crypto::EncryptedSecret;

/// A seller identified by their Telegram account
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub tg_id: i64,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Encrypted Wildberries API key owned by a user. Plaintext never touches
/// this table; decryption needs the master key matching `key_version`.
#[derive(Debug, Clone, FromRow)]
pub struct UserCredential {
    pub id: i64,
    pub user_id: i64,
    pub key_version: i32,
    pub ciphertext: String,
    pub salt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserCredential {
    /// View of the row the cipher understands.
    pub fn encrypted_secret(&self) -> EncryptedSecret {
        EncryptedSecret {
            ciphertext: self.ciphertext.clone(),
            salt: self.salt.clone(),
            key_version: self.key_version,
        }
    }
}
