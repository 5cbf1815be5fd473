//! Store/load operations for the encrypted seller credential. Shared by the
//! web settings page and the bot commands.

use tracing::warn;

use crate::auth::ott::TelegramId;
use crate::auth::sanitize::sanitize_wb_token;
use crate::crypto::CredentialCipher;
use crate::db::{CredentialRepo, DbPool, UserRepo};
use crate::error::{AppError, AppResult};

/// Sanitize, encrypt and persist a raw API key for the given identity.
pub async fn store_credential(
    pool: &DbPool,
    cipher: &CredentialCipher,
    tg_id: TelegramId,
    raw_secret: &str,
) -> AppResult<()> {
    let normalized = sanitize_wb_token(raw_secret)?;
    let record = cipher.encrypt(&normalized)?;

    let user = UserRepo::get_by_tg_id(pool, tg_id)
        .await?
        .ok_or(AppError::UserNotFound)?;
    CredentialRepo::upsert(pool, user.id, &record).await?;
    Ok(())
}

/// Load and decrypt the stored API key for the given identity. `Ok(None)`
/// means no key has been saved yet.
///
/// A decryption failure is surfaced as `DecryptionAuthFailure`, never mapped
/// to an empty value: a master-key mismatch has to be visible.
pub async fn load_credential(
    pool: &DbPool,
    cipher: &CredentialCipher,
    tg_id: TelegramId,
) -> AppResult<Option<String>> {
    let Some(user) = UserRepo::get_by_tg_id(pool, tg_id).await? else {
        return Ok(None);
    };
    let Some(stored) = CredentialRepo::get_by_user_id(pool, user.id).await? else {
        return Ok(None);
    };

    let plaintext = cipher.decrypt(&stored.encrypted_secret()).map_err(|e| {
        warn!(user_id = user.id, "stored credential failed to decrypt: {e}");
        AppError::from(e)
    })?;
    Ok(Some(plaintext))
}
