//! End-to-end flow: bot issues a one-time token, the web layer redeems it,
//! a signed session is bound, and the credential round-trips through
//! sanitize → encrypt → persist → decrypt.

use kuzka::auth::{
    load_credential, store_credential, MemoryTokenStore, SessionBinder, TokenStore,
};
use kuzka::crypto::{CredentialCipher, Keyring, MasterKey};
use kuzka::db::{self, CredentialRepo, DbPool, UserRepo};
use kuzka::error::AppError;
use sqlx::sqlite::SqlitePoolOptions;

async fn test_pool() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    db::init_db(&pool).await.expect("migrations");
    pool
}

fn test_cipher(key_byte: u8) -> CredentialCipher {
    CredentialCipher::new(Keyring::new(1, MasterKey::from_bytes([key_byte; 32])))
}

#[tokio::test]
async fn login_bridge_full_flow() {
    let pool = test_pool().await;
    let cipher = test_cipher(7);
    let store = MemoryTokenStore::new();
    let binder = SessionBinder::new([1u8; 32], 12);

    // Bot side: issue a login token for a Telegram identity.
    let token = store.issue(777).await;

    // Web side: first redemption binds the identity...
    let tg_id = store.redeem(&token).await.unwrap();
    assert_eq!(tg_id, 777);

    // ...and a double-clicked link inside the grace window still works.
    assert_eq!(store.redeem(&token).await.unwrap(), 777);

    // The user row appears on first login.
    let user = UserRepo::ensure(&pool, tg_id).await.unwrap();
    assert_eq!(user.tg_id, 777);
    assert_eq!(user.role, "user");

    // Session cookie round-trip.
    let session = binder.bind(tg_id);
    assert_eq!(binder.verify(&session).unwrap(), 777);

    // Settings page: a pasted key with artifacts is normalized and stored
    // encrypted.
    store_credential(&pool, &cipher, tg_id, "Bearer  \"abc.def.ghi\"")
        .await
        .unwrap();

    let stored = CredentialRepo::get_by_user_id(&pool, user.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(stored.ciphertext, "abc.def.ghi");
    assert_eq!(stored.key_version, 1);

    // Downstream callers get the plaintext back.
    let plaintext = load_credential(&pool, &cipher, tg_id).await.unwrap();
    assert_eq!(plaintext.as_deref(), Some("abc.def.ghi"));
}

#[tokio::test]
async fn redeemed_token_has_no_third_life() {
    let store = MemoryTokenStore::new();
    let missing = store.redeem("never-issued-token-value").await;
    assert!(matches!(missing, Err(AppError::TokenExpiredOrInvalid)));
}

#[tokio::test]
async fn malformed_credential_never_reaches_storage() {
    let pool = test_pool().await;
    let cipher = test_cipher(7);
    let user = UserRepo::ensure(&pool, 555).await.unwrap();

    let result = store_credential(&pool, &cipher, 555, "not-a-jwt").await;
    assert!(matches!(result, Err(AppError::CredentialMalformed)));

    assert!(CredentialRepo::get_by_user_id(&pool, user.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn rotated_master_key_fails_closed() {
    let pool = test_pool().await;
    let cipher = test_cipher(7);
    UserRepo::ensure(&pool, 888).await.unwrap();

    store_credential(&pool, &cipher, 888, "abc.def.ghi")
        .await
        .unwrap();

    // Same key version, different master key: the record must surface an
    // explicit decryption failure, not garbage or an empty value.
    let rotated = test_cipher(9);
    let result = load_credential(&pool, &rotated, 888).await;
    assert!(matches!(result, Err(AppError::DecryptionAuthFailure)));

    // The original key still works.
    let plaintext = load_credential(&pool, &cipher, 888).await.unwrap();
    assert_eq!(plaintext.as_deref(), Some("abc.def.ghi"));
}

#[tokio::test]
async fn credential_is_optional_for_a_session() {
    let pool = test_pool().await;
    let cipher = test_cipher(7);
    let store = MemoryTokenStore::new();
    let binder = SessionBinder::new([1u8; 32], 12);

    let token = store.issue(999).await;
    let tg_id = store.redeem(&token).await.unwrap();
    UserRepo::ensure(&pool, tg_id).await.unwrap();

    // A session exists without any credential; the lookup reports "none"
    // rather than failing.
    assert!(binder.verify(&binder.bind(tg_id)).is_ok());
    assert_eq!(load_credential(&pool, &cipher, tg_id).await.unwrap(), None);
}
