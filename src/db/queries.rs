use crate::crypto::EncryptedSecret;
use crate::db::models::*;
use crate::error::AppResult;
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::info;

pub type DbPool = Pool<Sqlite>;

/// Database operations for users
pub struct UserRepo;

impl UserRepo {
    /// Get a user by Telegram id
    pub async fn get_by_tg_id(pool: &DbPool, tg_id: i64) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE tg_id = ?")
            .bind(tg_id)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }

    /// Create the user on first login, stamp `last_login_at` on every login.
    pub async fn ensure(pool: &DbPool, tg_id: i64) -> AppResult<User> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (tg_id, role, created_at, last_login_at)
            VALUES (?, 'user', ?, ?)
            ON CONFLICT(tg_id) DO UPDATE SET
                last_login_at = excluded.last_login_at
            "#,
        )
        .bind(tg_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get_by_tg_id(pool, tg_id)
            .await?
            .ok_or_else(|| crate::error::AppError::internal("Failed to retrieve created user"))
    }
}

/// Database operations for encrypted credentials
pub struct CredentialRepo;

impl CredentialRepo {
    /// Get the credential row for a user
    pub async fn get_by_user_id(pool: &DbPool, user_id: i64) -> AppResult<Option<UserCredential>> {
        let cred = sqlx::query_as::<_, UserCredential>(
            "SELECT * FROM user_credentials WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(cred)
    }

    /// Insert or replace the user's encrypted credential
    pub async fn upsert(pool: &DbPool, user_id: i64, record: &EncryptedSecret) -> AppResult<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO user_credentials (user_id, key_version, ciphertext, salt, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                key_version = excluded.key_version,
                ciphertext = excluded.ciphertext,
                salt = excluded.salt,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(record.key_version)
        .bind(&record.ciphertext)
        .bind(&record.salt)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Drop the user's credential
    pub async fn delete(pool: &DbPool, user_id: i64) -> AppResult<()> {
        sqlx::query("DELETE FROM user_credentials WHERE user_id = ?")
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
pub async fn setup_test_db() -> DbPool {
    use sqlx::sqlite::SqlitePoolOptions;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    init_db(&pool).await.expect("Failed to init database");
    pool
}

/// Initialize database with migrations
pub async fn init_db(pool: &DbPool) -> AppResult<()> {
    info!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tg_id BIGINT UNIQUE NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            created_at DATETIME NOT NULL,
            last_login_at DATETIME
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_credentials (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER UNIQUE NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            key_version INTEGER NOT NULL DEFAULT 1,
            ciphertext TEXT NOT NULL,
            salt TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_tg_id ON users(tg_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_credentials_user ON user_credentials(user_id)")
        .execute(pool)
        .await?;

    info!("Database migrations complete");
    Ok(())
}
