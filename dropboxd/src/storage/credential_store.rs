use std::{fs, path::PathBuf};

use sqlx::{Row, SqlitePool, sqlite::SqliteConnectOptions};
use thiserror::Error;
use time::OffsetDateTime;

const STORAGE_DIR: &str = "dropboxd";
const DB_FILENAME: &str = "credentials.db";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS credentials (
        identity TEXT PRIMARY KEY NOT NULL,
        refresh_token TEXT,
        access_token TEXT,
        payload TEXT,
        updated_at INTEGER NOT NULL
    );
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("stored payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Durable credential for one user, keyed by e-mail.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    pub identity: String,
    pub refresh_token: Option<String>,
    /// Access token issued alongside the refresh token; never used for calls.
    pub access_token: Option<String>,
    /// Raw token exchange response, kept for diagnostics.
    pub payload: Option<serde_json::Value>,
    pub updated_at: i64,
}

impl CredentialRecord {
    pub fn new(identity: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            refresh_token: Some(refresh_token.into()),
            access_token: None,
            payload: None,
            updated_at: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, StoreError> {
        let db_path = default_db_path()?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn find(&self, identity: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT identity, refresh_token, access_token, payload, updated_at FROM credentials WHERE identity = ?1",
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: Option<String> = row.try_get("payload")?;
        let payload = payload
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;
        Ok(Some(CredentialRecord {
            identity: row.try_get("identity")?,
            refresh_token: row.try_get("refresh_token")?,
            access_token: row.try_get("access_token")?,
            payload,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// Inserts or replaces the record for `record.identity`.
    pub async fn upsert(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let payload = record
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "
            INSERT INTO credentials (identity, refresh_token, access_token, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(identity) DO UPDATE SET
                refresh_token = excluded.refresh_token,
                access_token = excluded.access_token,
                payload = excluded.payload,
                updated_at = excluded.updated_at;
            ",
        )
        .bind(&record.identity)
        .bind(&record.refresh_token)
        .bind(&record.access_token)
        .bind(payload)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns whether a record was removed.
    pub async fn delete(&self, identity: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM credentials WHERE identity = ?1")
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[cfg(test)]
    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}

fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push(STORAGE_DIR);
    path.push(DB_FILENAME);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn make_store() -> CredentialStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = CredentialStore::from_pool(pool);
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn find_returns_none_for_unknown_identity() {
        let store = make_store().await;
        assert!(store.find("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_then_find_roundtrips_payload() {
        let store = make_store().await;
        let mut record = CredentialRecord::new("user@example.com", "refresh-1");
        record.payload = Some(json!({ "account_id": "dbid:1", "scope": "files.content.read" }));

        store.upsert(&record).await.unwrap();
        let found = store.find("user@example.com").await.unwrap().unwrap();

        assert_eq!(found, record);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_identity() {
        let store = make_store().await;
        store
            .upsert(&CredentialRecord::new("user@example.com", "refresh-1"))
            .await
            .unwrap();
        store
            .upsert(&CredentialRecord::new("user@example.com", "refresh-2"))
            .await
            .unwrap();

        let found = store.find("user@example.com").await.unwrap().unwrap();
        assert_eq!(found.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn delete_reports_whether_record_existed() {
        let store = make_store().await;
        store
            .upsert(&CredentialRecord::new("user@example.com", "refresh-1"))
            .await
            .unwrap();

        assert!(store.delete("user@example.com").await.unwrap());
        assert!(!store.delete("user@example.com").await.unwrap());
        assert!(store.find("user@example.com").await.unwrap().is_none());
    }

    #[test]
    fn blank_refresh_token_does_not_count() {
        let mut record = CredentialRecord::new("user@example.com", "  ");
        assert!(!record.has_refresh_token());
        record.refresh_token = None;
        assert!(!record.has_refresh_token());
    }
}
