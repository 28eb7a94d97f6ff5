//! SQLite-backed [`KeyValueStore`] implementation.
//!
//! Maps each [`KeyValueStore`] operation onto the `kv` table created by
//! [`crate::migrate`]. `SQLITE_FULL` is reported as
//! [`StoreError::QuotaExceeded`] so callers can treat a full disk the same
//! way as any other exhausted storage quota.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use novel_lens_core::store::{KeyValueStore, StoreError};

use crate::config::Config;
use crate::{db, migrate};

const PROBE_KEY: &str = "__nlens_probe__";
const SQLITE_FULL: &str = "13";

/// SQLite implementation of the [`KeyValueStore`] trait.
pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Connect to the configured database and make sure the schema exists.
pub async fn open(config: &Config) -> anyhow::Result<SqliteKvStore> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(SqliteKvStore::new(pool))
}

fn map_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(SQLITE_FULL) => {
            StoreError::QuotaExceeded
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn probe(&self) -> bool {
        if self.set(PROBE_KEY, "test").await.is_err() {
            return false;
        }
        self.remove(PROBE_KEY).await.is_ok()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // substr() rather than LIKE so '_' and '%' in prefixes match literally
        let rows = sqlx::query("SELECT key FROM kv WHERE substr(key, 1, length(?)) = ? ORDER BY key")
            .bind(prefix)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(rows.iter().map(|r| r.get::<String, _>("key")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> SqliteKvStore {
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("kv.sqlite");
        open(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_set_get_overwrite_remove() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        assert!(s.probe().await);

        assert_eq!(s.get("a").await.unwrap(), None);
        s.set("a", "1").await.unwrap();
        s.set("a", "2").await.unwrap();
        assert_eq!(s.get("a").await.unwrap().as_deref(), Some("2"));

        s.remove("a").await.unwrap();
        assert_eq!(s.get("a").await.unwrap(), None);
        s.remove("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_match_prefix_literally() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        s.set("geminiAssessment_2", "{}").await.unwrap();
        s.set("geminiAssessment_1", "{}").await.unwrap();
        s.set("geminiAssessmentX1", "{}").await.unwrap();
        s.set("setting.geminiModel", "m").await.unwrap();

        assert_eq!(
            s.keys("geminiAssessment_").await.unwrap(),
            vec!["geminiAssessment_1", "geminiAssessment_2"]
        );
    }

    #[tokio::test]
    async fn test_probe_leaves_no_trace() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        assert!(s.probe().await);
        assert!(s.keys("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_pool_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        s.pool().close().await;
        assert!(!s.probe().await);
        assert!(matches!(s.get("a").await, Err(StoreError::Unavailable(_))));
    }
}
