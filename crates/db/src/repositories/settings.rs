use chrono::{DateTime, Utc};
use sqlx::Row;

use super::codec::encode_ts;
use super::{RepositoryError, SettingsRepository};
use crate::DbPool;

pub struct SqlSettingsRepository {
    pool: DbPool,
}

impl SqlSettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SettingsRepository for SqlSettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM setting WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO setting (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(encode_ts(now))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::SqlSettingsRepository;
    use crate::migrations;
    use crate::repositories::SettingsRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let url = format!("sqlite:file:{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let pool = connect_with_settings(&url, 2, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[tokio::test]
    async fn get_set_round_trip_with_upsert() {
        let pool = setup_pool().await;
        let repo = SqlSettingsRepository::new(pool.clone());

        assert_eq!(repo.get("overlap_guard.enabled").await.expect("get missing"), None);

        repo.set("overlap_guard.enabled", "false", Utc::now()).await.expect("set");
        assert_eq!(
            repo.get("overlap_guard.enabled").await.expect("get"),
            Some("false".to_string())
        );

        repo.set("overlap_guard.enabled", "true", Utc::now()).await.expect("overwrite");
        assert_eq!(
            repo.get("overlap_guard.enabled").await.expect("get"),
            Some("true".to_string())
        );

        pool.close().await;
    }
}
