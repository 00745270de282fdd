use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::models::{NotificationRecord, Subscription};
use crate::store::Store;

/// SQLite-backed document store.
///
/// Each subscription is one JSON document row (provider states and seen-key
/// sets included), so a poll cycle's read-modify-write is a single-row
/// replace. The UNIQUE constraint on (subscription_id, listing_key) supplies
/// the atomic create-if-absent for notification records.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(config: &DatabaseConfig) -> crate::Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url = %config.url, "database ready");
        Ok(store)
    }

    async fn migrate(&self) -> crate::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                normalized_keyword TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                doc TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                subscription_id TEXT NOT NULL,
                listing_key TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                UNIQUE(subscription_id, listing_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id, normalized_keyword)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn decode(doc: &str) -> crate::Result<Subscription> {
        Ok(serde_json::from_str(doc)?)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> crate::Result<()> {
        let doc = serde_json::to_string(subscription)?;
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, user_id, normalized_keyword, is_active, doc)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.user_id)
        .bind(&subscription.normalized_keyword)
        .bind(subscription.is_active)
        .bind(doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> crate::Result<Option<Subscription>> {
        let row = sqlx::query("SELECT doc FROM subscriptions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let doc: String = row.try_get("doc")?;
                Ok(Some(Self::decode(&doc)?))
            }
            None => Ok(None),
        }
    }

    async fn find_by_keyword(
        &self,
        user_id: &str,
        normalized_keyword: &str,
    ) -> crate::Result<Option<Subscription>> {
        let row = sqlx::query(
            "SELECT doc FROM subscriptions WHERE user_id = ?1 AND normalized_keyword = ?2",
        )
        .bind(user_id)
        .bind(normalized_keyword)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let doc: String = row.try_get("doc")?;
                Ok(Some(Self::decode(&doc)?))
            }
            None => Ok(None),
        }
    }

    async fn list_active_subscriptions(&self) -> crate::Result<Vec<Subscription>> {
        let rows = sqlx::query("SELECT doc FROM subscriptions WHERE is_active = 1")
            .fetch_all(&self.pool)
            .await?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            let doc: String = row.try_get("doc")?;
            subscriptions.push(Self::decode(&doc)?);
        }
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(subscriptions)
    }

    async fn update_subscription(&self, subscription: &Subscription) -> crate::Result<bool> {
        let doc = serde_json::to_string(subscription)?;
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET user_id = ?2, normalized_keyword = ?3, is_active = ?4, doc = ?5
            WHERE id = ?1
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.user_id)
        .bind(&subscription.normalized_keyword)
        .bind(subscription.is_active)
        .bind(doc)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_subscription(&self, id: &str) -> crate::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM notifications WHERE subscription_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM subscriptions WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_notification_if_absent(
        &self,
        record: &NotificationRecord,
    ) -> crate::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO notifications (id, subscription_id, listing_key, sent_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&record.id)
        .bind(&record.subscription_id)
        .bind(&record.listing_key)
        .bind(record.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_notifications(&self, subscription_id: &str) -> crate::Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM notifications WHERE subscription_id = ?1")
            .bind(subscription_id)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        Ok(count as u64)
    }
}
