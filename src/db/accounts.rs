//! Postgres-backed account registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::model::{ChatId, TrackedAccount, mute_deadline};
use crate::registry::AccountRegistry;
use crate::telemetry::metrics;

type AccountRow = (String, i32, Option<DateTime<Utc>>);

fn account_from_row((key, rating, mute_until): AccountRow) -> TrackedAccount {
    TrackedAccount {
        key,
        rating,
        mute_until,
    }
}

fn record(operation: &'static str) {
    metrics::registry_operations().add(1, &[KeyValue::new("operation", operation)]);
}

#[async_trait]
impl AccountRegistry for super::Db {
    async fn list_tracked(&self) -> Result<Vec<TrackedAccount>> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            "SELECT user_name, rating, mute_until FROM redditors ORDER BY user_name",
        )
        .fetch_all(&self.pool)
        .await?;
        record("list");
        Ok(rows.into_iter().map(account_from_row).collect())
    }

    async fn get(&self, key: &str) -> Result<Option<TrackedAccount>> {
        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT user_name, rating, mute_until FROM redditors WHERE user_name = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        record("get");
        Ok(row.map(account_from_row))
    }

    async fn is_muted(&self, key: &str) -> Result<bool> {
        let muted: Option<(bool,)> = sqlx::query_as(
            "SELECT COALESCE(mute_until > now(), false) FROM redditors WHERE user_name = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        record("is_muted");
        Ok(muted.is_some_and(|(m,)| m))
    }

    async fn add(&self, account: &TrackedAccount) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO redditors (user_name, rating, mute_until) VALUES ($1, $2, $3)
             ON CONFLICT (user_name) DO NOTHING",
        )
        .bind(&account.key)
        .bind(account.rating)
        .bind(account.mute_until)
        .execute(&self.pool)
        .await?;
        record("add");
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM redditors WHERE user_name = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        record("remove");
        Ok(result.rows_affected() > 0)
    }

    async fn mute(&self, key: &str, days: i64) -> Result<Option<DateTime<Utc>>> {
        let until = mute_deadline(Utc::now(), days)
            .ok_or_else(|| Error::Other(format!("mute of {days} days is out of range")))?;
        let result = sqlx::query("UPDATE redditors SET mute_until = $1 WHERE user_name = $2")
            .bind(until)
            .bind(key)
            .execute(&self.pool)
            .await?;
        record("mute");
        Ok((result.rows_affected() > 0).then_some(until))
    }

    async fn unmute(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE redditors SET mute_until = NULL WHERE user_name = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        record("unmute");
        Ok(result.rows_affected() > 0)
    }

    async fn adjust_rating(&self, key: &str, delta: i32) -> Result<Option<i32>> {
        let row: Option<(i32,)> = sqlx::query_as(
            "UPDATE redditors SET rating = rating + $1 WHERE user_name = $2 RETURNING rating",
        )
        .bind(delta)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        record("adjust_rating");
        Ok(row.map(|(rating,)| rating))
    }

    async fn destinations(&self) -> Result<Vec<ChatId>> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT chat_id FROM chats ORDER BY chat_id")
            .fetch_all(&self.pool)
            .await?;
        record("destinations");
        Ok(rows.into_iter().map(|(id,)| ChatId(id)).collect())
    }

    async fn add_destination(&self, chat: ChatId, name: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO chats (chat_id, name) VALUES ($1, $2) ON CONFLICT (chat_id) DO NOTHING",
        )
        .bind(chat.0)
        .bind(name)
        .execute(&self.pool)
        .await?;
        record("add_destination");
        Ok(result.rows_affected() > 0)
    }

    async fn remove_destination(&self, chat: ChatId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chats WHERE chat_id = $1")
            .bind(chat.0)
            .execute(&self.pool)
            .await?;
        record("remove_destination");
        Ok(result.rows_affected() > 0)
    }

    async fn update_offset(&self) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT update_offset FROM update_offsets ORDER BY id DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map_or(0, |(offset,)| offset))
    }

    async fn save_update_offset(&self, offset: i64) -> Result<()> {
        sqlx::query("INSERT INTO update_offsets (update_offset) VALUES ($1)")
            .bind(offset)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
