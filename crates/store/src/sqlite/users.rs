use super::{fmt_ts, normalize_ts, parse_properties, parse_ts, store_err, SqliteStore};
use crate::store::UserStore;
use chrono::{DateTime, Utc};
use pulse_core::types::{User, UserUpsert};
use pulse_core::{PulseError, PulseResult};
use sqlx::Row;
use tracing::info;

#[async_trait::async_trait]
impl UserStore for SqliteStore {
    async fn upsert_user(&self, user: UserUpsert) -> PulseResult<User> {
        if user.id.trim().is_empty() {
            return Err(PulseError::invalid("user id must not be empty"));
        }
        let now = fmt_ts(normalize_ts(Utc::now()));
        let created_at = user
            .created_at
            .map(|ts| fmt_ts(normalize_ts(ts)))
            .unwrap_or_else(|| now.clone());

        let mut tx = self.pool().begin().await.map_err(store_err)?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT properties FROM users WHERE id = ?")
                .bind(&user.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(store_err)?;
        let mut properties = match existing {
            Some(raw) => parse_properties(&raw)?,
            None => Default::default(),
        };
        properties.extend(user.properties);

        sqlx::query(
            r#"
            INSERT INTO users (id, created_at, last_seen, properties)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                created_at = MIN(users.created_at, excluded.created_at),
                properties = excluded.properties
            "#,
        )
        .bind(&user.id)
        .bind(&created_at)
        .bind(&created_at)
        .bind(serde_json::to_string(&properties)?)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;

        self.get_user(&user.id)
            .await?
            .ok_or_else(|| PulseError::StoreUnavailable(format!("user {} vanished", user.id)))
    }

    async fn get_user(&self, user_id: &str) -> PulseResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, created_at, last_seen, properties FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at: String = row.try_get("created_at").map_err(store_err)?;
        let last_seen: String = row.try_get("last_seen").map_err(store_err)?;
        let properties: String = row.try_get("properties").map_err(store_err)?;
        Ok(Some(User {
            id: row.try_get("id").map_err(store_err)?,
            created_at: parse_ts(&created_at)?,
            last_seen: parse_ts(&last_seen)?,
            properties: parse_properties(&properties)?,
        }))
    }

    async fn first_event_timestamp(&self, user_id: &str) -> PulseResult<Option<DateTime<Utc>>> {
        let first: Option<String> =
            sqlx::query_scalar("SELECT MIN(timestamp) FROM events WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(self.pool())
                .await
                .map_err(store_err)?;
        first.as_deref().map(parse_ts).transpose()
    }

    async fn user_signups(&self) -> PulseResult<Vec<DateTime<Utc>>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT created_at FROM users")
            .fetch_all(self.pool())
            .await
            .map_err(store_err)?;
        rows.iter().map(|raw| parse_ts(raw)).collect()
    }

    async fn erase_user(&self, user_id: &str) -> PulseResult<bool> {
        let mut tx = self.pool().begin().await.map_err(store_err)?;

        let events = sqlx::query("DELETE FROM events WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?
            .rows_affected();
        sqlx::query("DELETE FROM assignments WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        let users = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?
            .rows_affected();

        tx.commit().await.map_err(store_err)?;

        if users > 0 {
            info!(user_id, events, "User erased");
        }
        Ok(users > 0)
    }
}
