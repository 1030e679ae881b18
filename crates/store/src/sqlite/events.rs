use super::{fmt_ts, normalize_ts, parse_properties, parse_ts, store_err, SqliteStore};
use crate::store::EventStore;
use chrono::Utc;
use pulse_core::types::{Event, EventFilter, EventNameCount, NewEvent, TimeWindow};
use pulse_core::PulseResult;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use tracing::debug;
use uuid::Uuid;

impl SqliteStore {
    /// Insert one event and touch its user, inside the caller's transaction.
    async fn insert_event(conn: &mut SqliteConnection, new: NewEvent) -> PulseResult<Event> {
        new.validate()?;
        let event = Event {
            id: Uuid::new_v4(),
            event_name: new.event_name,
            user_id: new.user_id,
            timestamp: normalize_ts(new.timestamp.unwrap_or_else(Utc::now)),
            properties: new.properties,
        };
        let ts = fmt_ts(event.timestamp);

        sqlx::query(
            r#"
            INSERT INTO events (id, event_name, user_id, timestamp, properties)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.event_name)
        .bind(&event.user_id)
        .bind(&ts)
        .bind(serde_json::to_string(&event.properties)?)
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;

        // created_at only ever moves earlier, last_seen only later.
        sqlx::query(
            r#"
            INSERT INTO users (id, created_at, last_seen, properties)
            VALUES (?, ?, ?, '{}')
            ON CONFLICT(id) DO UPDATE SET
                created_at = MIN(users.created_at, excluded.created_at),
                last_seen = MAX(users.last_seen, excluded.last_seen)
            "#,
        )
        .bind(&event.user_id)
        .bind(&ts)
        .bind(&ts)
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;

        Ok(event)
    }
}

fn window_clause(qb: &mut QueryBuilder<'_, Sqlite>, window: &TimeWindow) {
    if let Some(start) = window.start {
        qb.push(" AND timestamp >= ").push_bind(fmt_ts(start));
    }
    if let Some(end) = window.end {
        qb.push(" AND timestamp <= ").push_bind(fmt_ts(end));
    }
}

fn event_from_row(row: &SqliteRow) -> PulseResult<Event> {
    let id: String = row.try_get("id").map_err(store_err)?;
    let timestamp: String = row.try_get("timestamp").map_err(store_err)?;
    let properties: String = row.try_get("properties").map_err(store_err)?;
    Ok(Event {
        id: Uuid::parse_str(&id)
            .map_err(|e| pulse_core::PulseError::StoreUnavailable(format!("corrupt id: {e}")))?,
        event_name: row.try_get("event_name").map_err(store_err)?,
        user_id: row.try_get("user_id").map_err(store_err)?,
        timestamp: parse_ts(&timestamp)?,
        properties: parse_properties(&properties)?,
    })
}

#[async_trait::async_trait]
impl EventStore for SqliteStore {
    async fn record_event(&self, event: NewEvent) -> PulseResult<Event> {
        event.validate()?;
        let mut tx = self.pool().begin().await.map_err(store_err)?;
        let stored = Self::insert_event(&mut tx, event).await?;
        tx.commit().await.map_err(store_err)?;
        debug!(event = %stored.event_name, user_id = %stored.user_id, "Event recorded");
        Ok(stored)
    }

    async fn record_events(&self, events: Vec<NewEvent>) -> PulseResult<Vec<Event>> {
        for event in &events {
            event.validate()?;
        }
        let mut tx = self.pool().begin().await.map_err(store_err)?;
        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            stored.push(Self::insert_event(&mut tx, event).await?);
        }
        tx.commit().await.map_err(store_err)?;
        debug!(count = stored.len(), "Event batch recorded");
        Ok(stored)
    }

    async fn query_events(
        &self,
        filter: &EventFilter,
        window: &TimeWindow,
    ) -> PulseResult<Vec<Event>> {
        window.validate()?;
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, event_name, user_id, timestamp, properties FROM events WHERE 1 = 1",
        );
        if let Some(names) = &filter.event_names {
            if names.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" AND event_name IN (");
            let mut list = qb.separated(", ");
            for name in names {
                list.push_bind(name.clone());
            }
            list.push_unseparated(")");
        }
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id.clone());
        }
        window_clause(&mut qb, window);
        qb.push(" ORDER BY user_id, timestamp, seq");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(store_err)?;
        rows.iter().map(event_from_row).collect()
    }

    async fn distinct_users(&self, event_name: &str, window: &TimeWindow) -> PulseResult<u64> {
        window.validate()?;
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(DISTINCT user_id) FROM events WHERE event_name = ",
        );
        qb.push_bind(event_name.to_string());
        window_clause(&mut qb, window);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(store_err)?;
        Ok(count.max(0) as u64)
    }

    async fn event_names(&self) -> PulseResult<Vec<EventNameCount>> {
        let rows = sqlx::query(
            r#"
            SELECT event_name, COUNT(*) AS events, COUNT(DISTINCT user_id) AS users
            FROM events
            GROUP BY event_name
            ORDER BY events DESC, event_name
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let events: i64 = row.try_get("events").map_err(store_err)?;
                let users: i64 = row.try_get("users").map_err(store_err)?;
                Ok(EventNameCount {
                    event_name: row.try_get("event_name").map_err(store_err)?,
                    events: events as u64,
                    users: users as u64,
                })
            })
            .collect()
    }

    async fn ping(&self) -> PulseResult<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_store;
    use super::*;
    use crate::store::UserStore;
    use chrono::{Duration, TimeZone};
    use pulse_core::PulseError;

    fn t(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_record_and_query_events() {
        let (store, _dir) = temp_store().await;
        store.record_event(NewEvent::new("signup", "u1").at(t(1))).await.unwrap();
        store.record_event(NewEvent::new("login", "u1").at(t(3))).await.unwrap();
        store.record_event(NewEvent::new("signup", "u2").at(t(2))).await.unwrap();

        let all = store
            .query_events(&EventFilter::default(), &TimeWindow::unbounded())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].user_id, "u1");
        assert_eq!(all[1].event_name, "login");

        let signups = store
            .query_events(&EventFilter::named(["signup"]), &TimeWindow::unbounded())
            .await
            .unwrap();
        assert_eq!(signups.len(), 2);

        let window = TimeWindow::new(Some(t(2)), Some(t(3))).unwrap();
        let windowed = store.query_events(&EventFilter::default(), &window).await.unwrap();
        assert_eq!(windowed.len(), 2);
    }

    #[tokio::test]
    async fn test_distinct_users_respects_window() {
        let (store, _dir) = temp_store().await;
        for (user, hour) in [("a", 1), ("a", 2), ("b", 5), ("c", 9)] {
            store.record_event(NewEvent::new("view", user).at(t(hour))).await.unwrap();
        }
        let all = store.distinct_users("view", &TimeWindow::unbounded()).await.unwrap();
        assert_eq!(all, 3);
        let early = TimeWindow::new(None, Some(t(5))).unwrap();
        assert_eq!(store.distinct_users("view", &early).await.unwrap(), 2);
        assert_eq!(store.distinct_users("buy", &early).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recording_event_maintains_user() {
        let (store, _dir) = temp_store().await;
        store.record_event(NewEvent::new("view", "u1").at(t(5))).await.unwrap();
        store.record_event(NewEvent::new("view", "u1").at(t(2))).await.unwrap();
        store.record_event(NewEvent::new("view", "u1").at(t(8))).await.unwrap();

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.created_at, t(2));
        assert_eq!(user.last_seen, t(8));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let (store, _dir) = temp_store().await;
        let batch = vec![NewEvent::new("view", "u1"), NewEvent::new("", "u2")];
        let err = store.record_events(batch).await.unwrap_err();
        assert!(matches!(err, PulseError::InvalidInput(_)));
        let names = store.event_names().await.unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn test_event_names_counts() {
        let (store, _dir) = temp_store().await;
        let base = t(0);
        let batch = (0..4)
            .map(|i| NewEvent::new("view", format!("u{}", i % 2)).at(base + Duration::minutes(i)))
            .chain(std::iter::once(NewEvent::new("buy", "u0").at(base)))
            .collect();
        store.record_events(batch).await.unwrap();

        let names = store.event_names().await.unwrap();
        assert_eq!(
            names[0],
            EventNameCount {
                event_name: "view".into(),
                events: 4,
                users: 2
            }
        );
        assert_eq!(names[1].event_name, "buy");
    }

    #[tokio::test]
    async fn test_query_rejects_inverted_window() {
        let (store, _dir) = temp_store().await;
        let window = TimeWindow {
            start: Some(t(5)),
            end: Some(t(1)),
        };
        let err = store
            .query_events(&EventFilter::default(), &window)
            .await
            .unwrap_err();
        assert!(matches!(err, PulseError::InvalidInput(_)));
    }
}
