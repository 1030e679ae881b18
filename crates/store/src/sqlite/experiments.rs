use super::{fmt_ts, normalize_ts, parse_ts, store_err, SqliteStore};
use crate::bucketing::bucket;
use crate::store::ExperimentStore;
use chrono::Utc;
use pulse_core::types::{Assignment, Experiment, NewExperiment, VariantConversions};
use pulse_core::{PulseError, PulseResult};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

fn experiment_from_row(row: &SqliteRow) -> PulseResult<Experiment> {
    let id: String = row.try_get("id").map_err(store_err)?;
    let variants: String = row.try_get("variants").map_err(store_err)?;
    let created_at: String = row.try_get("created_at").map_err(store_err)?;
    Ok(Experiment {
        id: Uuid::parse_str(&id)
            .map_err(|e| PulseError::StoreUnavailable(format!("corrupt experiment id: {e}")))?,
        name: row.try_get("name").map_err(store_err)?,
        variants: serde_json::from_str(&variants)?,
        goal_event: row.try_get("goal_event").map_err(store_err)?,
        created_at: parse_ts(&created_at)?,
    })
}

impl SqliteStore {
    async fn require_experiment(&self, id: &Uuid) -> PulseResult<Experiment> {
        self.get_experiment(id)
            .await?
            .ok_or_else(|| PulseError::invalid(format!("unknown experiment id {id}")))
    }
}

#[async_trait::async_trait]
impl ExperimentStore for SqliteStore {
    async fn create_experiment(&self, experiment: NewExperiment) -> PulseResult<Experiment> {
        experiment.validate()?;
        let created = Experiment {
            id: Uuid::new_v4(),
            name: experiment.name,
            variants: experiment.variants,
            goal_event: experiment.goal_event,
            created_at: normalize_ts(Utc::now()),
        };

        sqlx::query(
            r#"
            INSERT INTO experiments (id, name, variants, goal_event, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(created.id.to_string())
        .bind(&created.name)
        .bind(serde_json::to_string(&created.variants)?)
        .bind(&created.goal_event)
        .bind(fmt_ts(created.created_at))
        .execute(self.pool())
        .await
        .map_err(store_err)?;

        info!(
            experiment_id = %created.id,
            name = %created.name,
            variants = created.variants.len(),
            "Experiment created"
        );
        Ok(created)
    }

    async fn get_experiment(&self, id: &Uuid) -> PulseResult<Option<Experiment>> {
        let row = sqlx::query(
            "SELECT id, name, variants, goal_event, created_at FROM experiments WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(store_err)?;
        row.as_ref().map(experiment_from_row).transpose()
    }

    async fn list_experiments(&self) -> PulseResult<Vec<Experiment>> {
        let rows = sqlx::query(
            "SELECT id, name, variants, goal_event, created_at FROM experiments ORDER BY created_at, id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;
        rows.iter().map(experiment_from_row).collect()
    }

    async fn assign_variant(
        &self,
        experiment_id: &Uuid,
        user_id: &str,
    ) -> PulseResult<Assignment> {
        if user_id.trim().is_empty() {
            return Err(PulseError::invalid("user_id must not be empty"));
        }
        let experiment = self.require_experiment(experiment_id).await?;
        let variant = &experiment.variants[bucket(experiment_id, user_id, experiment.variants.len())];

        // The primary key keeps the first assignment if another request won the race.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO assignments (experiment_id, user_id, variant, assigned_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(experiment_id.to_string())
        .bind(user_id)
        .bind(variant)
        .bind(fmt_ts(normalize_ts(Utc::now())))
        .execute(self.pool())
        .await
        .map_err(store_err)?;

        let row = sqlx::query(
            "SELECT variant, assigned_at FROM assignments WHERE experiment_id = ? AND user_id = ?",
        )
        .bind(experiment_id.to_string())
        .bind(user_id)
        .fetch_one(self.pool())
        .await
        .map_err(store_err)?;
        let assigned_at: String = row.try_get("assigned_at").map_err(store_err)?;

        Ok(Assignment {
            experiment_id: *experiment_id,
            user_id: user_id.to_string(),
            variant: row.try_get("variant").map_err(store_err)?,
            assigned_at: parse_ts(&assigned_at)?,
        })
    }

    async fn variant_conversions(
        &self,
        experiment_id: &Uuid,
    ) -> PulseResult<Vec<VariantConversions>> {
        let experiment = self.require_experiment(experiment_id).await?;

        // A conversion is the goal event fired at or after the user's assignment.
        let rows = sqlx::query(
            r#"
            SELECT a.variant AS variant,
                   COUNT(*) AS users,
                   SUM(CASE WHEN EXISTS (
                       SELECT 1 FROM events e
                       WHERE e.user_id = a.user_id
                         AND e.event_name = ?
                         AND e.timestamp >= a.assigned_at
                   ) THEN 1 ELSE 0 END) AS conversions
            FROM assignments a
            WHERE a.experiment_id = ?
            GROUP BY a.variant
            "#,
        )
        .bind(&experiment.goal_event)
        .bind(experiment_id.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;

        let mut counts: HashMap<String, (u64, u64)> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let variant: String = row.try_get("variant").map_err(store_err)?;
            let users: i64 = row.try_get("users").map_err(store_err)?;
            let conversions: Option<i64> = row.try_get("conversions").map_err(store_err)?;
            counts.insert(variant, (users as u64, conversions.unwrap_or(0) as u64));
        }

        Ok(experiment
            .variants
            .iter()
            .map(|variant| {
                let (users, conversions) = counts.get(variant).copied().unwrap_or((0, 0));
                VariantConversions::new(variant.clone(), users, conversions)
            })
            .collect())
    }
}
