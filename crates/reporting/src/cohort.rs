//! Cohort analysis — retention curves grouped by first-activity period.

use crate::stats::percentage;
use chrono::{DateTime, NaiveDate, Utc};
use pulse_core::types::{Event, Granularity, TimeWindow};
use pulse_core::{PulseError, PulseResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use utoipa::ToSchema;

pub const MAX_PERIODS: u32 = 365;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetentionQuery {
    pub granularity: Granularity,
    pub periods: u32,
    /// Restricts which cohorts are reported, by cohort start.
    #[serde(default)]
    pub window: TimeWindow,
}

impl RetentionQuery {
    pub fn validate(&self) -> PulseResult<()> {
        if self.periods == 0 || self.periods > MAX_PERIODS {
            return Err(PulseError::invalid(format!(
                "periods must be between 1 and {MAX_PERIODS}"
            )));
        }
        self.window.validate()
    }

    fn includes_cohort(&self, cohort_start: NaiveDate) -> bool {
        let after_start = self
            .window
            .start
            .map_or(true, |s| cohort_start >= self.granularity.truncate(s.date_naive()));
        let before_end = self.window.end.map_or(true, |e| cohort_start <= e.date_naive());
        after_start && before_end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CohortRow {
    pub cohort_label: String,
    pub cohort_start: NaiveDate,
    pub cohort_size: u64,
    /// Members active in each period, starting with the defining one.
    pub retained: Vec<u64>,
    /// `retained[k] / cohort_size * 100`; index 0 is always 100.
    pub retention: Vec<f64>,
}

impl CohortRow {
    pub fn from_counts(
        granularity: Granularity,
        cohort_start: NaiveDate,
        cohort_size: u64,
        retained: Vec<u64>,
    ) -> Self {
        let retention = retained
            .iter()
            .map(|&r| percentage(r, cohort_size))
            .collect();
        Self {
            cohort_label: granularity.label(cohort_start),
            cohort_start,
            cohort_size,
            retained,
            retention,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetentionReport {
    pub granularity: Granularity,
    pub periods: u32,
    pub cohorts: Vec<CohortRow>,
    pub computed_at: DateTime<Utc>,
}

/// Group users by the period of their first-ever event and measure how many
/// come back in each following period. `events` must cover each user's full
/// history, or first-seen periods will be wrong.
pub fn analyze_retention(events: &[Event], query: &RetentionQuery) -> PulseResult<RetentionReport> {
    query.validate()?;
    let granularity = query.granularity;

    let mut activity: HashMap<&str, BTreeSet<NaiveDate>> = HashMap::new();
    for event in events {
        activity
            .entry(event.user_id.as_str())
            .or_default()
            .insert(granularity.truncate(event.timestamp.date_naive()));
    }

    // cohort start -> (size, retained per offset)
    let mut cohorts: BTreeMap<NaiveDate, (u64, Vec<u64>)> = BTreeMap::new();
    for periods in activity.values() {
        let Some(&cohort_start) = periods.first() else {
            continue;
        };
        if !query.includes_cohort(cohort_start) {
            continue;
        }
        let entry = cohorts
            .entry(cohort_start)
            .or_insert_with(|| (0, vec![0; query.periods as usize]));
        entry.0 += 1;
        for &period in periods {
            let offset = granularity.periods_between(cohort_start, period);
            if (0..query.periods as i64).contains(&offset) {
                entry.1[offset as usize] += 1;
            }
        }
    }

    let rows = cohorts
        .into_iter()
        .map(|(start, (size, retained))| CohortRow::from_counts(granularity, start, size, retained))
        .collect::<Vec<_>>();

    tracing::debug!(
        cohorts = rows.len(),
        users = activity.len(),
        ?granularity,
        "Retention computed"
    );

    Ok(RetentionReport {
        granularity,
        periods: query.periods,
        cohorts: rows,
        computed_at: Utc::now(),
    })
}
