//! Feature adoption — active-user counts, stickiness, and cumulative adoption
//! for a single feature event.

use crate::stats::percentage;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use pulse_core::types::Event;
use pulse_core::{PulseError, PulseResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use utoipa::ToSchema;

pub const MAX_WINDOW_DAYS: i64 = 366;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdoptionQuery {
    pub event_name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl AdoptionQuery {
    pub fn validate(&self) -> PulseResult<()> {
        if self.event_name.trim().is_empty() {
            return Err(PulseError::invalid("event_name must not be empty"));
        }
        if self.start > self.end {
            return Err(PulseError::invalid(format!(
                "malformed date range: {} is after {}",
                self.start, self.end
            )));
        }
        if (self.end - self.start).num_days() + 1 > MAX_WINDOW_DAYS {
            return Err(PulseError::invalid(format!(
                "adoption window is limited to {MAX_WINDOW_DAYS} days"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AdoptionPoint {
    pub date: NaiveDate,
    pub dau: u64,
    pub wau: u64,
    pub mau: u64,
    /// Users who fired the feature at least once by the end of this day.
    pub adopted_users: u64,
    /// Users known by the end of this day.
    pub total_users: u64,
    pub adoption_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StickinessSnapshot {
    pub date: NaiveDate,
    pub dau: u64,
    pub mau: u64,
    pub stickiness: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdoptionReport {
    pub event_name: String,
    pub series: Vec<AdoptionPoint>,
    pub latest: StickinessSnapshot,
    pub computed_at: DateTime<Utc>,
}

/// DAU / MAU as a percentage; 0 without monthly actives.
pub fn stickiness(dau: u64, mau: u64) -> f64 {
    percentage(dau, mau)
}

/// Build the daily adoption series. `events` should hold every occurrence of
/// the feature event up to `query.end`; `signups` is the creation time of
/// every known user.
pub fn analyze_adoption(
    query: &AdoptionQuery,
    events: &[Event],
    signups: &[DateTime<Utc>],
) -> PulseResult<AdoptionReport> {
    query.validate()?;

    let mut active_days: HashMap<&str, BTreeSet<NaiveDate>> = HashMap::new();
    for event in events {
        let date = event.timestamp.date_naive();
        if event.event_name == query.event_name && date <= query.end {
            active_days
                .entry(event.user_id.as_str())
                .or_default()
                .insert(date);
        }
    }

    let mut first_use = active_days
        .values()
        .filter_map(|days| days.first().copied())
        .collect::<Vec<_>>();
    first_use.sort_unstable();
    let mut joined = signups.iter().map(|ts| ts.date_naive()).collect::<Vec<_>>();
    joined.sort_unstable();

    let active_between = |from: NaiveDate, to: NaiveDate| -> u64 {
        active_days
            .values()
            .filter(|days| days.range(from..=to).next().is_some())
            .count() as u64
    };

    // Trailing windows are clipped at the first representable day.
    let trailing = |day: NaiveDate, days: i64| {
        day.checked_sub_signed(Duration::days(days))
            .unwrap_or(NaiveDate::MIN)
    };

    let mut series = Vec::new();
    let mut next = Some(query.start);
    while let Some(day) = next.filter(|d| *d <= query.end) {
        let adopted = first_use.partition_point(|d| *d <= day) as u64;
        let total = joined.partition_point(|d| *d <= day) as u64;
        series.push(AdoptionPoint {
            date: day,
            dau: active_between(day, day),
            wau: active_between(trailing(day, 6), day),
            mau: active_between(trailing(day, 29), day),
            adopted_users: adopted,
            total_users: total,
            adoption_rate: percentage(adopted, total),
        });
        next = day.succ_opt();
    }

    let latest = series
        .last()
        .map(|p| StickinessSnapshot {
            date: p.date,
            dau: p.dau,
            mau: p.mau,
            stickiness: stickiness(p.dau, p.mau),
        })
        .ok_or_else(|| PulseError::invalid("adoption window is empty"))?;

    tracing::debug!(
        event = %query.event_name,
        days = series.len(),
        adopters = first_use.len(),
        "Adoption computed"
    );

    Ok(AdoptionReport {
        event_name: query.event_name.clone(),
        series,
        latest,
        computed_at: Utc::now(),
    })
}
