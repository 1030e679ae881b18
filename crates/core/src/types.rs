use crate::error::{PulseError, PulseResult};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// Free-form JSON properties attached to events and users.
pub type Properties = HashMap<String, serde_json::Value>;

/// A recorded user action. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Event {
    pub id: Uuid,
    pub event_name: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub properties: Properties,
}

/// Ingestion payload. The server assigns the id, and the timestamp when omitted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewEvent {
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub properties: Properties,
}

impl NewEvent {
    pub fn new(event_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            user_id: user_id.into(),
            timestamp: None,
            properties: Properties::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn validate(&self) -> PulseResult<()> {
        if self.event_name.trim().is_empty() {
            return Err(PulseError::invalid("event_name must not be empty"));
        }
        if self.user_id.trim().is_empty() {
            return Err(PulseError::invalid("user_id must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub properties: Properties,
}

/// Profile write: properties are merged key by key into the stored profile.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserUpsert {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub properties: Properties,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Experiment {
    pub id: Uuid,
    pub name: String,
    /// Variant names in declaration order; the first one is the control.
    pub variants: Vec<String>,
    pub goal_event: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewExperiment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub variants: Vec<String>,
    #[serde(default)]
    pub goal_event: String,
}

impl NewExperiment {
    pub fn validate(&self) -> PulseResult<()> {
        if self.name.trim().is_empty() {
            return Err(PulseError::invalid("experiment name must not be empty"));
        }
        if self.goal_event.trim().is_empty() {
            return Err(PulseError::invalid("goal_event must not be empty"));
        }
        if self.variants.len() < 2 {
            return Err(PulseError::invalid(
                "an experiment needs at least two variants",
            ));
        }
        for (i, variant) in self.variants.iter().enumerate() {
            if variant.trim().is_empty() {
                return Err(PulseError::invalid("variant names must not be empty"));
            }
            if self.variants[..i].contains(variant) {
                return Err(PulseError::invalid(format!(
                    "duplicate variant '{variant}'"
                )));
            }
        }
        Ok(())
    }
}

/// One user's bucket in one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Assignment {
    pub experiment_id: Uuid,
    pub user_id: String,
    pub variant: String,
    pub assigned_at: DateTime<Utc>,
}

/// Aggregated exposure and conversion counts for one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VariantConversions {
    pub variant: String,
    pub user_count: u64,
    pub conversion_count: u64,
}

impl VariantConversions {
    pub fn new(variant: impl Into<String>, user_count: u64, conversion_count: u64) -> Self {
        Self {
            variant: variant.into(),
            user_count,
            conversion_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EventNameCount {
    pub event_name: String,
    pub events: u64,
    pub users: u64,
}

/// Restricts an event query. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_names: Option<Vec<String>>,
    pub user_id: Option<String>,
    pub limit: Option<u32>,
}

impl EventFilter {
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_names: Some(names.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }
}

/// Inclusive time bounds. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> PulseResult<Self> {
        let window = Self { start, end };
        window.validate()?;
        Ok(window)
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> PulseResult<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(PulseError::invalid(format!(
                    "malformed date range: start {start} is after end {end}"
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

/// Bucket size for cohort grouping. All bucketing happens in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    /// Start of the period containing `date`. Weeks start on Monday.
    pub fn truncate(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => date,
            Granularity::Week => {
                let offset = Duration::days(date.weekday().num_days_from_monday() as i64);
                date.checked_sub_signed(offset).unwrap_or(date)
            }
            Granularity::Month => date.with_day(1).unwrap_or(date),
        }
    }

    /// Number of whole periods between two period starts.
    pub fn periods_between(&self, from: NaiveDate, to: NaiveDate) -> i64 {
        match self {
            Granularity::Day => (to - from).num_days(),
            Granularity::Week => (to - from).num_days().div_euclid(7),
            Granularity::Month => {
                (to.year() as i64 - from.year() as i64) * 12 + to.month() as i64
                    - from.month() as i64
            }
        }
    }

    pub fn label(&self, start: NaiveDate) -> String {
        match self {
            Granularity::Day => start.format("%Y-%m-%d").to_string(),
            Granularity::Week => {
                let iso = start.iso_week();
                format!("{}-W{:02}", iso.year(), iso.week())
            }
            Granularity::Month => start.format("%Y-%m").to_string(),
        }
    }
}

/// How the A/B analyzer decides whether a difference is real.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceMethod {
    /// Two-proportion pooled z-test against the control.
    #[default]
    ZTest,
    /// Flag when the absolute lift exceeds a fixed percentage.
    LiftThreshold,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_week_truncates_to_monday() {
        // 2024-03-14 is a Thursday
        assert_eq!(Granularity::Week.truncate(date(2024, 3, 14)), date(2024, 3, 11));
        assert_eq!(Granularity::Week.truncate(date(2024, 3, 11)), date(2024, 3, 11));
        assert_eq!(Granularity::Week.label(date(2024, 3, 11)), "2024-W11");
    }

    #[test]
    fn test_month_periods() {
        let start = Granularity::Month.truncate(date(2023, 11, 20));
        assert_eq!(start, date(2023, 11, 1));
        assert_eq!(Granularity::Month.periods_between(start, date(2024, 2, 1)), 3);
        assert_eq!(Granularity::Month.label(start), "2023-11");
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            TimeWindow::new(Some(a), Some(b)),
            Err(PulseError::InvalidInput(_))
        ));
        let window = TimeWindow::new(Some(b), Some(a)).unwrap();
        assert!(window.contains(a));
        assert!(!window.contains(a + Duration::seconds(1)));
    }

    #[test]
    fn test_new_experiment_validation() {
        let mut exp = NewExperiment {
            name: "checkout-copy".into(),
            variants: vec!["control".into(), "control".into()],
            goal_event: "purchase".into(),
        };
        assert!(exp.validate().is_err());
        exp.variants = vec!["control".into()];
        assert!(exp.validate().is_err());
        exp.variants = vec!["control".into(), "bold".into()];
        assert!(exp.validate().is_ok());
    }
}
