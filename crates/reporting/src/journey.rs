//! Journey mapping — most frequent event paths and where sessions end.

use crate::stats::percentage;
use chrono::{DateTime, Duration, Utc};
use pulse_core::types::{Event, TimeWindow};
use pulse_core::{PulseError, PulseResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

pub const MAX_PATH_LENGTH: usize = 50;
pub const MAX_PATHS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JourneyQuery {
    pub max_path_length: usize,
    pub limit: usize,
    pub min_occurrences: u64,
    #[serde(default)]
    pub window: TimeWindow,
}

impl JourneyQuery {
    pub fn validate(&self) -> PulseResult<()> {
        if self.max_path_length == 0 || self.max_path_length > MAX_PATH_LENGTH {
            return Err(PulseError::invalid(format!(
                "max_path_length must be between 1 and {MAX_PATH_LENGTH}"
            )));
        }
        if self.limit == 0 || self.limit > MAX_PATHS {
            return Err(PulseError::invalid(format!(
                "limit must be between 1 and {MAX_PATHS}"
            )));
        }
        if self.min_occurrences == 0 {
            return Err(PulseError::invalid("min_occurrences must be at least 1"));
        }
        self.window.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PathCount {
    pub path: Vec<String>,
    pub count: u64,
    /// Share of all sessions that followed this path.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DropOff {
    pub event_name: String,
    /// Sessions whose last event was this one.
    pub count: u64,
    /// Share of all drop-offs.
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JourneyReport {
    pub total_users: u64,
    pub total_sessions: u64,
    pub paths: Vec<PathCount>,
    pub drop_offs: Vec<DropOff>,
    pub computed_at: DateTime<Utc>,
}

/// Splits each user's activity into sessions and aggregates their paths.
pub struct JourneyMapper {
    session_timeout: Duration,
}

impl JourneyMapper {
    pub fn new(session_timeout: Duration) -> Self {
        Self { session_timeout }
    }

    pub fn map(&self, events: &[Event], query: &JourneyQuery) -> PulseResult<JourneyReport> {
        query.validate()?;

        let mut by_user: HashMap<&str, Vec<&Event>> = HashMap::new();
        for event in events.iter().filter(|e| query.window.contains(e.timestamp)) {
            by_user.entry(event.user_id.as_str()).or_default().push(event);
        }

        let mut path_counts: HashMap<Vec<&str>, u64> = HashMap::new();
        let mut exits: HashMap<&str, u64> = HashMap::new();
        let mut total_sessions = 0u64;

        for user_events in by_user.values_mut() {
            user_events.sort_by_key(|e| e.timestamp);
            for session in self.sessions(user_events) {
                total_sessions += 1;
                let path = session
                    .iter()
                    .take(query.max_path_length)
                    .map(|e| e.event_name.as_str())
                    .collect::<Vec<_>>();
                *path_counts.entry(path).or_insert(0) += 1;
                if let Some(last) = session.last() {
                    *exits.entry(last.event_name.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut paths = path_counts
            .into_iter()
            .filter(|(_, count)| *count >= query.min_occurrences)
            .collect::<Vec<_>>();
        paths.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        paths.truncate(query.limit);
        let paths = paths
            .into_iter()
            .map(|(path, count)| PathCount {
                path: path.into_iter().map(str::to_string).collect(),
                count,
                percentage: percentage(count, total_sessions),
            })
            .collect();

        let total_exits: u64 = exits.values().sum();
        let mut drop_offs = exits
            .into_iter()
            .map(|(name, count)| DropOff {
                event_name: name.to_string(),
                count,
                percentage: percentage(count, total_exits),
            })
            .collect::<Vec<_>>();
        drop_offs.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.event_name.cmp(&b.event_name)));

        tracing::debug!(
            users = by_user.len(),
            sessions = total_sessions,
            "Journeys mapped"
        );

        Ok(JourneyReport {
            total_users: by_user.len() as u64,
            total_sessions,
            paths,
            drop_offs,
            computed_at: Utc::now(),
        })
    }

    /// Split time-ordered events wherever the gap exceeds the timeout.
    fn sessions<'a>(&self, events: &'a [&'a Event]) -> Vec<&'a [&'a Event]> {
        let mut sessions = Vec::new();
        let mut start = 0;
        for i in 1..events.len() {
            if events[i].timestamp - events[i - 1].timestamp > self.session_timeout {
                sessions.push(&events[start..i]);
                start = i;
            }
        }
        if start < events.len() {
            sessions.push(&events[start..]);
        }
        sessions
    }
}

impl Default for JourneyMapper {
    fn default() -> Self {
        Self::new(Duration::minutes(30))
    }
}
