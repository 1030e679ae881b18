//! Funnel analysis — tracks user progression through multi-step conversion paths.

use crate::stats::{median, percentage};
use chrono::{DateTime, Utc};
use pulse_core::types::{Event, TimeWindow};
use pulse_core::{PulseError, PulseResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunnelDefinition {
    /// Event names in the order users are expected to fire them.
    pub steps: Vec<String>,
}

impl FunnelDefinition {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self) -> PulseResult<()> {
        if self.steps.len() < 2 {
            return Err(PulseError::invalid("a funnel needs at least two steps"));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.trim().is_empty() {
                return Err(PulseError::invalid("funnel step names must not be empty"));
            }
            if self.steps[..i].contains(step) {
                return Err(PulseError::invalid(format!(
                    "funnel step '{step}' appears more than once"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunnelStepResult {
    pub event_name: String,
    pub user_count: u64,
    /// Share of step-1 users that reached this step.
    pub conversion_rate: f64,
    /// Share of the previous step's users that reached this step.
    pub step_conversion_rate: f64,
    pub dropped_off: u64,
    pub median_seconds_from_previous: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunnelReport {
    pub steps: Vec<FunnelStepResult>,
    pub overall_conversion_rate: f64,
    pub window: TimeWindow,
    pub computed_at: DateTime<Utc>,
}

/// Count users through the funnel. A user reaches step `i` when they fired
/// step `i`'s event at or after reaching step `i - 1`; other events in
/// between are ignored. Events outside `window` are skipped.
pub fn analyze_funnel(
    definition: &FunnelDefinition,
    events: &[Event],
    window: &TimeWindow,
) -> PulseResult<FunnelReport> {
    definition.validate()?;
    window.validate()?;

    let steps = &definition.steps;
    let mut by_user: HashMap<&str, Vec<&Event>> = HashMap::new();
    for event in events {
        if window.contains(event.timestamp) && steps.contains(&event.event_name) {
            by_user.entry(event.user_id.as_str()).or_default().push(event);
        }
    }

    let mut counts = vec![0u64; steps.len()];
    let mut gaps: Vec<Vec<i64>> = vec![Vec::new(); steps.len()];

    for user_events in by_user.values_mut() {
        user_events.sort_by_key(|e| e.timestamp);

        // Greedy earliest match finds the deepest reachable step.
        let mut reached_at: Vec<DateTime<Utc>> = Vec::with_capacity(steps.len());
        for event in user_events.iter() {
            let next = reached_at.len();
            if next == steps.len() {
                break;
            }
            if event.event_name == steps[next] {
                reached_at.push(event.timestamp);
            }
        }

        for (i, at) in reached_at.iter().enumerate() {
            counts[i] += 1;
            if i > 0 {
                gaps[i].push((*at - reached_at[i - 1]).num_seconds());
            }
        }
    }

    let medians = gaps.iter_mut().map(|g| median(g)).collect::<Vec<_>>();
    let mut report = funnel_from_counts(steps, &counts, window);
    for (step, median) in report.steps.iter_mut().zip(medians) {
        step.median_seconds_from_previous = median;
    }

    tracing::debug!(
        steps = steps.len(),
        entered = counts[0],
        users = by_user.len(),
        "Funnel computed"
    );
    Ok(report)
}

/// Build the report from per-step user counts.
pub fn funnel_from_counts(steps: &[String], counts: &[u64], window: &TimeWindow) -> FunnelReport {
    let first = counts.first().copied().unwrap_or(0);
    let results = steps
        .iter()
        .zip(counts)
        .enumerate()
        .map(|(i, (name, &count))| {
            let previous = if i == 0 { count } else { counts[i - 1] };
            FunnelStepResult {
                event_name: name.clone(),
                user_count: count,
                conversion_rate: percentage(count, first),
                step_conversion_rate: percentage(count, previous),
                dropped_off: previous.saturating_sub(count),
                median_seconds_from_previous: None,
            }
        })
        .collect::<Vec<_>>();

    let last = counts.last().copied().unwrap_or(0);
    FunnelReport {
        steps: results,
        overall_conversion_rate: percentage(last, first),
        window: *window,
        computed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn ev(name: &str, user: &str, minutes: i64) -> Event {
        Event {
            id: Uuid::new_v4(),
            event_name: name.to_string(),
            user_id: user.to_string(),
            timestamp: base() + Duration::minutes(minutes),
            properties: Default::default(),
        }
    }

    fn signup_funnel() -> FunnelDefinition {
        FunnelDefinition::new(["signup", "verified", "active"])
    }

    #[test]
    fn test_rates_from_reference_counts() {
        let def = signup_funnel();
        let report = funnel_from_counts(&def.steps, &[1000, 250, 50], &TimeWindow::unbounded());
        let rates: Vec<f64> = report.steps.iter().map(|s| s.conversion_rate).collect();
        for (got, want) in rates.iter().zip([100.0, 25.0, 5.0]) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
        assert!((report.overall_conversion_rate - 5.0).abs() < 1e-9);
        assert_eq!(report.steps[1].dropped_off, 750);
        assert!((report.steps[2].step_conversion_rate - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_order_matters() {
        let events = vec![
            // u1 completes in order with noise in between
            ev("signup", "u1", 0),
            ev("pageview", "u1", 1),
            ev("verified", "u1", 5),
            ev("active", "u1", 20),
            // u2 verifies before signing up: only step 1 counts
            ev("verified", "u2", 0),
            ev("signup", "u2", 3),
            // u3 never signs up
            ev("verified", "u3", 0),
            ev("active", "u3", 1),
        ];
        let report = analyze_funnel(&signup_funnel(), &events, &TimeWindow::unbounded()).unwrap();
        let counts: Vec<u64> = report.steps.iter().map(|s| s.user_count).collect();
        assert_eq!(counts, vec![2, 1, 1]);
        assert_eq!(report.steps[1].median_seconds_from_previous, Some(300));
        assert_eq!(report.steps[2].median_seconds_from_previous, Some(900));
        assert_eq!(report.steps[0].median_seconds_from_previous, None);
    }

    #[test]
    fn test_steps_sharing_a_timestamp_advance() {
        // Same instant, recorded in step order.
        let events = vec![ev("signup", "u1", 0), ev("verified", "u1", 0), ev("active", "u1", 0)];
        let report = analyze_funnel(&signup_funnel(), &events, &TimeWindow::unbounded()).unwrap();
        let counts: Vec<u64> = report.steps.iter().map(|s| s.user_count).collect();
        assert_eq!(counts, vec![1, 1, 1]);
        assert_eq!(report.steps[2].median_seconds_from_previous, Some(0));
    }

    #[test]
    fn test_counts_never_increase() {
        let mut events = Vec::new();
        for u in 0..50 {
            let user = format!("u{u}");
            events.push(ev("signup", &user, u));
            if u % 2 == 0 {
                events.push(ev("verified", &user, u + 1));
            }
            if u % 3 == 0 {
                events.push(ev("active", &user, u + 2));
            }
        }
        let report = analyze_funnel(&signup_funnel(), &events, &TimeWindow::unbounded()).unwrap();
        for pair in report.steps.windows(2) {
            assert!(pair[1].user_count <= pair[0].user_count);
        }
        assert_eq!(report.steps[0].conversion_rate, 100.0);
    }

    #[test]
    fn test_window_excludes_events() {
        let events = vec![ev("signup", "u1", 0), ev("verified", "u1", 60), ev("active", "u1", 120)];
        let window = TimeWindow::new(None, Some(base() + Duration::minutes(90))).unwrap();
        let report = analyze_funnel(&signup_funnel(), &events, &window).unwrap();
        let counts: Vec<u64> = report.steps.iter().map(|s| s.user_count).collect();
        assert_eq!(counts, vec![1, 1, 0]);
    }

    #[test]
    fn test_empty_funnel_has_zero_rates() {
        let report = analyze_funnel(&signup_funnel(), &[], &TimeWindow::unbounded()).unwrap();
        assert!(report.steps.iter().all(|s| s.user_count == 0 && s.conversion_rate == 0.0));
        assert_eq!(report.overall_conversion_rate, 0.0);
    }

    #[test]
    fn test_invalid_definitions() {
        let one = FunnelDefinition::new(["signup"]);
        assert!(matches!(
            analyze_funnel(&one, &[], &TimeWindow::unbounded()),
            Err(PulseError::InvalidInput(_))
        ));
        let dup = FunnelDefinition::new(["signup", "signup"]);
        assert!(dup.validate().is_err());
    }
}
