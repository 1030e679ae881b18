//! A/B/n experiment evaluation: conversion rates, lift over control, and a
//! significance verdict per variant.

use crate::stats::{percentage, two_proportion_z_test};
use chrono::{DateTime, Utc};
use pulse_core::config::AnalyticsConfig;
use pulse_core::types::{SignificanceMethod, VariantConversions};
use pulse_core::{PulseError, PulseResult};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VariantResult {
    pub variant: String,
    pub is_control: bool,
    pub user_count: u64,
    pub conversion_count: u64,
    pub conversion_rate: f64,
    /// Relative change against control, in percent. `None` when the control
    /// rate is zero.
    pub lift: Option<f64>,
    pub z_score: Option<f64>,
    pub p_value: Option<f64>,
    pub significant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExperimentReport {
    pub experiment_id: Uuid,
    pub method: SignificanceMethod,
    pub confidence_level: f64,
    pub lift_threshold_pct: f64,
    pub control: String,
    pub variants: Vec<VariantResult>,
    pub winner: Option<String>,
    /// True when any non-control variant is significant.
    pub significant: bool,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExperimentAnalyzer {
    method: SignificanceMethod,
    lift_threshold_pct: f64,
    confidence_level: f64,
}

impl ExperimentAnalyzer {
    pub fn new(method: SignificanceMethod, lift_threshold_pct: f64, confidence_level: f64) -> Self {
        Self {
            method,
            lift_threshold_pct,
            confidence_level,
        }
    }

    pub fn from_config(config: &AnalyticsConfig) -> Self {
        Self::new(
            config.significance_method,
            config.lift_threshold_pct,
            config.confidence_level,
        )
    }

    /// Evaluate variant records; the first record is the control.
    pub fn analyze(
        &self,
        experiment_id: Uuid,
        records: &[VariantConversions],
    ) -> PulseResult<ExperimentReport> {
        validate_records(records)?;
        let control = &records[0];
        let control_rate = percentage(control.conversion_count, control.user_count);

        let variants = records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let rate = percentage(record.conversion_count, record.user_count);
                if i == 0 {
                    return VariantResult {
                        variant: record.variant.clone(),
                        is_control: true,
                        user_count: record.user_count,
                        conversion_count: record.conversion_count,
                        conversion_rate: rate,
                        lift: None,
                        z_score: None,
                        p_value: None,
                        significant: false,
                    };
                }

                let lift = (control_rate > 0.0).then(|| (rate - control_rate) / control_rate * 100.0);
                let test = two_proportion_z_test(
                    control.conversion_count,
                    control.user_count,
                    record.conversion_count,
                    record.user_count,
                );
                let significant = match self.method {
                    SignificanceMethod::ZTest => {
                        test.is_some_and(|(_, p)| p < 1.0 - self.confidence_level)
                    }
                    SignificanceMethod::LiftThreshold => {
                        lift.is_some_and(|l| l.abs() > self.lift_threshold_pct)
                    }
                };

                VariantResult {
                    variant: record.variant.clone(),
                    is_control: false,
                    user_count: record.user_count,
                    conversion_count: record.conversion_count,
                    conversion_rate: rate,
                    lift,
                    z_score: test.map(|(z, _)| z),
                    p_value: test.map(|(_, p)| p),
                    significant,
                }
            })
            .collect::<Vec<_>>();

        let winner = pick_winner(&variants);
        let significant = variants.iter().any(|v| v.significant);

        tracing::debug!(
            experiment_id = %experiment_id,
            method = ?self.method,
            winner = ?winner,
            significant,
            "Experiment evaluated"
        );

        Ok(ExperimentReport {
            experiment_id,
            method: self.method,
            confidence_level: self.confidence_level,
            lift_threshold_pct: self.lift_threshold_pct,
            control: control.variant.clone(),
            variants,
            winner,
            significant,
            computed_at: Utc::now(),
        })
    }
}

impl Default for ExperimentAnalyzer {
    fn default() -> Self {
        Self::from_config(&AnalyticsConfig::default())
    }
}

fn validate_records(records: &[VariantConversions]) -> PulseResult<()> {
    if records.len() < 2 {
        return Err(PulseError::invalid(
            "at least two variant records are required",
        ));
    }
    for (i, record) in records.iter().enumerate() {
        if record.variant.trim().is_empty() {
            return Err(PulseError::invalid("variant names must not be empty"));
        }
        if record.conversion_count > record.user_count {
            return Err(PulseError::invalid(format!(
                "variant '{}' has more conversions ({}) than users ({})",
                record.variant, record.conversion_count, record.user_count
            )));
        }
        if records[..i].iter().any(|r| r.variant == record.variant) {
            return Err(PulseError::invalid(format!(
                "duplicate variant '{}'",
                record.variant
            )));
        }
    }
    Ok(())
}

/// Highest conversion rate wins; the earlier variant keeps a tie. No winner
/// when nobody converted.
fn pick_winner(variants: &[VariantResult]) -> Option<String> {
    let mut best: Option<&VariantResult> = None;
    for v in variants {
        if v.conversion_rate > best.map_or(0.0, |b| b.conversion_rate) {
            best = Some(v);
        }
    }
    best.map(|v| v.variant.clone())
}
