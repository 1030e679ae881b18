use crate::error::{PulseError, PulseResult};
use crate::types::SignificanceMethod;
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `PULSE__` on top of built-in defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path. Created on first start.
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Knobs for the analyzers. Request parameters override the journey and
/// retention defaults per call.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub significance_method: SignificanceMethod,
    #[serde(default = "default_lift_threshold_pct")]
    pub lift_threshold_pct: f64,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: i64,
    #[serde(default = "default_retention_periods")]
    pub default_retention_periods: u32,
    #[serde(default = "default_journey_path_length")]
    pub default_journey_path_length: usize,
    #[serde(default = "default_journey_limit")]
    pub default_journey_limit: usize,
}

// Default functions
fn default_node_id() -> String {
    "pulse-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_database_path() -> String {
    "data/pulse.db".to_string()
}
fn default_max_connections() -> u32 {
    8
}
fn default_lift_threshold_pct() -> f64 {
    10.0
}
fn default_confidence_level() -> f64 {
    0.95
}
fn default_session_timeout_minutes() -> i64 {
    30
}
fn default_retention_periods() -> u32 {
    8
}
fn default_journey_path_length() -> usize {
    5
}
fn default_journey_limit() -> usize {
    10
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            significance_method: SignificanceMethod::default(),
            lift_threshold_pct: default_lift_threshold_pct(),
            confidence_level: default_confidence_level(),
            session_timeout_minutes: default_session_timeout_minutes(),
            default_retention_periods: default_retention_periods(),
            default_journey_path_length: default_journey_path_length(),
            default_journey_limit: default_journey_limit(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            database: DatabaseConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("PULSE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject values the analyzers cannot work with.
    pub fn validate(&self) -> PulseResult<()> {
        let analytics = &self.analytics;
        if !(analytics.confidence_level > 0.0 && analytics.confidence_level < 1.0) {
            return Err(PulseError::Config(format!(
                "analytics.confidence_level must be in (0, 1), got {}",
                analytics.confidence_level
            )));
        }
        if analytics.lift_threshold_pct < 0.0 {
            return Err(PulseError::Config(
                "analytics.lift_threshold_pct must be non-negative".to_string(),
            ));
        }
        if analytics.session_timeout_minutes <= 0 {
            return Err(PulseError::Config(
                "analytics.session_timeout_minutes must be positive".to_string(),
            ));
        }
        if analytics.default_retention_periods == 0
            || analytics.default_journey_path_length == 0
            || analytics.default_journey_limit == 0
        {
            return Err(PulseError::Config(
                "analytics defaults must be greater than zero".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(PulseError::Config(
                "database.max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
