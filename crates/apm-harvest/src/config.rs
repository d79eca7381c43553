// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local agent settings and the per-session configuration returned by the
//! collector on connect.

use crate::errors::ConfigError;
use serde::Deserialize;
use sql_fingerprint::{PlanObfuscation, RecordSql};
use std::env;
use std::time::Duration;

/// Process-level settings, read once when the application is created.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Application name reported to the collector
    pub app_name: String,
    /// Account license key
    pub license_key: Option<String>,
    /// Collector host
    pub host: String,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// Surface record failures to the caller instead of only logging them
    pub propagate_record_errors: bool,
    /// Block activation for up to this long waiting for the first connect
    pub startup_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Rust Application".to_string(),
            license_key: None,
            host: "collector.newrelic.com".to_string(),
            log_level: "info".to_string(),
            propagate_record_errors: false,
            startup_timeout: None,
        }
    }
}

impl Settings {
    /// Create settings from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let app_name = env::var("APM_APP_NAME").unwrap_or(defaults.app_name);
        let license_key = env::var("APM_LICENSE_KEY").ok().filter(|key| !key.is_empty());
        let host = env::var("APM_HOST").unwrap_or(defaults.host);
        let log_level = env::var("APM_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);
        let propagate_record_errors = env::var("APM_PROPAGATE_RECORD_ERRORS")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        let startup_timeout = match env::var("APM_STARTUP_TIMEOUT") {
            Ok(val) => parse_seconds("APM_STARTUP_TIMEOUT", &val)?.filter(|t| !t.is_zero()),
            Err(_) => None,
        };

        let settings = Self {
            app_name,
            license_key,
            host,
            log_level,
            propagate_record_errors,
            startup_timeout,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "APM_APP_NAME cannot be empty".to_string(),
            ));
        }

        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "APM_HOST cannot be empty".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn parse_seconds(name: &str, value: &str) -> Result<Option<Duration>, ConfigError> {
    let seconds = value
        .trim()
        .parse::<f64>()
        .map_err(|_| ConfigError::InvalidConfig(format!("{name} must be a number of seconds")))?;
    Duration::try_from_secs_f64(seconds)
        .map(Some)
        .map_err(|_| ConfigError::InvalidConfig(format!("{name} must not be negative")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeatureFlag {
    pub enabled: bool,
}

impl Default for FeatureFlag {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub enabled: bool,
    pub max_samples_stored: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_samples_stored: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransactionTracerConfig {
    pub enabled: bool,
    /// Seconds a transaction must take before it is considered for a trace.
    pub transaction_threshold: f64,
    pub record_sql: RecordSql,
    pub explain_enabled: bool,
    /// Seconds a statement must take before it is kept as slow SQL.
    pub explain_threshold: f64,
    pub explain_plan_obfuscation: PlanObfuscation,
}

impl Default for TransactionTracerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            transaction_threshold: 0.5,
            record_sql: RecordSql::Obfuscated,
            explain_enabled: true,
            explain_threshold: 0.5,
            explain_plan_obfuscation: PlanObfuscation::Light,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgentLimits {
    pub max_sql_connections: usize,
    pub max_metric_contexts: usize,
    /// Slow SQL nodes kept between harvests.
    pub slow_sql_data: usize,
    /// Longest statement text, in bytes, kept for reporting.
    pub sql_query_length_maximum: usize,
    /// Slow SQL statements reported per harvest.
    pub sql_explain_plans: usize,
    /// Explain queries run per harvest.
    pub sql_explain_plans_per_harvest: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_sql_connections: 4,
            max_metric_contexts: 2000,
            slow_sql_data: 10,
            sql_query_length_maximum: 16384,
            sql_explain_plans: 30,
            sql_explain_plans_per_harvest: 60,
        }
    }
}

/// Settings in force for one collector session.
///
/// Field names follow the collector's connect response, so the whole struct
/// can be deserialized from it; anything missing takes its default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfiguration {
    pub sampling_target: u64,
    pub sampling_target_period_in_seconds: u64,
    pub serverless_mode: FeatureFlag,
    pub distributed_tracing: FeatureFlag,
    pub high_security: bool,
    pub collect_traces: bool,
    pub collect_span_events: bool,
    pub collect_custom_events: bool,
    pub span_events: EventsConfig,
    pub custom_insights_events: EventsConfig,
    pub slow_sql: FeatureFlag,
    pub transaction_tracer: TransactionTracerConfig,
    pub agent_limits: AgentLimits,
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        Self {
            sampling_target: 10,
            sampling_target_period_in_seconds: 60,
            serverless_mode: FeatureFlag { enabled: false },
            distributed_tracing: FeatureFlag::default(),
            high_security: false,
            collect_traces: true,
            collect_span_events: true,
            collect_custom_events: true,
            span_events: EventsConfig::default(),
            custom_insights_events: EventsConfig {
                enabled: true,
                max_samples_stored: 3600,
            },
            slow_sql: FeatureFlag::default(),
            transaction_tracer: TransactionTracerConfig::default(),
            agent_limits: AgentLimits::default(),
        }
    }
}

impl SessionConfiguration {
    /// Window over which the adaptive sampler spreads its target.
    /// Serverless invocations always use one minute.
    #[must_use]
    pub fn sampling_period(&self) -> Duration {
        if self.serverless_mode.enabled {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(self.sampling_target_period_in_seconds.max(1))
        }
    }

    /// SQL recording mode after high security mode has been applied.
    #[must_use]
    pub fn record_sql(&self) -> RecordSql {
        match self.transaction_tracer.record_sql {
            RecordSql::Raw if self.high_security => RecordSql::Obfuscated,
            mode => mode,
        }
    }

    #[must_use]
    pub fn explain_threshold(&self) -> Duration {
        Duration::try_from_secs_f64(self.transaction_tracer.explain_threshold).unwrap_or_default()
    }

    #[must_use]
    pub fn transaction_threshold(&self) -> Duration {
        Duration::try_from_secs_f64(self.transaction_tracer.transaction_threshold)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn span_events_enabled(&self) -> bool {
        self.span_events.enabled && self.collect_span_events && self.distributed_tracing.enabled
    }

    #[must_use]
    pub fn custom_events_enabled(&self) -> bool {
        self.custom_insights_events.enabled && self.collect_custom_events
    }

    #[must_use]
    pub fn transaction_traces_enabled(&self) -> bool {
        self.collect_traces && self.transaction_tracer.enabled
    }

    #[must_use]
    pub fn slow_sql_enabled(&self) -> bool {
        self.collect_traces && self.slow_sql.enabled
    }
}
