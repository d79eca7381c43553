// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Outcomes of talking to the collector.
///
/// The first four variants are control signals from the collector rather
/// than faults; the harvest cycle has a defined recovery for each.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectorError {
    #[error("Collector requested an agent restart")]
    ForceAgentRestart,

    #[error("Collector requested the agent disconnect")]
    ForceAgentDisconnect,

    #[error("Collector asked for the data to be sent again: {0}")]
    RetryDataForRequest(String),

    #[error("Collector rejected the data: {0}")]
    DiscardDataForRequest(String),

    #[error("Collector unreachable: {0}")]
    Network(String),

    #[error("Unexpected collector error: {0}")]
    Other(String),
}

/// Failures recording into or merging statistics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatsError {
    #[error("Metric table full, {dropped} metric(s) dropped")]
    Overflow { dropped: usize },

    #[error("Invalid transaction record: {0}")]
    InvalidRecord(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors surfaced to the host application. Only produced when record
/// failures are configured to propagate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplicationError {
    #[error("Failed to record transaction: {0}")]
    Record(#[from] StatsError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CollectorError::RetryDataForRequest("503".to_string());
        assert_eq!(
            error.to_string(),
            "Collector asked for the data to be sent again: 503"
        );

        let error = StatsError::Overflow { dropped: 3 };
        assert_eq!(error.to_string(), "Metric table full, 3 metric(s) dropped");
    }

    #[test]
    fn test_application_error_from_stats_error() {
        let error: ApplicationError = StatsError::InvalidRecord("negative duration".into()).into();
        assert_eq!(
            error.to_string(),
            "Failed to record transaction: Invalid transaction record: negative duration"
        );
    }
}
