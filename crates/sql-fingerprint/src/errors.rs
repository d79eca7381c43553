// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Failures talking to a database while fetching an explain plan.
#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Failed to execute explain query: {0}")]
    Execute(String),

    #[error("Failed to close connection: {0}")]
    Close(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ExplainError::Connect("connection refused".to_string());
        assert_eq!(error.to_string(), "Failed to connect: connection refused");
    }
}
