// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host and process facts sent to the collector when a session is created.

use serde::Serialize;
use std::env;
use tracing::warn;

/// Snapshot of the environment taken when the application is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentInfo {
    pub hostname: String,
    pub pid: u32,
    pub agent_version: String,
    pub language: String,
}

impl EnvironmentInfo {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            hostname: get_hostname(),
            pid: std::process::id(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            language: "rust".to_string(),
        }
    }
}

/// Get the system hostname
///
/// `APM_HOSTNAME` wins, then `HOSTNAME`, then the system hostname. Falls back
/// to "unknown" when none is usable.
#[must_use]
pub fn get_hostname() -> String {
    for var in ["APM_HOSTNAME", "HOSTNAME"] {
        if let Ok(hostname) = env::var(var) {
            if !hostname.is_empty() {
                return hostname;
            }
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str().filter(|h| !h.is_empty()) {
                return hostname.to_string();
            }
        }
        Err(e) => {
            warn!("Failed to get system hostname: {}", e);
        }
    }

    warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_get_hostname_not_empty() {
        assert!(!get_hostname().is_empty());
    }

    #[test]
    #[serial]
    fn test_hostname_override() {
        env::set_var("APM_HOSTNAME", "test-hostname-override");
        assert_eq!(get_hostname(), "test-hostname-override");
        env::remove_var("APM_HOSTNAME");
    }

    #[test]
    #[serial]
    fn test_empty_override_is_ignored() {
        env::set_var("APM_HOSTNAME", "");
        assert!(!get_hostname().is_empty());
        env::remove_var("APM_HOSTNAME");
    }

    #[test]
    fn test_capture_records_current_process() {
        let info = EnvironmentInfo::capture();
        assert_eq!(info.pid, std::process::id());
        assert_eq!(info.language, "rust");
    }
}
