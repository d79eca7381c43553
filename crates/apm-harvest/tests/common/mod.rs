// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common test utilities and mocks for integration tests

pub mod mocks;

use apm_harvest::{Application, SessionFactory, Settings, TransactionRecord};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[allow(dead_code)]
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[allow(dead_code)]
pub fn settings() -> Settings {
    Settings {
        app_name: "integration-app".to_string(),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn application(factory: Arc<dyn SessionFactory>) -> Application {
    Application::new(settings(), factory)
}

/// A transaction that ended just now and took `duration`.
#[allow(dead_code)]
pub fn transaction(name: &str, duration: Duration) -> TransactionRecord {
    let end = SystemTime::now();
    TransactionRecord::new(name, end - duration, end)
}
