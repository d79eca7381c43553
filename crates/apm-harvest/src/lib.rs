// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collector session lifecycle and harvest cycle for an embedded APM agent.
//!
//! An [`Application`] connects to the collector through a [`SessionFactory`],
//! accumulates transaction data in a [`StatsEngine`] and periodically ships
//! it through the resulting [`CollectorSession`]. SQL captured with
//! transactions is fingerprinted and obfuscated by `sql_fingerprint`.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod application;
pub mod config;
pub mod data_sampler;
pub mod environment;
pub mod errors;
pub mod logger;
pub mod sampler;
pub mod session;
pub mod stats;

pub use application::Application;
pub use config::{SessionConfiguration, Settings};
pub use data_sampler::DataSampler;
pub use environment::EnvironmentInfo;
pub use errors::{ApplicationError, CollectorError, ConfigError, StatsError};
pub use sampler::AdaptiveSampler;
pub use session::{CollectorSession, MetricPeriod, SamplingInfo, SessionFactory};
pub use stats::{
    CustomEvent, MetricData, SlowSqlNode, SlowSqlPayload, SpanEvent, StatsEngine, TraceSegment,
    TransactionRecord, TransactionTracePayload,
};
