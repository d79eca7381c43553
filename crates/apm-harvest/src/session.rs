// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The collector-facing seam.
//!
//! A [`SessionFactory`] performs the connect handshake and hands back a
//! [`CollectorSession`], which carries the configuration the collector chose
//! for this run and the endpoints harvested data is sent to. Transport and
//! payload encoding are the implementor's concern.

use crate::config::{SessionConfiguration, Settings};
use crate::environment::EnvironmentInfo;
use crate::errors::CollectorError;
use crate::stats::{
    CustomEvent, MetricData, SlowSqlPayload, SpanEvent, TransactionTracePayload,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Reservoir bookkeeping sent alongside sampled events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SamplingInfo {
    pub reservoir_size: usize,
    pub events_seen: u64,
}

/// Wall-clock window a batch of metric data covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricPeriod {
    pub start: SystemTime,
    pub end: SystemTime,
}

impl MetricPeriod {
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end.duration_since(self.start).unwrap_or_default()
    }
}

#[async_trait]
pub trait CollectorSession: Send + Sync {
    fn configuration(&self) -> Arc<SessionConfiguration>;

    async fn send_metric_data(
        &self,
        period: MetricPeriod,
        metrics: Vec<MetricData>,
    ) -> Result<(), CollectorError>;

    async fn send_span_events(
        &self,
        sampling_info: SamplingInfo,
        events: Vec<SpanEvent>,
    ) -> Result<(), CollectorError>;

    async fn send_custom_events(
        &self,
        sampling_info: SamplingInfo,
        events: Vec<CustomEvent>,
    ) -> Result<(), CollectorError>;

    async fn send_sql_traces(&self, traces: Vec<SlowSqlPayload>) -> Result<(), CollectorError>;

    async fn send_transaction_traces(
        &self,
        traces: Vec<TransactionTracePayload>,
    ) -> Result<(), CollectorError>;

    /// Completes one harvest's exchange with the collector.
    async fn finalize(&self) -> Result<(), CollectorError>;

    /// Tells the collector this agent run is over.
    async fn shutdown_session(&self) -> Result<(), CollectorError>;

    /// Releases the transport connection. The session stays usable and
    /// reconnects on the next request.
    fn close_connection(&self);
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Performs the connect handshake.
    ///
    /// `Ok(None)` and [`CollectorError::Network`] mean the collector could not
    /// be reached and the attempt should be retried later.
    async fn create_session(
        &self,
        app_name: &str,
        environment: &EnvironmentInfo,
        settings: &Settings,
    ) -> Result<Option<Arc<dyn CollectorSession>>, CollectorError>;
}
