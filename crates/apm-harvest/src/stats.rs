// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Statistics accumulated between harvests.
//!
//! A [`StatsEngine`] holds timed metrics, slow SQL nodes, the slowest
//! transaction trace and bounded span/custom event reservoirs. Recording goes
//! through a short-lived work area that is merged into the shared engine, and
//! each harvest swaps the accumulated data out as a snapshot. A snapshot that
//! could not be delivered is rolled back into the live engine.

use crate::config::SessionConfiguration;
use crate::errors::StatsError;
use crate::session::SamplingInfo;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sql_fingerprint::{
    explain_plan, ExplainPlan, ExplainRequest, QueryFingerprint, RecordSql, SqlConnections,
};
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Call count and timing of one metric, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimeStats {
    pub call_count: u64,
    pub total_call_time: f64,
    pub min_call_time: f64,
    pub max_call_time: f64,
    pub sum_of_squares: f64,
}

impl TimeStats {
    pub fn record(&mut self, value: f64) {
        if self.call_count == 0 {
            self.min_call_time = value;
            self.max_call_time = value;
        } else {
            self.min_call_time = self.min_call_time.min(value);
            self.max_call_time = self.max_call_time.max(value);
        }
        self.call_count += 1;
        self.total_call_time += value;
        self.sum_of_squares += value * value;
    }

    pub fn merge(&mut self, other: &TimeStats) {
        if other.call_count == 0 {
            return;
        }
        if self.call_count == 0 {
            *self = *other;
            return;
        }
        self.call_count += other.call_count;
        self.total_call_time += other.total_call_time;
        self.min_call_time = self.min_call_time.min(other.min_call_time);
        self.max_call_time = self.max_call_time.max(other.max_call_time);
        self.sum_of_squares += other.sum_of_squares;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricData {
    pub name: String,
    #[serde(flatten)]
    pub stats: TimeStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub guid: String,
    pub trace_id: String,
    pub name: String,
    pub timestamp_ms: u64,
    pub duration_secs: f64,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp_ms: u64,
    pub attributes: Map<String, Value>,
}

impl CustomEvent {
    /// An event stamped with the current time.
    #[must_use]
    pub fn new(event_type: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp_ms: epoch_millis(SystemTime::now()),
            attributes,
        }
    }
}

/// One node of a transaction's call tree.
#[derive(Debug, Clone)]
pub struct TraceSegment {
    pub name: String,
    /// Offset from the start of the transaction.
    pub start_offset: Duration,
    pub duration: Duration,
    /// Statement executed by this segment, if it was a query.
    pub statement: Option<Arc<QueryFingerprint>>,
    pub children: Vec<TraceSegment>,
}

impl TraceSegment {
    #[must_use]
    pub fn new(name: impl Into<String>, start_offset: Duration, duration: Duration) -> Self {
        Self {
            name: name.into(),
            start_offset,
            duration,
            statement: None,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_statement(mut self, statement: Arc<QueryFingerprint>) -> Self {
        self.statement = Some(statement);
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<TraceSegment>) -> Self {
        self.children = children;
        self
    }

    fn to_value(&self, record_sql: RecordSql, sql_length_maximum: usize) -> Value {
        let mut value = json!({
            "name": self.name,
            "start_ms": millis(self.start_offset),
            "duration_ms": millis(self.duration),
            "children": self
                .children
                .iter()
                .map(|child| child.to_value(record_sql, sql_length_maximum))
                .collect::<Vec<_>>(),
        });
        if let Some(statement) = &self.statement {
            if record_sql != RecordSql::Off {
                let statement = statement.truncated(sql_length_maximum);
                value["sql"] = Value::String(statement.formatted(record_sql).to_string());
            }
        }
        value
    }
}

/// A statement execution captured during a transaction.
#[derive(Debug, Clone)]
pub struct SlowSqlNode {
    pub statement: Arc<QueryFingerprint>,
    pub duration: Duration,
    /// Present when the driver that ran the statement can be used to explain it.
    pub explain: Option<ExplainRequest>,
}

impl SlowSqlNode {
    #[must_use]
    pub fn new(statement: Arc<QueryFingerprint>, duration: Duration) -> Self {
        Self {
            statement,
            duration,
            explain: None,
        }
    }

    #[must_use]
    pub fn with_explain(mut self, request: ExplainRequest) -> Self {
        self.explain = Some(request);
        self
    }

    /// `Datastore/statement/<product>/<target>/<operation>`, or
    /// `Datastore/operation/<product>/<operation>` when there is no target.
    #[must_use]
    pub fn metric_name(&self) -> String {
        let product = &self.statement.database().product;
        let operation = self
            .statement
            .operation()
            .map_or("other", |operation| operation.as_str());
        let target = self.statement.target();
        if target.is_empty() {
            format!("Datastore/operation/{product}/{operation}")
        } else {
            format!("Datastore/statement/{product}/{target}/{operation}")
        }
    }
}

/// Everything recorded for one completed transaction.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub name: String,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub root: Option<TraceSegment>,
    pub slow_sql: Vec<SlowSqlNode>,
    pub span_events: Vec<SpanEvent>,
}

impl TransactionRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, start_time: SystemTime, end_time: SystemTime) -> Self {
        Self {
            name: name.into(),
            start_time,
            end_time,
            root: None,
            slow_sql: Vec::new(),
            span_events: Vec::new(),
        }
    }

    pub fn duration(&self) -> Result<Duration, StatsError> {
        self.end_time.duration_since(self.start_time).map_err(|_| {
            StatsError::InvalidRecord(format!("transaction {} ends before it starts", self.name))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowSqlPayload {
    pub path: String,
    pub sql_id: String,
    pub sql: String,
    pub database_metric_name: String,
    pub count: u64,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub explain_plan: Option<ExplainPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionTracePayload {
    pub name: String,
    pub start_time_ms: u64,
    pub duration_ms: f64,
    pub root: Option<Value>,
}

#[derive(Debug, Clone)]
struct SlowSqlEntry {
    path: String,
    node: SlowSqlNode,
}

#[derive(Debug, Clone)]
struct TraceSample {
    name: String,
    start_time: SystemTime,
    duration: Duration,
    root: Option<TraceSegment>,
}

/// Keeps the first `capacity` events while counting every event offered.
#[derive(Debug, Clone)]
struct EventReservoir<T> {
    capacity: usize,
    samples: Vec<T>,
    seen: u64,
}

impl<T> Default for EventReservoir<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> EventReservoir<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Vec::new(),
            seen: 0,
        }
    }

    fn add(&mut self, event: T) {
        self.seen += 1;
        if self.samples.len() < self.capacity {
            self.samples.push(event);
        }
    }

    fn merge(&mut self, other: EventReservoir<T>) {
        self.seen += other.seen;
        let room = self.capacity.saturating_sub(self.samples.len());
        self.samples.extend(other.samples.into_iter().take(room));
    }

    fn take(&mut self) -> Self {
        mem::replace(self, Self::new(self.capacity))
    }

    fn sampling_info(&self) -> SamplingInfo {
        SamplingInfo {
            reservoir_size: self.capacity,
            events_seen: self.seen,
        }
    }
}

#[derive(Debug, Default)]
pub struct StatsEngine {
    settings: Option<Arc<SessionConfiguration>>,
    metrics: HashMap<String, TimeStats>,
    slow_sql: Vec<SlowSqlEntry>,
    transaction_trace: Option<TraceSample>,
    span_events: EventReservoir<SpanEvent>,
    custom_events: EventReservoir<CustomEvent>,
}

impl StatsEngine {
    /// An engine with no session settings; it records nothing until
    /// [`Self::reset_stats`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_settings(settings: Option<Arc<SessionConfiguration>>) -> Self {
        let (span_capacity, custom_capacity) = settings.as_ref().map_or((0, 0), |s| {
            (
                s.span_events.max_samples_stored,
                s.custom_insights_events.max_samples_stored,
            )
        });
        Self {
            settings,
            metrics: HashMap::new(),
            slow_sql: Vec::new(),
            transaction_trace: None,
            span_events: EventReservoir::new(span_capacity),
            custom_events: EventReservoir::new(custom_capacity),
        }
    }

    #[must_use]
    pub fn settings(&self) -> Option<&Arc<SessionConfiguration>> {
        self.settings.as_ref()
    }

    /// Clears all data and adopts the settings of a new session.
    pub fn reset_stats(&mut self, settings: Arc<SessionConfiguration>) {
        *self = Self::with_settings(Some(settings));
    }

    /// An empty engine sharing these settings, used to record one
    /// transaction before merging it in.
    #[must_use]
    pub fn create_work_area(&self) -> StatsEngine {
        Self::with_settings(self.settings.clone())
    }

    #[must_use]
    pub fn metrics_count(&self) -> usize {
        self.metrics.len()
    }

    fn metric_limit(&self) -> usize {
        self.settings
            .as_ref()
            .map_or(usize::MAX, |s| s.agent_limits.max_metric_contexts)
    }

    fn slow_sql_limit(&self) -> usize {
        self.settings
            .as_ref()
            .map_or(usize::MAX, |s| s.agent_limits.slow_sql_data)
    }

    /// Records one timed value. Fails without recording when `name` is new
    /// and the metric table is full.
    pub fn record_time_metric(&mut self, name: &str, value: f64) -> Result<(), StatsError> {
        if let Some(stats) = self.metrics.get_mut(name) {
            stats.record(value);
            return Ok(());
        }
        if self.metrics.len() >= self.metric_limit() {
            return Err(StatsError::Overflow { dropped: 1 });
        }
        self.metrics.entry(name.to_string()).or_default().record(value);
        Ok(())
    }

    pub fn record_custom_metric(&mut self, name: &str, value: f64) -> Result<(), StatsError> {
        self.record_time_metric(name, value)
    }

    pub fn record_custom_event(&mut self, event: CustomEvent) {
        self.custom_events.add(event);
    }

    pub fn record_transaction(&mut self, record: &TransactionRecord) -> Result<(), StatsError> {
        let Some(settings) = self.settings.clone() else {
            return Ok(());
        };
        let duration = record.duration()?;

        let mut dropped = 0;
        if self
            .record_time_metric(&record.name, duration.as_secs_f64())
            .is_err()
        {
            dropped += 1;
        }
        for node in &record.slow_sql {
            if self
                .record_time_metric(&node.metric_name(), node.duration.as_secs_f64())
                .is_err()
            {
                dropped += 1;
            }
        }

        if settings.slow_sql_enabled() {
            let threshold = settings.explain_threshold();
            let limit = self.slow_sql_limit();
            let maximum = settings.agent_limits.sql_query_length_maximum;
            for node in record.slow_sql.iter().filter(|n| n.duration >= threshold) {
                let mut node = node.clone();
                node.statement = node.statement.truncated(maximum);
                self.add_slow_sql(
                    SlowSqlEntry {
                        path: record.name.clone(),
                        node,
                    },
                    limit,
                );
            }
        }

        if settings.transaction_traces_enabled() && duration >= settings.transaction_threshold() {
            self.offer_trace(TraceSample {
                name: record.name.clone(),
                start_time: record.start_time,
                duration,
                root: record.root.clone(),
            });
        }

        if settings.span_events_enabled() {
            for event in &record.span_events {
                self.span_events.add(event.clone());
            }
        }

        if dropped > 0 {
            return Err(StatsError::Overflow { dropped });
        }
        Ok(())
    }

    /// Keeps at most `limit` nodes, preferring the slowest.
    fn add_slow_sql(&mut self, entry: SlowSqlEntry, limit: usize) {
        if self.slow_sql.len() < limit {
            self.slow_sql.push(entry);
            return;
        }
        let fastest = self
            .slow_sql
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.node.duration)
            .map(|(index, e)| (index, e.node.duration));
        if let Some((index, duration)) = fastest {
            if entry.node.duration > duration {
                self.slow_sql[index] = entry;
            }
        }
    }

    fn offer_trace(&mut self, sample: TraceSample) {
        let slower = match &self.transaction_trace {
            Some(current) => sample.duration > current.duration,
            None => true,
        };
        if slower {
            self.transaction_trace = Some(sample);
        }
    }

    /// Adds `metrics` into this engine, returning how many new names did not fit.
    fn merge_metrics(&mut self, metrics: HashMap<String, TimeStats>) -> usize {
        let limit = self.metric_limit();
        let mut dropped = 0;
        for (name, stats) in metrics {
            if let Some(existing) = self.metrics.get_mut(&name) {
                existing.merge(&stats);
            } else if self.metrics.len() < limit {
                self.metrics.insert(name, stats);
            } else {
                dropped += 1;
            }
        }
        dropped
    }

    /// Folds `other` into this engine. Everything that fits is merged even
    /// when some metrics overflow.
    pub fn merge(&mut self, other: StatsEngine) -> Result<(), StatsError> {
        let dropped = self.merge_metrics(other.metrics);

        let limit = self.slow_sql_limit();
        for entry in other.slow_sql {
            self.add_slow_sql(entry, limit);
        }
        if let Some(sample) = other.transaction_trace {
            self.offer_trace(sample);
        }
        self.span_events.merge(other.span_events);
        self.custom_events.merge(other.custom_events);

        if dropped > 0 {
            return Err(StatsError::Overflow { dropped });
        }
        Ok(())
    }

    /// Moves the accumulated data out, leaving this engine empty.
    ///
    /// A flexible snapshot carries only metrics and span events; slow SQL,
    /// transaction traces and custom events stay behind for the next full
    /// harvest.
    pub fn harvest_snapshot(&mut self, flexible: bool) -> StatsEngine {
        let mut snapshot = self.create_work_area();
        snapshot.metrics = mem::take(&mut self.metrics);
        snapshot.span_events = self.span_events.take();
        if !flexible {
            snapshot.slow_sql = mem::take(&mut self.slow_sql);
            snapshot.transaction_trace = self.transaction_trace.take();
            snapshot.custom_events = self.custom_events.take();
        }
        snapshot
    }

    /// Returns an undelivered snapshot's metrics to this engine so the next
    /// harvest reports them.
    pub fn rollback(&mut self, snapshot: StatsEngine) {
        debug!(
            "Performing rollback of data into subsequent harvest period. Metric data count {}",
            snapshot.metrics.len()
        );
        let dropped = self.merge_metrics(snapshot.metrics);
        if dropped > 0 {
            warn!("Metric table full, {dropped} metric(s) lost during rollback");
        }
    }

    /// Metric data sorted by name.
    #[must_use]
    pub fn metric_data(&self) -> Vec<MetricData> {
        let mut data: Vec<MetricData> = self
            .metrics
            .iter()
            .map(|(name, stats)| MetricData {
                name: name.clone(),
                stats: *stats,
            })
            .collect();
        data.sort_by(|a, b| a.name.cmp(&b.name));
        data
    }

    #[must_use]
    pub fn span_events(&self) -> (SamplingInfo, &[SpanEvent]) {
        (self.span_events.sampling_info(), &self.span_events.samples)
    }

    pub fn reset_span_events(&mut self) {
        self.span_events = EventReservoir::new(self.span_events.capacity);
    }

    #[must_use]
    pub fn custom_events(&self) -> (SamplingInfo, &[CustomEvent]) {
        (self.custom_events.sampling_info(), &self.custom_events.samples)
    }

    pub fn reset_custom_events(&mut self) {
        self.custom_events = EventReservoir::new(self.custom_events.capacity);
    }

    /// Slow SQL grouped by statement identifier, slowest group first, at most
    /// `sql_explain_plans` groups.
    ///
    /// Each group reports the slowest node's statement; that node is explained
    /// when explain plans are enabled and a driver was captured with it, until
    /// `sql_explain_plans_per_harvest` explain queries have been run.
    pub fn slow_sql_data(&self, connections: &mut SqlConnections) -> Vec<SlowSqlPayload> {
        let Some(settings) = &self.settings else {
            return Vec::new();
        };
        let record_sql = settings.record_sql();
        if !settings.slow_sql_enabled() || record_sql == RecordSql::Off {
            return Vec::new();
        }

        let mut groups: Vec<(&SlowSqlEntry, TimeStats)> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for entry in &self.slow_sql {
            let position = *index
                .entry(entry.node.statement.identifier())
                .or_insert_with(|| {
                    groups.push((entry, TimeStats::default()));
                    groups.len() - 1
                });
            let (slowest, stats) = &mut groups[position];
            stats.record(entry.node.duration.as_secs_f64());
            if entry.node.duration > slowest.node.duration {
                *slowest = entry;
            }
        }
        groups.sort_by(|a, b| b.0.node.duration.cmp(&a.0.node.duration));
        groups.truncate(settings.agent_limits.sql_explain_plans);

        let tracer = &settings.transaction_tracer;
        let mut explains_left = settings.agent_limits.sql_explain_plans_per_harvest;
        groups
            .into_iter()
            .map(|(slowest, stats)| {
                let node = &slowest.node;
                let plan = node.explain.as_ref().and_then(|request| {
                    if !tracer.explain_enabled || node.duration < settings.explain_threshold() {
                        return None;
                    }
                    if explains_left == 0 {
                        debug!(
                            "Explain plan limit reached, not explaining {}",
                            node.statement.identifier()
                        );
                        return None;
                    }
                    explains_left -= 1;
                    explain_plan(
                        connections,
                        &node.statement,
                        request,
                        record_sql,
                        tracer.explain_plan_obfuscation,
                    )
                });
                SlowSqlPayload {
                    path: slowest.path.clone(),
                    sql_id: node.statement.identifier().to_string(),
                    sql: node.statement.formatted(record_sql).to_string(),
                    database_metric_name: node.metric_name(),
                    count: stats.call_count,
                    total_ms: stats.total_call_time * 1000.0,
                    min_ms: stats.min_call_time * 1000.0,
                    max_ms: stats.max_call_time * 1000.0,
                    explain_plan: plan,
                }
            })
            .collect()
    }

    #[must_use]
    pub fn transaction_trace_data(&self) -> Vec<TransactionTracePayload> {
        let Some(settings) = &self.settings else {
            return Vec::new();
        };
        if !settings.transaction_traces_enabled() {
            return Vec::new();
        }
        let record_sql = settings.record_sql();
        let maximum = settings.agent_limits.sql_query_length_maximum;
        self.transaction_trace
            .iter()
            .map(|sample| TransactionTracePayload {
                name: sample.name.clone(),
                start_time_ms: epoch_millis(sample.start_time),
                duration_ms: millis(sample.duration),
                root: sample
                    .root
                    .as_ref()
                    .map(|root| root.to_value(record_sql, maximum)),
            })
            .collect()
    }

    /// Human-readable summary for diagnostics.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "metrics={} slow_sql={} traces={} span_events={}/{} custom_events={}/{}",
            self.metrics.len(),
            self.slow_sql.len(),
            usize::from(self.transaction_trace.is_some()),
            self.span_events.samples.len(),
            self.span_events.seen,
            self.custom_events.samples.len(),
            self.custom_events.seen,
        )
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
