// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock collector sessions, data samplers and database drivers

use apm_harvest::{
    CollectorError, CollectorSession, CustomEvent, DataSampler, EnvironmentInfo, MetricData,
    MetricPeriod, SamplingInfo, SessionConfiguration, SessionFactory, Settings, SlowSqlPayload,
    SpanEvent, TransactionTracePayload,
};
use serde_json::Value;
use sql_fingerprint::{
    ConnectParams, DatabaseClient, DatabaseConnection, ExplainError, ExplainPlan,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Everything a session was asked to do, in order.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    MetricData {
        period: MetricPeriod,
        metrics: Vec<MetricData>,
    },
    SpanEvents {
        sampling_info: SamplingInfo,
        events: Vec<SpanEvent>,
    },
    CustomEvents {
        sampling_info: SamplingInfo,
        events: Vec<CustomEvent>,
    },
    SqlTraces(Vec<SlowSqlPayload>),
    TransactionTraces(Vec<TransactionTracePayload>),
    Finalize,
    ShutdownSession,
}

impl SessionCall {
    #[allow(dead_code)]
    pub fn endpoint(&self) -> &'static str {
        match self {
            SessionCall::MetricData { .. } => "metric_data",
            SessionCall::SpanEvents { .. } => "span_event_data",
            SessionCall::CustomEvents { .. } => "custom_event_data",
            SessionCall::SqlTraces(_) => "sql_trace_data",
            SessionCall::TransactionTraces(_) => "transaction_sample_data",
            SessionCall::Finalize => "finalize",
            SessionCall::ShutdownSession => "shutdown",
        }
    }
}

/// Records every call; individual endpoints can be made to fail once.
pub struct MockSession {
    configuration: Arc<SessionConfiguration>,
    calls: Mutex<Vec<SessionCall>>,
    failures: Mutex<HashMap<&'static str, CollectorError>>,
    closed_connections: AtomicUsize,
}

#[allow(dead_code)]
impl MockSession {
    pub fn new(configuration: SessionConfiguration) -> Arc<Self> {
        Arc::new(Self {
            configuration: Arc::new(configuration),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            closed_connections: AtomicUsize::new(0),
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(SessionConfiguration::default())
    }

    /// The next call to `endpoint` fails with `error`.
    pub fn fail_next(&self, endpoint: &'static str, error: CollectorError) {
        self.failures.lock().unwrap().insert(endpoint, error);
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<SessionCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn endpoints(&self) -> Vec<&'static str> {
        self.calls().iter().map(SessionCall::endpoint).collect()
    }

    /// Metric payloads sent so far.
    pub fn metric_batches(&self) -> Vec<(MetricPeriod, Vec<MetricData>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SessionCall::MetricData { period, metrics } => Some((period, metrics)),
                _ => None,
            })
            .collect()
    }

    pub fn closed_connections(&self) -> usize {
        self.closed_connections.load(Ordering::SeqCst)
    }

    fn respond(&self, call: SessionCall) -> Result<(), CollectorError> {
        let endpoint = call.endpoint();
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().remove(endpoint) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl CollectorSession for MockSession {
    fn configuration(&self) -> Arc<SessionConfiguration> {
        self.configuration.clone()
    }

    async fn send_metric_data(
        &self,
        period: MetricPeriod,
        metrics: Vec<MetricData>,
    ) -> Result<(), CollectorError> {
        self.respond(SessionCall::MetricData { period, metrics })
    }

    async fn send_span_events(
        &self,
        sampling_info: SamplingInfo,
        events: Vec<SpanEvent>,
    ) -> Result<(), CollectorError> {
        self.respond(SessionCall::SpanEvents {
            sampling_info,
            events,
        })
    }

    async fn send_custom_events(
        &self,
        sampling_info: SamplingInfo,
        events: Vec<CustomEvent>,
    ) -> Result<(), CollectorError> {
        self.respond(SessionCall::CustomEvents {
            sampling_info,
            events,
        })
    }

    async fn send_sql_traces(&self, traces: Vec<SlowSqlPayload>) -> Result<(), CollectorError> {
        self.respond(SessionCall::SqlTraces(traces))
    }

    async fn send_transaction_traces(
        &self,
        traces: Vec<TransactionTracePayload>,
    ) -> Result<(), CollectorError> {
        self.respond(SessionCall::TransactionTraces(traces))
    }

    async fn finalize(&self) -> Result<(), CollectorError> {
        self.respond(SessionCall::Finalize)
    }

    async fn shutdown_session(&self) -> Result<(), CollectorError> {
        self.respond(SessionCall::ShutdownSession)
    }

    fn close_connection(&self) {
        self.closed_connections.fetch_add(1, Ordering::SeqCst);
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Connect,
    Unreachable,
    Fail(CollectorError),
}

/// Plays back scripted connect outcomes, then falls back to `otherwise`.
pub struct MockSessionFactory {
    session: Arc<MockSession>,
    script: Mutex<VecDeque<ConnectOutcome>>,
    otherwise: ConnectOutcome,
    attempts: AtomicUsize,
}

#[allow(dead_code)]
impl MockSessionFactory {
    pub fn connecting(session: Arc<MockSession>) -> Arc<Self> {
        Self::scripted(session, Vec::new())
    }

    pub fn scripted(session: Arc<MockSession>, script: Vec<ConnectOutcome>) -> Arc<Self> {
        Arc::new(Self {
            session,
            script: Mutex::new(script.into()),
            otherwise: ConnectOutcome::Connect,
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn failing(session: Arc<MockSession>, outcome: ConnectOutcome) -> Arc<Self> {
        Arc::new(Self {
            session,
            script: Mutex::new(VecDeque::new()),
            otherwise: outcome,
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SessionFactory for MockSessionFactory {
    async fn create_session(
        &self,
        _app_name: &str,
        _environment: &EnvironmentInfo,
        _settings: &Settings,
    ) -> Result<Option<Arc<dyn CollectorSession>>, CollectorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.otherwise.clone());
        match outcome {
            ConnectOutcome::Connect => {
                let session: Arc<dyn CollectorSession> = self.session.clone();
                Ok(Some(session))
            }
            ConnectOutcome::Unreachable => Ok(None),
            ConnectOutcome::Fail(error) => Err(error),
        }
    }
}

/// Counts how often it was started and stopped.
pub struct RecordingSampler {
    name: String,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingSampler {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
        })
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl DataSampler for RecordingSampler {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Database driver whose explain queries echo the query text back.
#[derive(Default)]
pub struct EchoDatabaseClient {
    connections_opened: AtomicUsize,
    connections_closed: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl EchoDatabaseClient {
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    pub fn connections_closed(&self) -> usize {
        self.connections_closed.load(Ordering::SeqCst)
    }
}

struct EchoConnection {
    closed: Arc<AtomicUsize>,
}

impl DatabaseClient for EchoDatabaseClient {
    fn name(&self) -> &str {
        "echo"
    }

    fn connect(&self, _params: &ConnectParams) -> Result<Box<dyn DatabaseConnection>, ExplainError> {
        self.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(EchoConnection {
            closed: self.connections_closed.clone(),
        }))
    }
}

impl DatabaseConnection for EchoConnection {
    fn execute(
        &mut self,
        query: &str,
        _cursor_params: &[Value],
        _parameters: &[Value],
    ) -> Result<ExplainPlan, ExplainError> {
        Ok(ExplainPlan {
            columns: vec!["QUERY PLAN".to_string()],
            rows: vec![vec![Value::String(format!("{query} (cost=1.00..2.50 rows=10 width=4)"))]],
        })
    }

    fn close(&mut self) -> Result<(), ExplainError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
