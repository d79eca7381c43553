// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-application agent state: the collector session lifecycle, the shared
//! statistics that transactions are recorded into, and the harvest cycle that
//! ships them.
//!
//! Connecting happens on a background task that retries with backoff until
//! the collector answers or shutdown is requested. Harvests and the final
//! step of a successful connect are serialized by one async lock, so a
//! session is never torn down while its first reset is in progress.

use crate::config::{SessionConfiguration, Settings};
use crate::data_sampler::DataSampler;
use crate::environment::EnvironmentInfo;
use crate::errors::{ApplicationError, CollectorError, StatsError};
use crate::sampler::AdaptiveSampler;
use crate::session::{CollectorSession, MetricPeriod, SessionFactory};
use crate::stats::{CustomEvent, StatsEngine, TransactionRecord};
use serde_json::{Map, Value};
use sql_fingerprint::SqlConnections;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex as TokioMutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Lets the code that triggered activation finish before the first connect.
const CONNECT_YIELD_DELAY: Duration = Duration::from_millis(10);

/// Shortest period a shutdown harvest reports when it has data.
const MINIMUM_SHUTDOWN_PERIOD: Duration = Duration::from_millis(1001);

/// Stored in place of the registration pid once the fork warning was logged.
const PROCESS_ALREADY_WARNED: u32 = 0;

const MAX_EVENT_TYPE_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    Quiet,
    Warn,
    Error,
}

/// Delay before each reconnect attempt. The last entry repeats forever.
const CONNECT_BACKOFF: [(u64, Escalation); 6] = [
    (15, Escalation::Quiet),
    (15, Escalation::Quiet),
    (30, Escalation::Quiet),
    (60, Escalation::Warn),
    (120, Escalation::Quiet),
    (300, Escalation::Error),
];

type PostActivationCallback = Arc<dyn Fn() + Send + Sync>;

struct StandardStats {
    engine: StatsEngine,
    transaction_count: u64,
    last_transaction: Option<SystemTime>,
    sampler: Option<AdaptiveSampler>,
}

struct CustomStats {
    engine: StatsEngine,
    global_events_count: u64,
}

struct Inner {
    name: String,
    settings: Settings,
    environment: EnvironmentInfo,
    factory: Arc<dyn SessionFactory>,
    creation_time: SystemTime,
    clock_anchor: (SystemTime, Instant),
    recorded_pid: AtomicU32,

    active_session: RwLock<Option<Arc<dyn CollectorSession>>>,
    connecting: AtomicBool,
    harvest_enabled: AtomicBool,
    pending_shutdown: AtomicBool,
    agent_shutdown: AtomicBool,
    shutdown: CancellationToken,
    connected: watch::Sender<bool>,
    lifecycle: TokioMutex<()>,

    standard: Mutex<StandardStats>,
    custom: Mutex<CustomStats>,
    period_start: Mutex<Instant>,
    data_samplers: Mutex<Vec<Arc<dyn DataSampler>>>,
    post_activation: Mutex<Option<PostActivationCallback>>,

    harvest_count: AtomicU64,
    discard_count: AtomicU64,
    restart_count: AtomicU64,
}

/// Handle to one monitored application. Cheap to clone.
#[derive(Clone)]
pub struct Application {
    inner: Arc<Inner>,
}

#[allow(clippy::expect_used)]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("lock poisoned")
}

#[allow(clippy::expect_used)]
fn read<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().expect("lock poisoned")
}

#[allow(clippy::expect_used)]
fn write<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().expect("lock poisoned")
}

impl Application {
    #[must_use]
    pub fn new(settings: Settings, factory: Arc<dyn SessionFactory>) -> Self {
        Self::with_environment(settings, EnvironmentInfo::capture(), factory)
    }

    #[must_use]
    pub fn with_environment(
        settings: Settings,
        environment: EnvironmentInfo,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        let now = Instant::now();
        let (connected, _) = watch::channel(false);
        let inner = Inner {
            name: settings.app_name.clone(),
            recorded_pid: AtomicU32::new(environment.pid),
            settings,
            environment,
            factory,
            creation_time: SystemTime::now(),
            clock_anchor: (SystemTime::now(), now),
            active_session: RwLock::new(None),
            connecting: AtomicBool::new(false),
            harvest_enabled: AtomicBool::new(false),
            pending_shutdown: AtomicBool::new(false),
            agent_shutdown: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            connected,
            lifecycle: TokioMutex::new(()),
            standard: Mutex::new(StandardStats {
                engine: StatsEngine::new(),
                transaction_count: 0,
                last_transaction: None,
                sampler: None,
            }),
            custom: Mutex::new(CustomStats {
                engine: StatsEngine::new(),
                global_events_count: 0,
            }),
            period_start: Mutex::new(now),
            data_samplers: Mutex::new(Vec::new()),
            post_activation: Mutex::new(None),
            harvest_count: AtomicU64::new(0),
            discard_count: AtomicU64::new(0),
            restart_count: AtomicU64::new(0),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn active_session(&self) -> Option<Arc<dyn CollectorSession>> {
        read(&self.inner.active_session).clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active_session().is_some()
    }

    /// Configuration of the active session, if any.
    #[must_use]
    pub fn configuration(&self) -> Option<Arc<SessionConfiguration>> {
        self.active_session().map(|session| session.configuration())
    }

    /// True once the agent has permanently stopped reporting.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.agent_shutdown.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn harvest_count(&self) -> u64 {
        self.inner.harvest_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn discard_count(&self) -> u64 {
        self.inner.discard_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn restart_count(&self) -> u64 {
        self.inner.restart_count.load(Ordering::SeqCst)
    }

    /// Runs `callback` each time a session becomes active, before waiters on
    /// [`Self::activate_session`] are released.
    pub fn set_post_activation_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *lock(&self.inner.post_activation) = Some(Arc::new(callback));
    }

    fn shutdown_requested(&self) -> bool {
        self.inner.agent_shutdown.load(Ordering::SeqCst)
            || self.inner.pending_shutdown.load(Ordering::SeqCst)
    }

    fn set_active_session(
        &self,
        session: Option<Arc<dyn CollectorSession>>,
    ) -> Option<Arc<dyn CollectorSession>> {
        mem::replace(&mut *write(&self.inner.active_session), session)
    }

    fn wall_clock(&self, instant: Instant) -> SystemTime {
        let (wall, anchor) = self.inner.clock_anchor;
        if instant >= anchor {
            wall + (instant - anchor)
        } else {
            wall - (anchor - instant)
        }
    }

    /// Activates with the configured `startup_timeout`.
    pub async fn activate(&self) -> bool {
        self.activate_session(self.inner.settings.startup_timeout)
            .await
    }

    /// Starts connecting to the collector in the background.
    ///
    /// With a non-zero `timeout`, waits up to that long for the session to
    /// become active. Returns whether a session is active on return.
    pub async fn activate_session(&self, timeout: Option<Duration>) -> bool {
        let inner = &self.inner;
        if self.shutdown_requested() {
            return false;
        }
        if self.is_active() {
            return true;
        }

        self.validate_process();

        let mut connected = inner.connected.subscribe();
        if !inner.connecting.swap(true, Ordering::SeqCst) {
            inner.recorded_pid.store(std::process::id(), Ordering::SeqCst);
            inner.connected.send_replace(false);
            let app = self.clone();
            tokio::spawn(
                async move {
                    app.connect_to_collector().await;
                }
                .instrument(tracing::Span::current()),
            );
        }

        let Some(timeout) = timeout.filter(|t| !t.is_zero()) else {
            return false;
        };
        let connected_in_time = tokio::time::timeout(timeout, connected.wait_for(|c| *c))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false);
        if !connected_in_time {
            debug!(
                "Application {:?} not connected to the collector after {:?}",
                inner.name, timeout
            );
        }
        connected_in_time
    }

    async fn connect_to_collector(&self) {
        if let Some(session) = self.establish_session().await {
            self.complete_activation(&session).await;
            session.close_connection();
        }
        self.inner.connecting.store(false, Ordering::SeqCst);
    }

    /// Retries session creation until it succeeds, fails for good, or
    /// shutdown is requested.
    async fn establish_session(&self) -> Option<Arc<dyn CollectorSession>> {
        let inner = &self.inner;
        if self.shutdown_requested() {
            return None;
        }
        tokio::time::sleep(CONNECT_YIELD_DELAY).await;

        let mut attempt = 0usize;
        loop {
            if self.shutdown_requested() {
                return None;
            }

            let outcome = inner
                .factory
                .create_session(&inner.name, &inner.environment, &inner.settings)
                .await;
            match outcome {
                Ok(Some(session)) => return Some(session),
                Ok(None) => {}
                Err(CollectorError::Network(reason)) => {
                    debug!("Collector unreachable for application {:?}: {reason}", inner.name);
                }
                Err(CollectorError::ForceAgentDisconnect) => {
                    error!(
                        "The collector refused registration of application {:?}. No data will be reported and registration will not be retried.",
                        inner.name
                    );
                    inner.agent_shutdown.store(true, Ordering::SeqCst);
                    inner.shutdown.cancel();
                    return None;
                }
                Err(e) => {
                    if !self.shutdown_requested() {
                        error!(
                            "Unexpected error when registering application {:?} with the collector: {e}",
                            inner.name
                        );
                    }
                    return None;
                }
            }

            let (delay, escalation) = CONNECT_BACKOFF[attempt.min(CONNECT_BACKOFF.len() - 1)];
            if attempt < CONNECT_BACKOFF.len() {
                match escalation {
                    Escalation::Warn => warn!(
                        "Registration of application {:?} with the collector has failed after {} attempts. Will keep retrying every {} seconds.",
                        inner.name,
                        attempt + 1,
                        delay
                    ),
                    Escalation::Error => error!(
                        "Registration of application {:?} with the collector is still failing after {} attempts. Check network connectivity to {}. Retrying every {} seconds.",
                        inner.name,
                        attempt + 1,
                        inner.settings.host,
                        delay
                    ),
                    Escalation::Quiet => {}
                }
            }
            attempt = attempt.saturating_add(1);

            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(delay)) => {}
                () = inner.shutdown.cancelled() => return None,
            }
        }
    }

    async fn complete_activation(&self, session: &Arc<dyn CollectorSession>) {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        if self.shutdown_requested() {
            debug!(
                "Discarding new session for application {:?} as shutdown was requested",
                inner.name
            );
            return;
        }

        let configuration = session.configuration();
        {
            let mut standard = lock(&inner.standard);
            standard.engine.reset_stats(configuration.clone());
            standard.sampler = Some(AdaptiveSampler::new(
                configuration.sampling_target,
                configuration.sampling_period(),
            ));
            standard.transaction_count = 0;
            standard.last_transaction = None;
        }
        {
            let mut custom = lock(&inner.custom);
            custom.engine.reset_stats(configuration);
            custom.global_events_count = 0;
        }
        *lock(&inner.period_start) = Instant::now();

        self.set_active_session(Some(session.clone()));
        inner.harvest_enabled.store(true, Ordering::SeqCst);

        let callback = lock(&inner.post_activation).clone();
        if let Some(callback) = callback {
            callback();
        }
        inner.connected.send_replace(true);
        self.start_data_samplers();

        info!("Reporting to collector for application {:?}", inner.name);
    }

    /// Warns, once, when used from a process other than the one that
    /// registered with the collector.
    pub fn validate_process(&self) {
        let inner = &self.inner;
        let current = std::process::id();
        let recorded = inner.recorded_pid.load(Ordering::SeqCst);
        if recorded == PROCESS_ALREADY_WARNED || recorded == current {
            return;
        }
        if inner
            .recorded_pid
            .compare_exchange(
                recorded,
                PROCESS_ALREADY_WARNED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            warn!(
                "Attempt to activate application or record data for {:?} in a process different to where the agent registered with the collector. No data will be reported for this process with pid {current}. Registration occurred in process with pid {recorded}. Create a new application in the child process instead.",
                inner.name
            );
        }
    }

    /// Records a completed transaction into the standard statistics.
    ///
    /// Failures are logged. They are only returned when record errors are
    /// configured to propagate.
    pub fn record_transaction(&self, record: &TransactionRecord) -> Result<(), ApplicationError> {
        if !self.is_active() {
            return Ok(());
        }
        self.validate_process();

        match self.merge_transaction(record) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    "Unable to record transaction {:?} for application {:?}: {e}",
                    record.name, self.inner.name
                );
                if self.inner.settings.propagate_record_errors {
                    return Err(e.into());
                }
                Ok(())
            }
        }
    }

    fn merge_transaction(&self, record: &TransactionRecord) -> Result<(), StatsError> {
        record.duration()?;

        let mut work_area = {
            let standard = lock(&self.inner.standard);
            if standard.engine.settings().is_none() {
                return Ok(());
            }
            standard.engine.create_work_area()
        };
        let recorded = work_area.record_transaction(record);

        let mut standard = lock(&self.inner.standard);
        standard.transaction_count += 1;
        standard.last_transaction = Some(record.end_time);
        let merged = standard.engine.merge(work_area);
        recorded.and(merged)
    }

    pub fn record_custom_event(&self, event_type: &str, attributes: Map<String, Value>) {
        let Some(session) = self.active_session() else {
            return;
        };
        if !session.configuration().custom_events_enabled() {
            return;
        }
        if !is_valid_event_type(event_type) {
            debug!("Dropping custom event with invalid type {event_type:?}");
            return;
        }

        let event = CustomEvent::new(event_type, attributes);
        let mut custom = lock(&self.inner.custom);
        custom.global_events_count += 1;
        custom.engine.record_custom_event(event);
    }

    pub fn record_custom_metric(&self, name: &str, value: f64) {
        if !self.is_active() {
            return;
        }
        let recorded = lock(&self.inner.standard)
            .engine
            .record_custom_metric(name, value);
        if let Err(e) = recorded {
            debug!("Unable to record custom metric {name:?}: {e}");
        }
    }

    /// Whether the next transaction should be sampled. Always false without
    /// an active session.
    pub fn compute_sampled(&self) -> bool {
        lock(&self.inner.standard)
            .sampler
            .as_mut()
            .is_some_and(AdaptiveSampler::compute_sampled)
    }

    /// Adds a data sampler. It is started right away if a session is active.
    pub fn register_data_source(&self, sampler: Arc<dyn DataSampler>) {
        let mut samplers = lock(&self.inner.data_samplers);
        if self.is_active() {
            debug!("Starting data sampler {}", sampler.name());
            sampler.start();
        }
        samplers.push(sampler);
    }

    /// Removes the data sampler named `name`, stopping it if it is running.
    pub fn remove_data_source(&self, name: &str) -> bool {
        let mut samplers = lock(&self.inner.data_samplers);
        let Some(position) = samplers.iter().position(|s| s.name() == name) else {
            return false;
        };
        let sampler = samplers.remove(position);
        if self.is_active() {
            debug!("Stopping data sampler {}", sampler.name());
            sampler.stop();
        }
        true
    }

    fn start_data_samplers(&self) {
        for sampler in lock(&self.inner.data_samplers).iter() {
            debug!("Starting data sampler {}", sampler.name());
            sampler.start();
        }
    }

    fn stop_data_samplers(&self) {
        for sampler in lock(&self.inner.data_samplers).iter() {
            debug!("Stopping data sampler {}", sampler.name());
            sampler.stop();
        }
    }

    /// Sends accumulated data to the collector.
    ///
    /// A flexible harvest ships metrics and span events only. With `shutdown`
    /// the agent stops reporting once the data has been sent.
    pub async fn harvest(&self, shutdown: bool, flexible: bool) {
        let inner = &self.inner;
        if inner.agent_shutdown.load(Ordering::SeqCst) {
            return;
        }
        if shutdown {
            inner.pending_shutdown.store(true, Ordering::SeqCst);
            inner.shutdown.cancel();
        }

        let _lifecycle = inner.lifecycle.lock().await;
        let Some(session) = self.active_session() else {
            debug!(
                "Cannot perform a data harvest for {:?} as there is no active session",
                inner.name
            );
            return;
        };
        if !inner.harvest_enabled.load(Ordering::SeqCst) {
            debug!(
                "Cannot perform a data harvest for {:?} as harvesting is disabled",
                inner.name
            );
            return;
        }

        let count = inner.harvest_count.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        debug!("Commencing harvest[{count}] of application data for {:?}", inner.name);

        let configuration = session.configuration();
        let (transaction_count, mut snapshot) = {
            let mut standard = lock(&inner.standard);
            standard.last_transaction = None;
            (
                mem::take(&mut standard.transaction_count),
                standard.engine.harvest_snapshot(flexible),
            )
        };

        let mut global_events_count = 0;
        if !flexible {
            let custom_snapshot = {
                let mut custom = lock(&inner.custom);
                global_events_count = mem::take(&mut custom.global_events_count);
                custom.engine.harvest_snapshot(false)
            };
            if let Err(e) = snapshot.merge(custom_snapshot) {
                error!("Unable to merge custom data for {:?}: {e}", inner.name);
            }
        }

        let period_start = *lock(&inner.period_start);
        let mut period_end = Instant::now();
        let data_recorded =
            transaction_count > 0 || global_events_count > 0 || snapshot.metrics_count() > 0;
        if shutdown
            && data_recorded
            && period_end.duration_since(period_start) < Duration::from_secs(1)
        {
            period_end = period_start + MINIMUM_SHUTDOWN_PERIOD;
        }

        let mut period_advanced = false;
        let delivered = self
            .deliver(
                &session,
                &configuration,
                &mut snapshot,
                flexible,
                (period_start, period_end),
                &mut period_advanced,
            )
            .await;
        if let Err(error) = delivered {
            self.handle_harvest_error(error, snapshot, period_advanced)
                .await;
        }

        if shutdown && !inner.agent_shutdown.load(Ordering::SeqCst) {
            self.teardown(false).await;
        }
        session.close_connection();

        debug!(
            "Completed harvest[{count}] for {:?} in {:.2} seconds",
            inner.name,
            started.elapsed().as_secs_f64()
        );
    }

    async fn deliver(
        &self,
        session: &Arc<dyn CollectorSession>,
        configuration: &SessionConfiguration,
        snapshot: &mut StatsEngine,
        flexible: bool,
        (period_start, period_end): (Instant, Instant),
        period_advanced: &mut bool,
    ) -> Result<(), CollectorError> {
        if configuration.span_events_enabled() {
            let (sampling_info, events) = snapshot.span_events();
            if !events.is_empty() {
                let events = events.to_vec();
                session.send_span_events(sampling_info, events).await?;
            }
        }
        snapshot.reset_span_events();

        if !flexible {
            if configuration.custom_events_enabled() {
                let (sampling_info, events) = snapshot.custom_events();
                if !events.is_empty() {
                    let events = events.to_vec();
                    session.send_custom_events(sampling_info, events).await?;
                }
            }
            snapshot.reset_custom_events();

            if configuration.collect_traces {
                let slow_sql = {
                    let mut connections =
                        SqlConnections::new(configuration.agent_limits.max_sql_connections);
                    let slow_sql = snapshot.slow_sql_data(&mut connections);
                    connections.cleanup();
                    slow_sql
                };
                if !slow_sql.is_empty() {
                    session.send_sql_traces(slow_sql).await?;
                }

                let traces = snapshot.transaction_trace_data();
                if !traces.is_empty() {
                    session.send_transaction_traces(traces).await?;
                }
            }
        }

        let period = MetricPeriod {
            start: self.wall_clock(period_start),
            end: self.wall_clock(period_end),
        };
        session
            .send_metric_data(period, snapshot.metric_data())
            .await?;
        *lock(&self.inner.period_start) = period_end;
        *period_advanced = true;

        session.finalize().await
    }

    async fn handle_harvest_error(
        &self,
        error: CollectorError,
        snapshot: StatsEngine,
        period_advanced: bool,
    ) {
        let name = &self.inner.name;
        match error {
            CollectorError::ForceAgentRestart => {
                info!("Collector requested an agent restart for application {name:?}");
                self.teardown(true).await;
            }
            CollectorError::ForceAgentDisconnect => {
                error!(
                    "Collector requested the agent disconnect for application {name:?}. Reporting has stopped."
                );
                self.teardown(false).await;
            }
            CollectorError::RetryDataForRequest(reason) | CollectorError::Network(reason) => {
                if period_advanced {
                    debug!(
                        "Harvest for {name:?} failed after metric data was accepted ({reason}); nothing to roll back"
                    );
                } else {
                    debug!("Harvest for {name:?} will be retried: {reason}");
                    lock(&self.inner.standard).engine.rollback(snapshot);
                }
            }
            CollectorError::DiscardDataForRequest(reason) => {
                self.inner.discard_count.fetch_add(1, Ordering::SeqCst);
                warn!("Harvest data for application {name:?} was discarded: {reason}");
            }
            CollectorError::Other(reason) => {
                error!(
                    "Unexpected error when harvesting data for application {name:?}: {reason}. The data has been lost."
                );
            }
        }
    }

    /// Tears down the active session. With `restart`, a new session is
    /// requested; otherwise the agent stops reporting for good.
    pub async fn internal_agent_shutdown(&self, restart: bool) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.teardown(restart).await;
    }

    async fn teardown(&self, restart: bool) {
        let inner = &self.inner;
        self.stop_data_samplers();

        let session = self.set_active_session(None);
        inner.harvest_enabled.store(false, Ordering::SeqCst);
        inner.connected.send_replace(false);

        if let Some(session) = session {
            if !restart {
                if let Err(e) = session.shutdown_session().await {
                    debug!("Error closing collector session for {:?}: {e}", inner.name);
                }
            }
            session.close_connection();
        }

        if restart {
            inner.restart_count.fetch_add(1, Ordering::SeqCst);
            info!("Restarting agent for application {:?}", inner.name);
            self.activate_session(None).await;
        } else {
            inner.agent_shutdown.store(true, Ordering::SeqCst);
            inner.shutdown.cancel();
            info!("Agent for application {:?} has shut down", inner.name);
        }
    }

    /// Writes a diagnostic summary of this application's state.
    pub fn dump(&self, writer: &mut dyn io::Write) -> io::Result<()> {
        let inner = &self.inner;
        let (transaction_count, last_transaction, standard_summary) = {
            let standard = lock(&inner.standard);
            (
                standard.transaction_count,
                standard.last_transaction,
                standard.engine.summary(),
            )
        };
        let (global_events_count, custom_summary) = {
            let custom = lock(&inner.custom);
            (custom.global_events_count, custom.engine.summary())
        };
        let samplers: Vec<String> = lock(&inner.data_samplers)
            .iter()
            .map(|s| s.name().to_string())
            .collect();

        writeln!(writer, "Application: {}", inner.name)?;
        writeln!(writer, "Time Created: {}", epoch_seconds(inner.creation_time))?;
        writeln!(
            writer,
            "Registration PID: {}",
            inner.recorded_pid.load(Ordering::SeqCst)
        )?;
        writeln!(writer, "Active Session: {}", self.is_active())?;
        writeln!(writer, "Harvest Count: {}", self.harvest_count())?;
        writeln!(writer, "Discarded Harvests: {}", self.discard_count())?;
        writeln!(writer, "Agent Restarts: {}", self.restart_count())?;
        writeln!(writer, "Forced Shutdown: {}", self.is_shutdown())?;
        writeln!(writer, "Transaction Count: {transaction_count}")?;
        writeln!(
            writer,
            "Last Transaction: {}",
            last_transaction.map_or_else(|| "none".to_string(), |t| epoch_seconds(t).to_string())
        )?;
        writeln!(writer, "Global Events Count: {global_events_count}")?;
        writeln!(writer, "Standard Stats: {standard_summary}")?;
        writeln!(writer, "Custom Stats: {custom_summary}")?;
        writeln!(writer, "Data Samplers: {}", samplers.join(", "))?;
        if let Some(configuration) = self.configuration() {
            writeln!(
                writer,
                "Sampling Target: {} per {}s",
                configuration.sampling_target,
                configuration.sampling_period().as_secs()
            )?;
        }
        Ok(())
    }
}

fn epoch_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

fn is_valid_event_type(event_type: &str) -> bool {
    !event_type.is_empty()
        && event_type.len() <= MAX_EVENT_TYPE_LENGTH
        && event_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | ' '))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tracing_test::traced_test;

    /// Never reaches the collector; remembers when each attempt happened.
    #[derive(Default)]
    struct UnreachableFactory {
        attempts: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl SessionFactory for UnreachableFactory {
        async fn create_session(
            &self,
            _app_name: &str,
            _environment: &EnvironmentInfo,
            _settings: &Settings,
        ) -> Result<Option<Arc<dyn CollectorSession>>, CollectorError> {
            self.attempts.lock().unwrap().push(Instant::now());
            Ok(None)
        }
    }

    fn application(factory: Arc<UnreachableFactory>) -> Application {
        let settings = Settings {
            app_name: "unit".to_string(),
            ..Default::default()
        };
        Application::new(settings, factory)
    }

    #[test]
    #[traced_test]
    fn test_validate_process_warns_once() {
        let app = application(Arc::default());
        app.inner
            .recorded_pid
            .store(std::process::id().wrapping_add(1), Ordering::SeqCst);

        app.validate_process();
        app.validate_process();

        assert_eq!(
            app.inner.recorded_pid.load(Ordering::SeqCst),
            PROCESS_ALREADY_WARNED
        );
        logs_assert(|lines: &[&str]| {
            let warnings = lines
                .iter()
                .filter(|line| line.contains("in a process different to where the agent registered"))
                .count();
            match warnings {
                1 => Ok(()),
                n => Err(format!("expected one warning, found {n}")),
            }
        });
    }

    #[test]
    fn test_validate_process_is_quiet_in_registering_process() {
        let app = application(Arc::default());
        app.validate_process();
        assert_eq!(
            app.inner.recorded_pid.load(Ordering::SeqCst),
            std::process::id()
        );
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_connect_backoff_schedule() {
        let factory = Arc::new(UnreachableFactory::default());
        let app = application(factory.clone());

        assert!(!app.activate_session(None).await);
        tokio::time::sleep(Duration::from_secs(900)).await;

        let attempts = factory.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 8);
        let gaps: Vec<u64> = attempts
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
            .collect();
        let expected = [15, 15, 30, 60, 120, 300, 300];
        for (gap, seconds) in gaps.iter().zip(expected) {
            assert!(gap.abs_diff(seconds * 1000) <= 5, "gaps were {gaps:?}");
        }

        assert!(logs_contain("has failed after 4 attempts"));
        assert!(logs_contain("is still failing after 6 attempts"));
        assert!(!logs_contain("after 7 attempts"));
        assert!(!app.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let factory = Arc::new(UnreachableFactory::default());
        let app = application(factory.clone());

        app.activate_session(None).await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(factory.attempts.lock().unwrap().len(), 2);

        app.harvest(true, false).await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(factory.attempts.lock().unwrap().len(), 2);
        assert!(!app.inner.connecting.load(Ordering::SeqCst));
        assert!(!app.activate_session(None).await);
    }

    #[test]
    fn test_event_type_validation() {
        assert!(is_valid_event_type("Purchase"));
        assert!(is_valid_event_type("checkout:step 2"));
        assert!(!is_valid_event_type(""));
        assert!(!is_valid_event_type("bad-type"));
        assert!(!is_valid_event_type(&"x".repeat(256)));
    }

    #[test]
    fn test_compute_sampled_without_session() {
        let app = application(Arc::default());
        assert!(!app.compute_sampled());
    }
}
