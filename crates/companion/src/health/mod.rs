//! Health monitoring for the companion service.
//!
//! The [`HealthMonitor`] owns the single authoritative [`ServiceHealthStatus`]
//! for a companion service. It probes the service on a timer, counts
//! consecutive failures, runs one bounded recovery attempt per failure
//! episode, and publishes a snapshot to every subscriber after each cycle.
//!
//! ## Design
//!
//! - **Explicit lifetime**: the monitor is constructed and shared by the
//!   caller; nothing starts until [`HealthMonitor::start_monitoring`] and the
//!   timer runs until [`HealthMonitor::stop_monitoring`] (or until every
//!   handle is dropped).
//! - **Fixed-delay scheduling**: the next cycle is scheduled after the previous
//!   one completes, so probes never overlap. Forced checks share a lock with
//!   the timer for the same reason.
//! - **Failures are states**: a probe cycle never returns an error; every
//!   outcome is folded into the status.
//! - **Copies out**: readers always receive owned snapshots.

mod broadcast;
mod notify;
mod probe;

pub use broadcast::StatusSubscription;
pub use notify::{ChannelNotifier, MonitorNotification, NotificationSink, TracingNotifier};
pub use probe::{AvailabilityCache, AvailabilityProbe, DEFAULT_PROBE_TTL};

use crate::open::OpenRequestClient;
use broadcast::StatusBroadcaster;
use chrono::Utc;
use docbridge_types::{DocumentRef, MonitoringConfig, MonitoringConfigPatch, OpenResult, ServiceHealthStatus};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeout of a regular probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait before the recovery probe.
pub const RECOVERY_BACKOFF: Duration = Duration::from_secs(2);

/// Timeout of the recovery probe.
pub const RECOVERY_PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// `is_service_available` reports false from this many consecutive errors on.
pub const AVAILABILITY_ERROR_THRESHOLD: u32 = 3;

/// Number of probe latencies kept for the moving average.
const RESPONSE_TIME_SAMPLES: usize = 10;

#[derive(Debug)]
struct MonitorState {
    status: ServiceHealthStatus,
    response_times: VecDeque<f64>,
    last_success: Option<Instant>,
    /// Set once recovery ran in the current failure episode.
    recovery_attempted: bool,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            status: ServiceHealthStatus::new(),
            response_times: VecDeque::with_capacity(RESPONSE_TIME_SAMPLES),
            last_success: None,
            recovery_attempted: false,
        }
    }

    fn record_response_time(&mut self, elapsed_ms: f64) {
        if self.response_times.len() >= RESPONSE_TIME_SAMPLES {
            self.response_times.pop_front();
        }
        self.response_times.push_back(elapsed_ms);
        self.status.average_response_time_ms = self.response_times.iter().sum::<f64>() / self.response_times.len() as f64;
    }

    fn record_success(&mut self) {
        self.status.mark_available();
        self.last_success = Some(Instant::now());
        self.recovery_attempted = false;
    }

    fn snapshot(&self) -> ServiceHealthStatus {
        let mut status = self.status.clone();
        status.uptime = self.last_success.map(|at| at.elapsed());
        status
    }
}

#[derive(Debug)]
struct MonitorTimer {
    cancel: CancellationToken,
}

struct MonitorInner {
    config: Mutex<MonitoringConfig>,
    state: Mutex<MonitorState>,
    timer: Mutex<Option<MonitorTimer>>,
    /// Serializes probe cycles.
    cycle: tokio::sync::Mutex<()>,
    probe: Arc<dyn AvailabilityProbe>,
    opener: OpenRequestClient,
    notifier: Arc<dyn NotificationSink>,
    listeners: StatusBroadcaster,
}

impl MonitorInner {
    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config(&self) -> MonitoringConfig {
        self.config.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn timer(&self) -> MutexGuard<'_, Option<MonitorTimer>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Supervisor for the companion service's health.
///
/// Cloning is cheap and every clone refers to the same monitor. Callers are
/// expected to create one monitor per companion service and share it.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.inner.config())
            .field("status", &self.get_status())
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(
        config: MonitoringConfig,
        probe: Arc<dyn AvailabilityProbe>,
        opener: OpenRequestClient,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let state = MonitorState::new();
        let listeners = StatusBroadcaster::new(state.snapshot());
        Self {
            inner: Arc::new(MonitorInner {
                config: Mutex::new(config),
                state: Mutex::new(state),
                timer: Mutex::new(None),
                cycle: tokio::sync::Mutex::new(()),
                probe,
                opener,
                notifier,
                listeners,
            }),
        }
    }

    /// Monitor backed by an [`AvailabilityCache`] over `opener`, logging
    /// notifications through `tracing`.
    pub fn with_defaults(config: MonitoringConfig, opener: OpenRequestClient) -> Self {
        let probe = Arc::new(AvailabilityCache::new(opener.clone()).with_debug(config.debug));
        Self::new(config, probe, opener, Arc::new(TracingNotifier))
    }

    /// Start periodic probing. Runs one probe immediately.
    ///
    /// Does nothing if monitoring is already active. Must be called from
    /// within a Tokio runtime.
    pub fn start_monitoring(&self) {
        let mut timer = self.inner.timer();
        if timer.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move { run_timer(weak, token).await });

        *timer = Some(MonitorTimer { cancel });
        info!(
            target: "companion_health",
            interval_ms = self.inner.config().check_interval_ms,
            "health monitoring started"
        );
    }

    /// Stop periodic probing. Safe to call when not running.
    pub fn stop_monitoring(&self) {
        if let Some(timer) = self.inner.timer().take() {
            timer.cancel.cancel();
            info!(target: "companion_health", "health monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.timer().is_some()
    }

    /// Run one probe cycle now and return the resulting snapshot.
    pub async fn force_health_check(&self) -> ServiceHealthStatus {
        check_service_health(&self.inner).await
    }

    /// Current status, with `uptime` computed at the time of the call.
    pub fn get_status(&self) -> ServiceHealthStatus {
        self.inner.state().snapshot()
    }

    /// Whether the service is up and not flapping near the failure threshold.
    pub fn is_service_available(&self) -> bool {
        let state = self.inner.state();
        state.status.is_available && state.status.consecutive_errors < AVAILABILITY_ERROR_THRESHOLD
    }

    /// Zero the request counters and latency samples.
    pub fn reset_stats(&self) {
        let mut state = self.inner.state();
        state.status.clear_counters();
        state.response_times.clear();
    }

    pub fn config(&self) -> MonitoringConfig {
        self.inner.config()
    }

    /// Merge `patch` into the config, restarting the timer if it is running.
    pub fn update_options(&self, patch: MonitoringConfigPatch) {
        let updated = {
            let mut config = self.inner.config.lock().unwrap_or_else(PoisonError::into_inner);
            config.apply(&patch);
            config.clone()
        };
        debug!(target: "companion_health", config = ?updated, "monitoring options updated");
        self.inner.probe.set_debug(updated.debug);

        if self.is_monitoring() {
            self.stop_monitoring();
            self.start_monitoring();
        }
    }

    /// Call `listener` with a snapshot after every probe cycle.
    pub fn subscribe<F>(&self, listener: F) -> StatusSubscription
    where
        F: Fn(&ServiceHealthStatus) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    /// Receiver that always holds the latest published snapshot.
    pub fn watch(&self) -> watch::Receiver<ServiceHealthStatus> {
        self.inner.listeners.watch()
    }

    /// Open a document through the companion service, counting the outcome.
    pub async fn open_document(&self, document: &DocumentRef, timeout: Duration) -> OpenResult {
        self.inner.state().status.total_requests += 1;

        let result = self.inner.opener.open_local_document(document, timeout).await;

        let snapshot = {
            let mut state = self.inner.state();
            if result.ok {
                state.status.successful_requests += 1;
            } else {
                state.status.failed_requests += 1;
            }
            state.snapshot()
        };
        self.inner.listeners.publish(&snapshot);
        result
    }

    /// The open client this monitor delegates to.
    pub fn opener(&self) -> &OpenRequestClient {
        &self.inner.opener
    }
}

async fn run_timer(inner: Weak<MonitorInner>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(monitor) = inner.upgrade() else {
            break;
        };
        // A cycle that has begun runs to completion; cancellation only
        // interrupts the wait between cycles.
        check_service_health(&monitor).await;
        if cancel.is_cancelled() {
            break;
        }
        let interval = monitor.config().check_interval();
        drop(monitor);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// One probe cycle. Never fails; every outcome becomes a status update.
async fn check_service_health(inner: &MonitorInner) -> ServiceHealthStatus {
    let _cycle = inner.cycle.lock().await;
    let config = inner.config();

    let started = Instant::now();
    let healthy = inner.probe.probe(PROBE_TIMEOUT, false).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (consecutive_errors, recovery_due) = {
        let mut state = inner.state();
        state.record_response_time(elapsed_ms);
        if healthy {
            state.record_success();
        } else {
            state.status.mark_unavailable();
        }
        let due = !healthy
            && config.auto_restart
            && state.status.consecutive_errors >= config.max_consecutive_errors
            && !state.recovery_attempted;
        (state.status.consecutive_errors, due)
    };

    if config.debug {
        info!(target: "companion_health", healthy, consecutive_errors, elapsed_ms, "health check");
    } else {
        debug!(target: "companion_health", healthy, consecutive_errors, elapsed_ms, "health check");
    }

    // Marked only once the attempt has finished, so a cycle dropped during
    // the backoff leaves the episode eligible for recovery.
    if recovery_due && !attempt_recovery(inner).await {
        inner.state().recovery_attempted = true;
    }

    let snapshot = {
        let mut state = inner.state();
        state.status.last_check = Some(Utc::now());
        state.snapshot()
    };
    inner.listeners.publish(&snapshot);
    snapshot
}

/// Single time-boxed recovery attempt for the current failure episode.
async fn attempt_recovery(inner: &MonitorInner) -> bool {
    warn!(
        target: "companion_health",
        consecutive_errors = inner.state().status.consecutive_errors,
        "companion service unresponsive, attempting recovery"
    );
    inner.probe.clear_cache();
    tokio::time::sleep(RECOVERY_BACKOFF).await;

    let recovered = inner.probe.probe(RECOVERY_PROBE_TIMEOUT, true).await;
    if recovered {
        inner.state().record_success();
        info!(target: "companion_health", "companion service recovered");
    } else {
        let status = inner.state().snapshot();
        inner.notifier.notify(MonitorNotification::RecoveryNeeded { status });
    }
    recovered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingNotifier, ScriptedProbe, ScriptedTransport};
    use crate::transport::TransportResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(max_consecutive_errors: u32) -> MonitoringConfig {
        MonitoringConfig {
            check_interval_ms: 30_000,
            max_consecutive_errors,
            auto_restart: true,
            debug: false,
        }
    }

    fn monitor_with(
        config: MonitoringConfig,
        probe: Arc<ScriptedProbe>,
    ) -> (HealthMonitor, Arc<RecordingNotifier>, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = HealthMonitor::new(config, probe, OpenRequestClient::new(transport.clone()), notifier.clone());
        (monitor, notifier, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn failures_below_threshold_do_not_recover() {
        let probe = Arc::new(ScriptedProbe::always(false));
        let (monitor, notifier, _) = monitor_with(config(5), probe.clone());

        for expected in 1..5 {
            let status = monitor.force_health_check().await;
            assert!(!status.is_available);
            assert_eq!(status.consecutive_errors, expected);
        }
        assert_eq!(probe.forced_calls(), 0);
        assert_eq!(probe.cleared(), 0);
        assert!(notifier.notifications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_triggers_exactly_one_recovery_per_episode() {
        let probe = Arc::new(ScriptedProbe::always(false));
        let (monitor, notifier, _) = monitor_with(config(3), probe.clone());

        for _ in 0..3 {
            monitor.force_health_check().await;
        }
        assert_eq!(probe.forced_calls(), 1);
        assert_eq!(probe.cleared(), 1);
        assert_eq!(probe.calls()[3], (RECOVERY_PROBE_TIMEOUT, true));
        let notifications = notifier.notifications();
        assert_eq!(notifications.len(), 1);
        let MonitorNotification::RecoveryNeeded { status } = &notifications[0];
        assert_eq!(status.consecutive_errors, 3);

        // Still failing: no second attempt and no repeat notification.
        monitor.force_health_check().await;
        monitor.force_health_check().await;
        assert_eq!(probe.forced_calls(), 1);
        assert_eq!(notifier.notifications().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_recovery_resets_errors() {
        let probe = Arc::new(ScriptedProbe::sequence([false, false, true]));
        let (monitor, notifier, _) = monitor_with(config(2), probe.clone());

        monitor.force_health_check().await;
        let status = monitor.force_health_check().await;
        assert!(status.is_available);
        assert_eq!(status.consecutive_errors, 0);
        assert!(notifier.notifications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_waits_for_backoff() {
        let probe = Arc::new(ScriptedProbe::always(false));
        let (monitor, _, _) = monitor_with(config(1), probe);

        let started = tokio::time::Instant::now();
        monitor.force_health_check().await;
        assert!(started.elapsed() >= RECOVERY_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_disabled_without_auto_restart() {
        let probe = Arc::new(ScriptedProbe::always(false));
        let mut cfg = config(1);
        cfg.auto_restart = false;
        let (monitor, notifier, _) = monitor_with(cfg, probe.clone());

        for _ in 0..3 {
            monitor.force_health_check().await;
        }
        assert_eq!(probe.forced_calls(), 0);
        assert!(notifier.notifications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn any_success_resets_consecutive_errors() {
        let probe = Arc::new(ScriptedProbe::sequence([false, false, false, false, true]));
        let mut cfg = config(10);
        cfg.auto_restart = false;
        let (monitor, _, _) = monitor_with(cfg, probe);

        for _ in 0..4 {
            monitor.force_health_check().await;
        }
        assert_eq!(monitor.get_status().consecutive_errors, 4);
        let status = monitor.force_health_check().await;
        assert!(status.is_available);
        assert_eq!(status.consecutive_errors, 0);
        assert!(status.last_check.is_some());
        assert!(status.uptime.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn get_status_returns_independent_copies() {
        let probe = Arc::new(ScriptedProbe::always(true));
        let (monitor, _, _) = monitor_with(config(3), probe);
        monitor.force_health_check().await;

        let mut copy = monitor.get_status();
        copy.is_available = false;
        copy.consecutive_errors = 99;
        copy.total_requests = 42;

        let fresh = monitor.get_status();
        assert!(fresh.is_available);
        assert_eq!(fresh.consecutive_errors, 0);
        assert_eq!(fresh.total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn availability_has_hysteresis() {
        let probe = Arc::new(ScriptedProbe::always(true));
        let (monitor, _, _) = monitor_with(config(10), probe);
        assert!(!monitor.is_service_available());

        monitor.force_health_check().await;
        assert!(monitor.is_service_available());

        // Available but sitting at the failure threshold reads as unavailable.
        monitor.inner.state().status.consecutive_errors = AVAILABILITY_ERROR_THRESHOLD;
        assert!(!monitor.is_service_available());
    }

    #[tokio::test(start_paused = true)]
    async fn moving_average_keeps_last_ten_samples() {
        let mut state = MonitorState::new();
        for _ in 0..10 {
            state.record_response_time(100.0);
        }
        for _ in 0..10 {
            state.record_response_time(20.0);
        }
        assert_eq!(state.response_times.len(), RESPONSE_TIME_SAMPLES);
        assert!((state.status.average_response_time_ms - 20.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stats_keeps_availability() {
        let probe = Arc::new(ScriptedProbe::sequence([false]));
        let mut cfg = config(10);
        cfg.auto_restart = false;
        let (monitor, _, transport) = monitor_with(cfg, probe);
        transport.respond("open", Ok(TransportResponse::new(200, r#"{"success":true}"#)));

        monitor.force_health_check().await;
        monitor
            .open_document(&DocumentRef::new("Report", "A", "pdf", "QA"), Duration::from_secs(1))
            .await;
        assert_eq!(monitor.get_status().total_requests, 1);

        monitor.reset_stats();
        let status = monitor.get_status();
        assert_eq!(status.total_requests, 0);
        assert_eq!(status.successful_requests, 0);
        assert_eq!(status.average_response_time_ms, 0.0);
        assert_eq!(status.consecutive_errors, 1);
        assert!(!status.is_available);
    }

    #[tokio::test(start_paused = true)]
    async fn open_document_counts_outcomes() {
        let probe = Arc::new(ScriptedProbe::always(true));
        let (monitor, _, transport) = monitor_with(config(3), probe);
        transport.respond("open", Ok(TransportResponse::new(200, r#"{"success":true}"#)));
        transport.respond("open", Ok(TransportResponse::new(404, "no match")));
        let doc = DocumentRef::new("Report", "A", "pdf", "QA");

        assert!(monitor.open_document(&doc, Duration::from_secs(1)).await.ok);
        assert!(!monitor.open_document(&doc, Duration::from_secs(1)).await.ok);

        let status = monitor.get_status();
        assert_eq!(status.total_requests, 2);
        assert_eq!(status.successful_requests, 1);
        assert_eq!(status.failed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn listeners_receive_every_cycle_and_survive_panics() {
        let probe = Arc::new(ScriptedProbe::always(true));
        let (monitor, _, _) = monitor_with(config(3), probe);
        let delivered = Arc::new(AtomicUsize::new(0));

        let _faulty = monitor.subscribe(|_| panic!("render failed"));
        let counter = Arc::clone(&delivered);
        let subscription = monitor.subscribe(move |status| {
            assert!(status.is_available);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.force_health_check().await;
        monitor.force_health_check().await;
        assert_eq!(delivered.load(Ordering::SeqCst), 2);

        drop(subscription);
        monitor.force_health_check().await;
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn monitoring_probes_immediately_then_on_interval() {
        let probe = Arc::new(ScriptedProbe::always(true));
        let (monitor, _, _) = monitor_with(config(3), probe.clone());

        monitor.start_monitoring();
        monitor.start_monitoring();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.calls().len(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(probe.calls().len(), 2);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(probe.calls().len(), 3);

        monitor.stop_monitoring();
        monitor.stop_monitoring();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(probe.calls().len(), 3);
        assert!(!monitor.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_listener_keeps_monitoring() {
        let probe = Arc::new(ScriptedProbe::always(true));
        let (monitor, _, _) = monitor_with(config(3), probe.clone());
        monitor.start_monitoring();

        let subscription = monitor.subscribe(|_| {});
        subscription.unsubscribe();
        assert!(monitor.is_monitoring());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(probe.calls().len(), 2);
        monitor.stop_monitoring();
    }

    #[tokio::test(start_paused = true)]
    async fn update_options_restarts_with_new_interval() {
        let probe = Arc::new(ScriptedProbe::always(true));
        let (monitor, _, _) = monitor_with(config(3), probe.clone());
        monitor.start_monitoring();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.calls().len(), 1);

        monitor.update_options(MonitoringConfigPatch {
            check_interval_ms: Some(1_000),
            ..Default::default()
        });
        assert!(monitor.is_monitoring());
        assert_eq!(monitor.config().check_interval_ms, 1_000);

        // Restart probes immediately, then every second.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.calls().len(), 2);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(probe.calls().len(), 3);
        monitor.stop_monitoring();
    }

    #[tokio::test(start_paused = true)]
    async fn update_options_does_not_start_a_stopped_monitor() {
        let probe = Arc::new(ScriptedProbe::always(true));
        let (monitor, _, _) = monitor_with(config(3), probe.clone());
        monitor.update_options(MonitoringConfigPatch {
            debug: Some(true),
            ..Default::default()
        });
        assert!(!monitor.is_monitoring());
        assert!(monitor.config().debug);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(probe.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_options_during_recovery_backoff_still_recovers_once() {
        let probe = Arc::new(ScriptedProbe::always(false));
        let (monitor, notifier, _) = monitor_with(config(1), probe.clone());

        monitor.start_monitoring();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(probe.cleared(), 1);
        assert_eq!(probe.forced_calls(), 0);

        monitor.update_options(MonitoringConfigPatch {
            debug: Some(true),
            ..Default::default()
        });
        assert!(probe.debug());

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(probe.forced_calls(), 1);
        let notifications = notifier.notifications();
        assert_eq!(notifications.len(), 1);
        let MonitorNotification::RecoveryNeeded { status } = &notifications[0];
        assert_eq!(status.consecutive_errors, 1);
        assert!(monitor.get_status().consecutive_errors > 5);
        monitor.stop_monitoring();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_recovery_backoff_finishes_the_attempt() {
        let probe = Arc::new(ScriptedProbe::always(false));
        let (monitor, notifier, _) = monitor_with(config(1), probe.clone());

        monitor.start_monitoring();
        tokio::time::sleep(Duration::from_millis(500)).await;
        monitor.stop_monitoring();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.forced_calls(), 1);
        assert_eq!(notifier.notifications().len(), 1);
        // The cycle in flight completes; no further cycles follow.
        assert_eq!(probe.calls().len(), 2);
        assert!(monitor.get_status().last_check.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_check_leaves_recovery_available() {
        let probe = Arc::new(ScriptedProbe::always(false));
        let (monitor, notifier, _) = monitor_with(config(1), probe.clone());

        let abandoned = tokio::time::timeout(Duration::from_millis(500), monitor.force_health_check()).await;
        assert!(abandoned.is_err());
        assert_eq!(probe.forced_calls(), 0);

        monitor.force_health_check().await;
        assert_eq!(probe.forced_calls(), 1);
        assert_eq!(notifier.notifications().len(), 1);

        monitor.force_health_check().await;
        assert_eq!(probe.forced_calls(), 1);
        assert_eq!(notifier.notifications().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_failure_streak_then_recovery() {
        // Five failed probes, the recovery probe fails too, then the service comes back.
        let probe = Arc::new(ScriptedProbe::sequence([false, false, false, false, false, false, true, true]));
        let mut cfg = config(5);
        cfg.check_interval_ms = 30_000;
        let (monitor, notifier, _) = monitor_with(cfg, probe.clone());
        let watch = monitor.watch();

        monitor.start_monitoring();
        // Immediate probe plus four interval ticks, plus the recovery backoff.
        tokio::time::sleep(Duration::from_secs(4 * 30) + RECOVERY_BACKOFF + Duration::from_millis(10)).await;
        assert_eq!(probe.forced_calls(), 1);
        assert_eq!(notifier.notifications().len(), 1);
        assert!(!watch.borrow().is_available);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let status = monitor.get_status();
        assert!(status.is_available);
        assert_eq!(status.consecutive_errors, 0);
        assert!(watch.borrow().is_available);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(probe.forced_calls(), 1);
        assert_eq!(notifier.notifications().len(), 1);
        monitor.stop_monitoring();
    }
}
