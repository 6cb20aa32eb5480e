//! Client for the server-side sync job and its event stream.
//!
//! [`SyncStreamClient`] starts a job with `POST /api/sync`, follows it over
//! `GET /api/sync/stream` and keeps a [`SyncProgress`] that only moves along
//! the [`SyncStatus`] transition table.
//!
//! ## Design
//!
//! - **One stream per client**: the reader task is tracked in a single slot.
//!   Starting again while it is open attaches to it instead of connecting
//!   twice.
//! - **The syncing flag decides reconnects**: a dropped connection is reopened
//!   once after [`SyncTimings::reconnect_delay`] only while the job is known
//!   to be running. The flag is cleared before terminal callbacks run.
//! - **Grace on close**: after `completed` or `error` the stream stays open
//!   briefly so callbacks can schedule follow-up work before teardown.
//! - **Results, not errors**: [`SyncStreamClient::start_sync`] reports
//!   failures in its [`StartSyncOutcome`] and in the progress state.

mod events;

use crate::transport::{EventStream, Transport, TransportRequest};
use docbridge_types::{CompanionError, InvalidTransition, SyncProgress, SyncStatus};
use events::{SyncEvent, parse_event};
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const START_PATH: &str = "api/sync";
const STREAM_PATH: &str = "api/sync/stream";

/// Delays used by the sync client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    /// Time the stream stays open after `completed`.
    pub completed_grace: Duration,
    /// Time the stream stays open after `error`.
    pub error_grace: Duration,
    /// Wait before reopening a dropped stream.
    pub reconnect_delay: Duration,
    /// Timeout of the start request.
    pub start_timeout: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            completed_grace: Duration::from_secs(5),
            error_grace: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(2),
            start_timeout: Duration::from_secs(30),
        }
    }
}

type ProgressCallback = Arc<dyn Fn(&SyncProgress) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Hooks invoked as the job advances.
///
/// Callbacks run on the stream reader task (or inside `start_sync` for a
/// resumed job) and must not block.
#[derive(Clone, Default)]
pub struct SyncCallbacks {
    on_progress: Option<ProgressCallback>,
    on_completed: Option<ProgressCallback>,
    on_error: Option<ErrorCallback>,
}

impl SyncCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, callback: impl Fn(&SyncProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn on_completed(mut self, callback: impl Fn(&SyncProgress) + Send + Sync + 'static) -> Self {
        self.on_completed = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    fn progress(&self, progress: &SyncProgress) {
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }

    fn completed(&self, progress: &SyncProgress) {
        if let Some(callback) = &self.on_completed {
            callback(progress);
        }
    }

    fn error(&self, message: &str) {
        if let Some(callback) = &self.on_error {
            callback(message);
        }
    }
}

impl std::fmt::Debug for SyncCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_completed", &self.on_completed.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Result of [`SyncStreamClient::start_sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartSyncOutcome {
    pub success: bool,
    pub sync_id: Option<String>,
    pub error: Option<String>,
    /// The server already had a job running and the client attached to it.
    pub resumed: bool,
}

impl StartSyncOutcome {
    fn started(sync_id: Option<String>) -> Self {
        Self {
            success: true,
            sync_id,
            ..Default::default()
        }
    }

    fn attached(resumed: bool) -> Self {
        Self {
            success: true,
            resumed,
            ..Default::default()
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    #[serde(default)]
    sync_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    current_progress: Option<SyncProgress>,
}

#[derive(Debug)]
struct StreamHandle {
    generation: u64,
    cancel: CancellationToken,
}

/// What to do after an event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventOutcome {
    Continue,
    CloseAfter(Duration),
}

/// How one connection ended.
#[derive(Debug)]
enum StreamEnd {
    Cancelled,
    CloseAfter(Duration),
    Disconnected,
}

struct SyncShared {
    transport: Arc<dyn Transport>,
    callbacks: SyncCallbacks,
    timings: SyncTimings,
    progress: watch::Sender<SyncProgress>,
    /// Whether the job is believed to be running. Sole authority for reconnects.
    syncing: AtomicBool,
    stream: Mutex<Option<StreamHandle>>,
    next_generation: AtomicU64,
}

impl SyncShared {
    fn snapshot(&self) -> SyncProgress {
        self.progress.borrow().clone()
    }

    /// Move to `next` and then apply `edit`, publishing the result.
    fn advance(
        &self,
        next: SyncStatus,
        edit: impl FnOnce(&mut SyncProgress),
    ) -> Result<SyncProgress, InvalidTransition> {
        let mut result = None;
        self.progress.send_if_modified(|progress| match progress.transition(next) {
            Ok(()) => {
                edit(progress);
                result = Some(Ok(progress.clone()));
                true
            }
            Err(error) => {
                result = Some(Err(error));
                false
            }
        });
        result.unwrap_or_else(|| {
            Err(InvalidTransition {
                from: self.snapshot().status,
                to: next,
            })
        })
    }

    fn close_stream(&self) {
        if let Some(handle) = self.stream.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.cancel.cancel();
            debug!(target: "companion_sync", generation = handle.generation, "sync stream closed");
        }
    }

    fn release_stream(&self, generation: u64) {
        let mut slot = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| handle.generation == generation) {
            *slot = None;
        }
    }

    /// Open the event stream unless one is already open.
    fn ensure_stream(self: &Arc<Self>) {
        let mut slot = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.as_ref() {
            debug!(target: "companion_sync", generation = handle.generation, "attaching to open sync stream");
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *slot = Some(StreamHandle {
            generation,
            cancel: cancel.clone(),
        });

        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.run_stream(generation, cancel).await });
    }

    async fn run_stream(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                connected = self.transport.subscribe(STREAM_PATH) => connected,
            };
            let mut events = match connected {
                Ok(events) => events,
                Err(error) => {
                    warn!(target: "companion_sync", %error, "could not open sync stream");
                    if self.syncing.swap(false, Ordering::SeqCst) {
                        self.fail(format!("sync stream unavailable: {error}"));
                    }
                    break;
                }
            };
            info!(target: "companion_sync", generation, "sync stream connected");

            match self.pump(&mut events, &cancel).await {
                StreamEnd::Cancelled => break,
                StreamEnd::CloseAfter(grace) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(grace) => {}
                    }
                    debug!(target: "companion_sync", generation, "sync stream finished");
                    break;
                }
                StreamEnd::Disconnected => {
                    if !self.syncing.load(Ordering::SeqCst) {
                        debug!(target: "companion_sync", generation, "sync stream dropped after the job ended");
                        break;
                    }
                    let delay = self.timings.reconnect_delay;
                    info!(
                        target: "companion_sync",
                        delay_ms = delay.as_millis() as u64,
                        "sync stream dropped, reconnecting"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        self.release_stream(generation);
    }

    async fn pump(&self, events: &mut EventStream, cancel: &CancellationToken) -> StreamEnd {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                next = events.next() => next,
            };
            match next {
                None => return StreamEnd::Disconnected,
                Some(Err(error)) => {
                    warn!(target: "companion_sync", %error, "sync stream failed");
                    return StreamEnd::Disconnected;
                }
                Some(Ok(event)) => {
                    if let EventOutcome::CloseAfter(grace) = self.handle_event(&event.event, &event.data, parse_event(&event)) {
                        return StreamEnd::CloseAfter(grace);
                    }
                }
            }
        }
    }

    fn handle_event(
        &self,
        name: &str,
        data: &str,
        parsed: Result<SyncEvent, serde_json::Error>,
    ) -> EventOutcome {
        let event = match parsed {
            Ok(event) => event,
            Err(error) => {
                warn!(target: "companion_sync", event = name, %error, data, "ignoring malformed sync event");
                return EventOutcome::Continue;
            }
        };

        match event {
            SyncEvent::Ping => {}
            SyncEvent::Other(name) => debug!(target: "companion_sync", event = %name, "ignoring sync event"),
            SyncEvent::Status(SyncStatus::Idle) => {
                let current = self.snapshot().status;
                if current.can_transition_to(SyncStatus::Idle) {
                    self.progress.send_replace(SyncProgress::idle());
                    debug!(target: "companion_sync", from = %current, "server reports idle");
                } else if current != SyncStatus::Idle {
                    debug!(target: "companion_sync", status = %current, "ignoring idle snapshot during an active job");
                }
            }
            SyncEvent::Status(status) => {
                debug!(target: "companion_sync", %status, "ignoring status snapshot");
            }
            SyncEvent::Progress(update) => {
                match self.advance(SyncStatus::Syncing, |progress| progress.overwrite_counts(&update)) {
                    Ok(progress) => self.callbacks.progress(&progress),
                    Err(error) => debug!(target: "companion_sync", %error, "ignoring progress"),
                }
            }
            SyncEvent::Completed(summary) => {
                self.syncing.store(false, Ordering::SeqCst);
                let advanced = self.advance(SyncStatus::Completed, |progress| {
                    progress.overwrite_counts(&summary);
                    progress.success = Some(summary.success.unwrap_or(true));
                    progress.failed = summary.failed;
                });
                match advanced {
                    Ok(progress) => {
                        info!(
                            target: "companion_sync",
                            processed = progress.processed,
                            total = progress.total,
                            failed = progress.failed.unwrap_or(0),
                            "sync completed"
                        );
                        self.callbacks.completed(&progress);
                    }
                    Err(error) => debug!(target: "companion_sync", %error, "ignoring completion"),
                }
                return EventOutcome::CloseAfter(self.timings.completed_grace);
            }
            SyncEvent::Failed(message) => {
                self.syncing.store(false, Ordering::SeqCst);
                self.fail(message);
                return EventOutcome::CloseAfter(self.timings.error_grace);
            }
        }
        EventOutcome::Continue
    }

    /// Move to `error` with `message` and run the error callback.
    fn fail(&self, message: String) {
        match self.advance(SyncStatus::Error, |progress| progress.error = Some(message.clone())) {
            Ok(_) => {
                warn!(target: "companion_sync", error = %message, "sync failed");
                self.callbacks.error(&message);
            }
            Err(error) => debug!(target: "companion_sync", %error, reason = %message, "ignoring failure"),
        }
    }
}

/// Starts and follows one sync job at a time.
///
/// Dropping the client closes its stream.
pub struct SyncStreamClient {
    shared: Arc<SyncShared>,
}

impl std::fmt::Debug for SyncStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStreamClient")
            .field("progress", &self.progress())
            .field("syncing", &self.is_syncing())
            .field("timings", &self.shared.timings)
            .finish_non_exhaustive()
    }
}

impl SyncStreamClient {
    pub fn new(transport: Arc<dyn Transport>, callbacks: SyncCallbacks) -> Self {
        Self::with_timings(transport, callbacks, SyncTimings::default())
    }

    pub fn with_timings(transport: Arc<dyn Transport>, callbacks: SyncCallbacks, timings: SyncTimings) -> Self {
        let (progress, _) = watch::channel(SyncProgress::idle());
        Self {
            shared: Arc::new(SyncShared {
                transport,
                callbacks,
                timings,
                progress,
                syncing: AtomicBool::new(false),
                stream: Mutex::new(None),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Start a sync job, or attach to the one already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start_sync(&self) -> StartSyncOutcome {
        let shared = &self.shared;
        if shared.snapshot().status.is_terminal() {
            self.reset();
        }

        let mut active = None;
        shared.progress.send_if_modified(|progress| {
            if progress.status.is_active() {
                active = Some(progress.status);
                return false;
            }
            progress.transition(SyncStatus::Pending).is_ok()
        });
        match active {
            Some(SyncStatus::Syncing) => {
                // Re-attaching after a disconnect resumes reconnect duty.
                shared.syncing.store(true, Ordering::SeqCst);
                shared.ensure_stream();
                return StartSyncOutcome::attached(false);
            }
            Some(_) => return StartSyncOutcome::attached(false),
            None => {}
        }
        if shared.snapshot().status != SyncStatus::Pending {
            return StartSyncOutcome::failed("sync state changed while starting");
        }

        info!(target: "companion_sync", "starting sync");
        let request = TransportRequest::post(START_PATH).timeout(shared.timings.start_timeout);
        let response = match shared.transport.execute(request).await {
            Ok(response) => response,
            Err(error) => return self.start_failed(error),
        };

        if response.is_success() {
            let sync_id = match response.json::<StartResponse>() {
                Ok(body) => body.sync_id,
                Err(error) => {
                    debug!(target: "companion_sync", %error, "start response has no sync id");
                    None
                }
            };
            if let Err(error) = shared.advance(SyncStatus::Syncing, |_| {}) {
                return StartSyncOutcome::failed(error.to_string());
            }
            shared.syncing.store(true, Ordering::SeqCst);
            shared.ensure_stream();
            info!(target: "companion_sync", sync_id = ?sync_id, "sync started");
            return StartSyncOutcome::started(sync_id);
        }

        if response.status == 409 {
            let body = match response.json::<ConflictResponse>() {
                Ok(body) => body,
                Err(error) => return self.start_failed(error),
            };
            let Some(current) = body.current_progress else {
                let message = body.message.unwrap_or_else(|| "a sync job is already running".to_string());
                return self.start_failed(CompanionError::Conflict { message });
            };
            return self.resume(current);
        }

        self.start_failed(response.into_protocol_error())
    }

    /// Adopt the progress of a job the server is already running.
    fn resume(&self, current: SyncProgress) -> StartSyncOutcome {
        let shared = &self.shared;
        let adopted = shared.advance(SyncStatus::Syncing, |progress| {
            *progress = SyncProgress {
                status: SyncStatus::Syncing,
                ..current
            };
        });
        let progress = match adopted {
            Ok(progress) => progress,
            Err(error) => return StartSyncOutcome::failed(error.to_string()),
        };
        info!(
            target: "companion_sync",
            processed = progress.processed,
            total = progress.total,
            "resuming running sync job"
        );
        shared.callbacks.progress(&progress);
        shared.syncing.store(true, Ordering::SeqCst);
        shared.ensure_stream();
        StartSyncOutcome::attached(true)
    }

    fn start_failed(&self, error: CompanionError) -> StartSyncOutcome {
        let message = error.to_string();
        self.shared.fail(message.clone());
        StartSyncOutcome::failed(message)
    }

    /// Close the stream and clear the syncing flag. Progress is kept.
    pub fn disconnect(&self) {
        self.shared.syncing.store(false, Ordering::SeqCst);
        self.shared.close_stream();
    }

    /// [`disconnect`](Self::disconnect) and return to idle.
    pub fn reset(&self) {
        self.disconnect();
        self.shared.progress.send_replace(SyncProgress::idle());
        debug!(target: "companion_sync", "sync client reset");
    }

    pub fn progress(&self) -> SyncProgress {
        self.shared.snapshot()
    }

    /// Receiver that always holds the latest progress.
    pub fn subscribe(&self) -> watch::Receiver<SyncProgress> {
        self.shared.progress.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.shared.syncing.load(Ordering::SeqCst)
    }

    /// Whether an event stream is currently held open.
    pub fn has_stream(&self) -> bool {
        self.shared.stream.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl Drop for SyncStreamClient {
    fn drop(&mut self) {
        self.shared.close_stream();
    }
}
