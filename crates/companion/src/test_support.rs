//! Scripted fakes shared by the unit tests.

use crate::health::{AvailabilityProbe, MonitorNotification, NotificationSink};
use crate::transport::{EventStream, SseEvent, Transport, TransportRequest, TransportResponse};
use async_trait::async_trait;
use docbridge_types::CompanionError;
use futures_util::StreamExt;
use futures_util::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

pub(crate) type StreamItem = Result<SseEvent, CompanionError>;

/// What the next `subscribe` call returns.
pub(crate) enum StreamScript {
    /// Forward whatever the test sends; ends when the sender is dropped.
    Live(UnboundedReceiver<StreamItem>),
    /// Fail to connect.
    Fail(CompanionError),
}

/// [`Transport`] answering from per-path queues and recording every call.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<Result<TransportResponse, CompanionError>>>>,
    requests: Mutex<Vec<TransportRequest>>,
    streams: Mutex<VecDeque<StreamScript>>,
    subscriptions: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next request to `path`.
    pub(crate) fn respond(&self, path: &str, response: Result<TransportResponse, CompanionError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(path.trim_start_matches('/').to_string())
            .or_default()
            .push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path.trim_start_matches('/') == path)
            .collect()
    }

    pub(crate) fn script_stream(&self, script: StreamScript) {
        self.streams.lock().unwrap().push_back(script);
    }

    /// Queue a live stream and return its sending half.
    pub(crate) fn live_stream(&self) -> UnboundedSender<StreamItem> {
        let (sender, receiver) = unbounded_channel();
        self.script_stream(StreamScript::Live(receiver));
        sender
    }

    pub(crate) fn subscribe_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, CompanionError> {
        let key = request.path.trim_start_matches('/').to_string();
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(CompanionError::network(format!("no scripted response for {key}"))))
    }

    async fn subscribe(&self, _path: &str) -> Result<EventStream, CompanionError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let script = self.streams.lock().unwrap().pop_front();
        match script {
            Some(StreamScript::Live(receiver)) => Ok(stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|item| (item, receiver))
            })
            .boxed()),
            Some(StreamScript::Fail(error)) => Err(error),
            None => Err(CompanionError::network("no scripted stream")),
        }
    }
}

/// [`AvailabilityProbe`] answering from a queue of outcomes.
pub(crate) struct ScriptedProbe {
    outcomes: Mutex<VecDeque<bool>>,
    fallback: bool,
    calls: Mutex<Vec<(Duration, bool)>>,
    cleared: AtomicUsize,
    debug: AtomicBool,
}

impl ScriptedProbe {
    pub(crate) fn always(outcome: bool) -> Self {
        Self::sequence_with_fallback(Vec::new(), outcome)
    }

    /// Answer with `outcomes` in order, then keep repeating the last one.
    pub(crate) fn sequence(outcomes: impl IntoIterator<Item = bool>) -> Self {
        let outcomes: Vec<bool> = outcomes.into_iter().collect();
        let fallback = outcomes.last().copied().unwrap_or(false);
        Self::sequence_with_fallback(outcomes, fallback)
    }

    fn sequence_with_fallback(outcomes: Vec<bool>, fallback: bool) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
            cleared: AtomicUsize::new(0),
            debug: AtomicBool::new(false),
        }
    }

    /// `(timeout, force_refresh)` of every probe so far.
    pub(crate) fn calls(&self) -> Vec<(Duration, bool)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn forced_calls(&self) -> usize {
        self.calls().iter().filter(|(_, forced)| *forced).count()
    }

    pub(crate) fn cleared(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }

    pub(crate) fn debug(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AvailabilityProbe for ScriptedProbe {
    async fn probe(&self, timeout: Duration, force_refresh: bool) -> bool {
        self.calls.lock().unwrap().push((timeout, force_refresh));
        self.outcomes.lock().unwrap().pop_front().unwrap_or(self.fallback)
    }

    fn clear_cache(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    received: Mutex<Vec<MonitorNotification>>,
}

impl RecordingNotifier {
    pub(crate) fn notifications(&self) -> Vec<MonitorNotification> {
        self.received.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: MonitorNotification) {
        self.received.lock().unwrap().push(notification);
    }
}
