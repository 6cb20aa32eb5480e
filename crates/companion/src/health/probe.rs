//! Availability probing with a short-lived result cache.

use crate::open::OpenRequestClient;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Answers "is the companion service reachable right now?".
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    /// Probe within `timeout`. `force_refresh` bypasses any cached result.
    async fn probe(&self, timeout: Duration, force_refresh: bool) -> bool;

    /// Forget any cached result.
    fn clear_cache(&self) {}

    /// Toggle verbose probe logging.
    fn set_debug(&self, _debug: bool) {}
}

/// Default time a probe result is reused.
pub const DEFAULT_PROBE_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct CachedOutcome {
    available: bool,
    at: Instant,
}

/// [`AvailabilityProbe`] backed by `GET /health`, reusing recent outcomes.
///
/// Several consumers (the monitor, UI refreshes, the open flow) tend to probe
/// in bursts; the cache collapses those into one request per TTL window.
#[derive(Debug)]
pub struct AvailabilityCache {
    client: OpenRequestClient,
    ttl: Duration,
    debug: AtomicBool,
    last: Mutex<Option<CachedOutcome>>,
}

impl AvailabilityCache {
    pub fn new(client: OpenRequestClient) -> Self {
        Self::with_ttl(client, DEFAULT_PROBE_TTL)
    }

    pub fn with_ttl(client: OpenRequestClient, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            debug: AtomicBool::new(false),
            last: Mutex::new(None),
        }
    }

    /// Log every probe outcome at info level.
    pub fn with_debug(self, debug: bool) -> Self {
        self.debug.store(debug, Ordering::Relaxed);
        self
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    fn cached(&self) -> Option<bool> {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.filter(|outcome| outcome.at.elapsed() < self.ttl)
            .map(|outcome| outcome.available)
    }
}

#[async_trait]
impl AvailabilityProbe for AvailabilityCache {
    async fn probe(&self, timeout: Duration, force_refresh: bool) -> bool {
        if !force_refresh && let Some(available) = self.cached() {
            debug!(target: "companion_health", available, "using cached probe result");
            return available;
        }

        let available = self.client.check_availability(timeout).await;
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedOutcome {
            available,
            at: Instant::now(),
        });
        if self.is_debug() {
            info!(target: "companion_health", available, timeout_ms = timeout.as_millis() as u64, "probe finished");
        }
        available
    }

    fn clear_cache(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }
}
