//! Fan-out of health snapshots to independent observers.

use docbridge_types::ServiceHealthStatus;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;

type Listener = Arc<dyn Fn(&ServiceHealthStatus) + Send + Sync>;

struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
    latest: watch::Sender<ServiceHealthStatus>,
}

/// Delivers every published snapshot to all registered listeners.
#[derive(Clone)]
pub(crate) struct StatusBroadcaster {
    registry: Arc<Registry>,
}

impl StatusBroadcaster {
    pub(crate) fn new(initial: ServiceHealthStatus) -> Self {
        let (latest, _) = watch::channel(initial);
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(Vec::new()),
                latest,
            }),
        }
    }

    pub(crate) fn subscribe<F>(&self, listener: F) -> StatusSubscription
    where
        F: Fn(&ServiceHealthStatus) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        StatusSubscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ServiceHealthStatus> {
        self.registry.latest.subscribe()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.registry.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Deliver `status` to every listener. A panicking listener is logged and
    /// skipped; the rest still receive the snapshot.
    pub(crate) fn publish(&self, status: &ServiceHealthStatus) {
        let listeners: Vec<(u64, Listener)> = self
            .registry
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(status))).is_err() {
                tracing::warn!(target: "companion_health", listener = id, "status listener panicked");
            }
        }
        self.registry.latest.send_replace(status.clone());
    }
}

/// Registration handle returned by [`HealthMonitor::subscribe`](super::HealthMonitor::subscribe).
///
/// The listener stays attached until the handle is dropped or
/// [`unsubscribe`](Self::unsubscribe) is called. Detaching never stops the
/// monitor itself.
#[must_use = "dropping the subscription detaches the listener"]
pub struct StatusSubscription {
    id: u64,
    registry: Weak<Registry>,
}

impl StatusSubscription {
    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for StatusSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSubscription").field("id", &self.id).finish()
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}
