//! Resilient communication with the docbridge companion service and the
//! server-side sync job.
//!
//! The crate is split into four cooperating parts:
//!
//! - [`transport`]: abortable HTTP requests with timeouts and a server-sent
//!   event subscription, behind the [`Transport`] trait.
//! - [`health`]: the [`HealthMonitor`], which probes the companion service,
//!   tracks failures, attempts bounded recovery and broadcasts status
//!   snapshots.
//! - [`open`]: the [`OpenRequestClient`], which asks the companion service to
//!   open a document and manages its watched folders.
//! - [`sync`]: the [`SyncStreamClient`], which starts a sync job and follows
//!   its event stream through an explicit state machine.
//!
//! [`config`] loads the file-backed settings shared by all of them.

pub mod config;
pub mod health;
pub mod open;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{CompanionConfig, load_config, load_config_from_path};
pub use health::{
    AvailabilityCache, AvailabilityProbe, ChannelNotifier, HealthMonitor, MonitorNotification, NotificationSink,
    StatusSubscription, TracingNotifier,
};
pub use open::OpenRequestClient;
pub use sync::{StartSyncOutcome, SyncCallbacks, SyncStreamClient, SyncTimings};
pub use transport::{EventStream, HttpTransport, SseEvent, Transport, TransportRequest, TransportResponse};

pub use docbridge_types as types;
