//! User-facing notifications raised by the health monitor.

use docbridge_types::ServiceHealthStatus;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Something a user should be told about.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorNotification {
    /// Automatic recovery failed; the companion service needs a manual restart.
    RecoveryNeeded { status: ServiceHealthStatus },
}

impl MonitorNotification {
    /// Short text suitable for a toast or status line.
    pub fn message(&self) -> String {
        match self {
            MonitorNotification::RecoveryNeeded { status } => format!(
                "The local companion service is not responding ({} failed checks). Please restart it.",
                status.consecutive_errors
            ),
        }
    }
}

/// Receives notifications. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: MonitorNotification);
}

/// Logs notifications as warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: MonitorNotification) {
        tracing::warn!(target: "companion_health", "{}", notification.message());
    }
}

/// Forwards notifications over an unbounded channel, e.g. to a UI task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: UnboundedSender<MonitorNotification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, UnboundedReceiver<MonitorNotification>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, notification: MonitorNotification) {
        if self.sender.send(notification).is_err() {
            tracing::debug!(target: "companion_health", "notification receiver dropped");
        }
    }
}
