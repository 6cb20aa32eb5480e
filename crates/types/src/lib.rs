//! Shared data model for the docbridge companion layer.
//!
//! These types are passed by value between the health monitor, the open
//! request client, the sync stream client and their observers. None of them
//! hold live references into the components that produce them.

pub mod document;
pub mod errors;
pub mod health;
pub mod sync;

pub use document::{CompanyInfo, DocumentRef, OpenDocumentRequest, OpenResult, WatchedRoots};
pub use errors::CompanionError;
pub use health::{MonitoringConfig, MonitoringConfigPatch, ServiceHealthStatus};
pub use sync::{InvalidTransition, SyncProgress, SyncStatus};
