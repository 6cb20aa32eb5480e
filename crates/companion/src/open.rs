//! Open-document requests and watched-folder management for the companion
//! service.
//!
//! The companion service searches its watched folders for one of a list of
//! candidate filenames. [`build_candidate_names`] produces that list in
//! priority order; [`OpenRequestClient`] sends it and classifies the outcome
//! into an [`OpenResult`] instead of returning errors, so callers never need
//! to handle expected failures separately.

use crate::transport::{Transport, TransportRequest, TransportResponse};
use docbridge_types::{CompanionError, CompanyInfo, DocumentRef, OpenDocumentRequest, OpenResult, WatchedRoots};
use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Timeout for `GET /health` availability checks.
pub const DEFAULT_AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for open requests when the caller does not choose one.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Message returned for documents kept in remote storage.
pub const REMOTE_DOCUMENT_MESSAGE: &str = "remote document";

/// Message returned when an open request times out or is aborted.
pub const TIMEOUT_MESSAGE: &str = "timeout";

const HEALTH_PATH: &str = "health";
const CONFIG_PATH: &str = "config";
const OPEN_PATH: &str = "open";

static DRIVE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]:\\").expect("drive path regex should compile"));
static UNC_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\\\\[^\\/]+\\[^\\/]+").expect("UNC path regex should compile"));

/// Build the filenames to try for a document, most specific first.
///
/// Produces `"{title} {revision}.{ext}"`, `"{title}.{ext}"`,
/// `"{title} {revision}"` and `"{title}"`, skipping any candidate that needs
/// an empty component and dropping duplicates.
pub fn build_candidate_names(title: &str, revision: &str, extension: &str) -> IndexSet<String> {
    let title = title.trim();
    let revision = revision.trim();
    let extension = extension.trim().trim_start_matches('.');

    let mut candidates = IndexSet::new();
    if title.is_empty() {
        return candidates;
    }
    if !revision.is_empty() && !extension.is_empty() {
        candidates.insert(format!("{title} {revision}.{extension}"));
    }
    if !extension.is_empty() {
        candidates.insert(format!("{title}.{extension}"));
    }
    if !revision.is_empty() {
        candidates.insert(format!("{title} {revision}"));
    }
    candidates.insert(title.to_string());
    candidates
}

/// Build the `POST /open` body for a document.
pub fn build_request(document: &DocumentRef) -> OpenDocumentRequest {
    OpenDocumentRequest {
        title: document.title.clone(),
        revision: document.revision.clone(),
        file_type: document.file_type.clone(),
        logical_path: document.logical_path.clone(),
        candidates: build_candidate_names(&document.title, &document.revision, &document.file_type),
    }
}

/// Check that `path` is a drive-letter (`X:\...`) or UNC (`\\server\share`) path.
pub fn validate_root_path(path: &str) -> Result<(), CompanionError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(CompanionError::user_input("root path cannot be empty"));
    }
    if DRIVE_PATH.is_match(path) || UNC_PATH.is_match(path) {
        return Ok(());
    }
    Err(CompanionError::user_input(format!(
        "'{path}' is not a drive path (C:\\...) or a network share (\\\\server\\share)"
    )))
}

#[derive(Debug, Deserialize)]
struct OpenResponseBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigResponseBody {
    #[serde(default)]
    roots: IndexSet<String>,
    #[serde(default)]
    company: Option<CompanyInfo>,
}

/// Client for the companion service's open and config endpoints.
///
/// Cloning is cheap; clones share the transport and the roots cache.
#[derive(Clone)]
pub struct OpenRequestClient {
    transport: Arc<dyn Transport>,
    roots: Arc<Mutex<Option<WatchedRoots>>>,
}

impl std::fmt::Debug for OpenRequestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRequestClient")
            .field("cached_roots", &self.cached_roots())
            .finish_non_exhaustive()
    }
}

impl OpenRequestClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            roots: Arc::new(Mutex::new(None)),
        }
    }

    /// Ask the companion service to open `document`.
    pub async fn open_local_document(&self, document: &DocumentRef, timeout: Duration) -> OpenResult {
        self.open_with_abort(document, timeout, CancellationToken::new()).await
    }

    /// Like [`open_local_document`](Self::open_local_document), cancelled early
    /// when `abort` fires.
    pub async fn open_with_abort(&self, document: &DocumentRef, timeout: Duration, abort: CancellationToken) -> OpenResult {
        if document.is_remote() {
            debug!(target: "companion_open", title = %document.title, "skipping open for remote document");
            return OpenResult::failed(REMOTE_DOCUMENT_MESSAGE);
        }

        let body = build_request(document);
        let payload = match serde_json::to_value(&body) {
            Ok(payload) => payload,
            Err(error) => return OpenResult::failed(error.to_string()),
        };
        let request = TransportRequest::post(OPEN_PATH)
            .json(payload)
            .timeout(timeout)
            .abort_on(abort);

        let result = match self.transport.execute(request).await {
            Ok(response) => classify_open_response(&response),
            Err(error) if error.is_timeout() => OpenResult::failed(TIMEOUT_MESSAGE),
            Err(error) => OpenResult::failed(error.to_string()),
        };
        debug!(
            target: "companion_open",
            title = %document.title,
            candidates = body.candidates.len(),
            ok = result.ok,
            message = ?result.message,
            "open request finished"
        );
        result
    }

    /// Whether `GET /health` answers with a 2xx status within `timeout`.
    pub async fn check_availability(&self, timeout: Duration) -> bool {
        let request = TransportRequest::get(HEALTH_PATH).timeout(timeout);
        match self.transport.execute(request).await {
            Ok(response) => response.is_success(),
            Err(error) => {
                debug!(target: "companion_open", %error, "availability check failed");
                false
            }
        }
    }

    /// Fetch the watched folders.
    pub async fn list_roots(&self) -> Result<WatchedRoots, CompanionError> {
        self.config_call(TransportRequest::get(CONFIG_PATH)).await
    }

    /// Add a watched folder. Invalid paths are rejected without a request.
    pub async fn add_root(&self, path: &str) -> Result<WatchedRoots, CompanionError> {
        validate_root_path(path)?;
        let request = TransportRequest::post(CONFIG_PATH).json(json!({ "addRoot": path.trim() }));
        self.config_call(request).await
    }

    /// Remove a watched folder.
    pub async fn remove_root(&self, path: &str) -> Result<WatchedRoots, CompanionError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(CompanionError::user_input("root path cannot be empty"));
        }
        let request = TransportRequest::delete(CONFIG_PATH).json(json!({ "root": path }));
        self.config_call(request).await
    }

    /// The watched folders returned by the last successful config call.
    pub fn cached_roots(&self) -> Option<WatchedRoots> {
        self.roots.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn config_call(&self, request: TransportRequest) -> Result<WatchedRoots, CompanionError> {
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(response.into_protocol_error());
        }
        let body: ConfigResponseBody = response.json().map_err(|error| {
            warn!(target: "companion_open", %error, "unparsable config response");
            error
        })?;

        let mut cache = self.roots.lock().unwrap_or_else(PoisonError::into_inner);
        // Add/remove responses omit the company; keep the last known one
        let company = body
            .company
            .or_else(|| cache.as_ref().map(|roots| roots.company.clone()))
            .unwrap_or_default();
        let roots = WatchedRoots {
            roots: body.roots,
            company,
        };
        *cache = Some(roots.clone());
        Ok(roots)
    }
}

fn classify_open_response(response: &TransportResponse) -> OpenResult {
    if !response.is_success() {
        return OpenResult::failed(response.error_message());
    }
    match response.json::<OpenResponseBody>() {
        Ok(body) if body.success => OpenResult::ok(),
        Ok(body) => OpenResult::failed(body.message.unwrap_or_else(|| "companion could not open the document".to_string())),
        Err(error) => {
            warn!(target: "companion_open", %error, "unparsable open response");
            OpenResult::failed(error.to_string())
        }
    }
}
