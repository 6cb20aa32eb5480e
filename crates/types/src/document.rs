//! Document open requests and watched-folder configuration.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// The fields of a tracked document needed to locate it on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub title: String,
    pub revision: String,
    pub file_type: String,
    pub logical_path: String,
    /// Set when the document lives in remote storage instead of a local folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
}

impl DocumentRef {
    pub fn new(
        title: impl Into<String>,
        revision: impl Into<String>,
        file_type: impl Into<String>,
        logical_path: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            revision: revision.into(),
            file_type: file_type.into(),
            logical_path: logical_path.into(),
            remote_url: None,
        }
    }

    /// Attach a remote storage URL.
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    /// Whether the document is stored remotely.
    pub fn is_remote(&self) -> bool {
        self.remote_url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }
}

/// Body of `POST /open` on the companion service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDocumentRequest {
    pub title: String,
    pub revision: String,
    pub file_type: String,
    pub logical_path: String,
    /// Filenames to try, in priority order, without duplicates.
    pub candidates: IndexSet<String>,
}

/// Outcome of asking the companion service to open a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OpenResult {
    pub fn ok() -> Self {
        Self { ok: true, message: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

/// Company the companion service is configured for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Folders the companion service searches when opening documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedRoots {
    #[serde(default)]
    pub roots: IndexSet<String>,
    #[serde(default)]
    pub company: CompanyInfo,
}
