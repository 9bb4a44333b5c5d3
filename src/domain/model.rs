use bytes::Bytes;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Idle,
    Downloading,
    Completed,
    Cancelled,
    Failed,
}

/// One entry in the download tracker, mirrored to subscribers on every change.
#[derive(Debug, Clone)]
pub struct DownloadItem {
    pub url: String,
    pub name: String,
    pub progress: u32,
    pub loaded: u64,
    pub total: u64,
    pub phase: DownloadPhase,
    pub error_message: Option<String>,
    pub extras: Map<String, Value>,
}

impl DownloadItem {
    pub fn downloading(&self) -> bool {
        self.phase == DownloadPhase::Downloading
    }
}

/// Input for the single-file download path.
#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub id: String,
    pub url: String,
    pub name: String,
    /// Fallback extension source when neither the name nor the response
    /// content type yields one.
    pub file_type: Option<String>,
    /// Part of a multi-file batch. Disables the cache-busting headers.
    pub multiple: bool,
    pub extras: Map<String, Value>,
}

/// Input for the ZIP generation path.
#[derive(Debug, Clone, Default)]
pub struct ZipRequest {
    pub files: Vec<String>,
    pub folders: Vec<String>,
    pub collection_id: Option<String>,
    pub download_name: Option<String>,
    /// Workspace override used by shared links.
    pub share_workspace_id: Option<String>,
    pub share_mode: bool,
}

/// Input for the server-side image conversion path.
#[derive(Debug, Clone)]
pub struct ImageAssetRequest {
    pub asset_id: String,
    pub file_name: String,
    pub file_type: String,
}

/// What the ZIP generation endpoint decided to do with the batch.
#[derive(Debug, Clone)]
pub enum ZipOutcome {
    /// The server queued the archive and will email a link.
    EmailNotification,
    /// The archive already exists and can be fetched directly.
    DirectLink {
        url: String,
        name: String,
        file_type: Option<String>,
    },
    /// The payload must be posted to the ZIP worker to stream the archive.
    Fetch {
        zip_url: String,
        filename: String,
        payload: Value,
    },
}

/// A fully buffered download, named after extension fixing.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub file_name: String,
    pub bytes: Bytes,
}

/// An image asset re-tagged with its browser-friendly MIME type.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub file_name: String,
    pub mime: String,
    pub bytes: Bytes,
}
