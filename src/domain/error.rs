use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    #[error("Download cancelled")]
    Cancelled,

    #[error("Download failed with status {status} {status_text}")]
    Http { status: u16, status_text: String },

    #[error("No data in response")]
    MissingZipData,

    #[error("API error: {0}")]
    Api(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}
