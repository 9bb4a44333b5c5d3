use std::path::PathBuf;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::domain::DownloadError;
use crate::utils::sanitize_filename;

/// Save-as boundary for finished and streaming downloads.
pub trait SaveSink: Send + Sync {
    /// Persist a fully buffered file
    fn save<'a>(&'a self, name: &'a str, bytes: Bytes) -> BoxFuture<'a, Result<(), DownloadError>>;

    /// Persist a byte stream as it arrives. Returns the bytes written.
    fn save_stream<'a>(
        &'a self,
        name: &'a str,
        stream: BoxStream<'a, Result<Bytes, DownloadError>>,
    ) -> BoxFuture<'a, Result<u64, DownloadError>>;
}

/// Sink that writes into a fixed directory, sanitizing names so they
/// cannot escape it.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn target(&self, name: &str) -> PathBuf {
        self.dir.join(sanitize_filename(name))
    }

    async fn create(&self, name: &str) -> Result<tokio::fs::File, DownloadError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| DownloadError::Io(format!("Failed to create directory: {}", e)))?;
        tokio::fs::File::create(self.target(name))
            .await
            .map_err(|e| DownloadError::Io(format!("Failed to create file: {}", e)))
    }
}

impl SaveSink for DirectorySink {
    fn save<'a>(&'a self, name: &'a str, bytes: Bytes) -> BoxFuture<'a, Result<(), DownloadError>> {
        Box::pin(async move {
            let mut file = self.create(name).await?;
            file.write_all(&bytes)
                .await
                .map_err(|e| DownloadError::Io(format!("Write error: {}", e)))?;
            file.sync_all()
                .await
                .map_err(|e| DownloadError::Io(format!("Failed to sync file: {}", e)))?;
            Ok(())
        })
    }

    fn save_stream<'a>(
        &'a self,
        name: &'a str,
        mut stream: BoxStream<'a, Result<Bytes, DownloadError>>,
    ) -> BoxFuture<'a, Result<u64, DownloadError>> {
        Box::pin(async move {
            let mut file = self.create(name).await?;
            let mut written: u64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| DownloadError::Io(format!("Write error: {}", e)))?;
                written += chunk.len() as u64;
            }
            file.sync_all()
                .await
                .map_err(|e| DownloadError::Io(format!("Failed to sync file: {}", e)))?;
            Ok(written)
        })
    }
}
