use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt};
use log::{info, warn};
use reqwest::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, EXPIRES, PRAGMA};
use serde_json::{json, Map, Value};

use crate::api::client::ClientError;
use crate::api::endpoints::PortalApi;
use crate::api::models::PortalConfig;
use crate::api::registry::{RequestHandle, RequestRegistry};
use crate::application::notify::Notifier;
use crate::application::save::SaveSink;
use crate::application::tracker::DownloadTracker;
use crate::domain::{
    DownloadError, DownloadItem, DownloadPhase, DownloadRequest, DownloadedFile, ImageAsset,
    ImageAssetRequest, ZipOutcome, ZipRequest,
};
use crate::utils::{
    content_disposition_filename, default_zip_name, ensure_extension, mime_for_image, unique_id,
};

const EMAIL_NOTIFICATION_MESSAGE: &str =
    "You will be receiving an email with zip file download link shortly!";

/// Per-chunk progress observer: `(percent, loaded, total)`
pub type ProgressCallback = Box<dyn Fn(u32, u64, u64) + Send + Sync>;

/// Chunked downloads with progress, ZIP batch assembly and image
/// conversion.
///
/// Single-file transfers stream straight off the asset URL; batch
/// requests go through the portal API to obtain either an emailed link,
/// a direct URL or a worker payload that is then streamed to the sink.
pub struct DownloadEngine {
    api: Arc<PortalApi>,
    http: reqwest::Client,
    config: PortalConfig,
    registry: Arc<RequestRegistry>,
    tracker: Arc<DownloadTracker>,
    notifier: Arc<dyn Notifier>,
    sink: Arc<dyn SaveSink>,
}

impl DownloadEngine {
    pub fn new(
        api: Arc<PortalApi>,
        config: PortalConfig,
        registry: Arc<RequestRegistry>,
        tracker: Arc<DownloadTracker>,
        notifier: Arc<dyn Notifier>,
        sink: Arc<dyn SaveSink>,
    ) -> Self {
        Self {
            api,
            http: reqwest::Client::new(),
            config,
            registry,
            tracker,
            notifier,
            sink,
        }
    }

    pub fn tracker(&self) -> &Arc<DownloadTracker> {
        &self.tracker
    }

    /// Cancel a tracked download by id. Returns whether one was found.
    pub fn cancel(&self, id: &str) -> bool {
        self.tracker.cancel(id)
    }

    pub async fn download_file(
        &self,
        request: DownloadRequest,
    ) -> Result<Option<DownloadedFile>, DownloadError> {
        self.download_file_with_progress(request, None).await
    }

    /// Stream a single file to the sink, reporting progress per chunk.
    ///
    /// Starting an id that is already downloading is a no-op and returns
    /// `Ok(None)`. The registry handle is released on every exit path;
    /// cancellation surfaces as [`DownloadError::Cancelled`] rather than
    /// a generic failure.
    pub async fn download_file_with_progress(
        &self,
        request: DownloadRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Option<DownloadedFile>, DownloadError> {
        let handle = self.registry.register();
        let item = DownloadItem {
            url: request.url.clone(),
            name: request.name.clone(),
            progress: 0,
            loaded: 0,
            total: 0,
            phase: DownloadPhase::Downloading,
            error_message: None,
            extras: request.extras.clone(),
        };
        if !self.tracker.begin(&request.id, item, handle.clone()) {
            self.registry.unregister(&handle);
            return Ok(None);
        }

        let result = self.transfer(&request, &handle, on_progress.as_ref()).await;
        self.registry.unregister(&handle);

        match result {
            Ok(file) => {
                self.tracker.complete(&request.id);
                self.tracker.remove(&request.id);
                info!("downloaded {}", file.file_name);
                Ok(Some(file))
            }
            Err(error) => {
                let phase = if error.is_cancelled() {
                    DownloadPhase::Cancelled
                } else {
                    DownloadPhase::Failed
                };
                self.tracker.fail(&request.id, phase, &error.to_string());
                self.tracker.remove(&request.id);
                if !error.is_cancelled() {
                    self.notifier.error(&error.to_string());
                }
                Err(error)
            }
        }
    }

    async fn transfer(
        &self,
        request: &DownloadRequest,
        handle: &RequestHandle,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<DownloadedFile, DownloadError> {
        let file = self.fetch_single(request, handle, on_progress).await?;
        self.sink.save(&file.file_name, file.bytes.clone()).await?;
        Ok(file)
    }

    async fn fetch_single(
        &self,
        request: &DownloadRequest,
        handle: &RequestHandle,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<DownloadedFile, DownloadError> {
        let mut builder = self.http.get(&request.url);
        if !request.multiple {
            // Force an end-to-end fetch; cached responses may come back
            // without the headers the progress math needs.
            builder = builder
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache")
                .header(EXPIRES, "0");
        }

        let send = builder.send();
        let response = tokio::select! {
            biased;
            _ = handle.cancelled() => return Err(DownloadError::Cancelled),
            response = send => response.map_err(|e| DownloadError::Request(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let total = response.content_length().unwrap_or(0);

        let mut stream = response.bytes_stream();
        let mut buffer = BytesMut::new();
        let mut loaded: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = handle.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| DownloadError::Request(e.to_string()))?;
            loaded += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);

            let progress = if total > 0 {
                (loaded as f64 * 100.0 / total as f64).round() as u32
            } else {
                0
            };
            self.tracker
                .update_progress(&request.id, progress, loaded, total);
            if let Some(callback) = on_progress {
                callback(progress, loaded, total);
            }
        }

        let file_name = ensure_extension(
            &request.name,
            content_type.as_deref(),
            request.file_type.as_deref(),
        );
        Ok(DownloadedFile {
            file_name,
            bytes: buffer.freeze(),
        })
    }

    /// Submit a batch to the ZIP generation endpoint and classify the
    /// response.
    ///
    /// A missing payload is a hard failure for share-mode callers but
    /// only means "link arrives by email" otherwise. Only a share
    /// response can resolve to a direct asset link; normal batches
    /// always go through the worker.
    pub async fn request_zip(&self, request: &ZipRequest) -> Result<ZipOutcome, DownloadError> {
        let body = self.zip_request_body(request);
        let response = if request.share_mode {
            self.api.share_zip_data(body).await
        } else {
            self.api.generate_zip_data(body).await
        };
        let response = response.map_err(map_client_error)?;

        let Some(data) = response.data else {
            if request.share_mode {
                return Err(DownloadError::MissingZipData);
            }
            warn!("zip generation returned no data, link will arrive by email");
            self.notifier.success(EMAIL_NOTIFICATION_MESSAGE);
            return Ok(ZipOutcome::EmailNotification);
        };

        if request.share_mode {
            if let (Some(url), Some(name)) = (data.url.clone(), data.file_name.clone()) {
                return Ok(ZipOutcome::DirectLink {
                    url,
                    name,
                    file_type: data.file_type.clone(),
                });
            }
        }

        let filename = data.zip_file_name.clone().unwrap_or_else(|| {
            format!(
                "{}.zip",
                request
                    .download_name
                    .clone()
                    .unwrap_or_else(default_zip_name)
            )
        });
        let payload =
            serde_json::to_value(&data).map_err(|e| DownloadError::Api(e.to_string()))?;
        Ok(ZipOutcome::Fetch {
            zip_url: self.config.zip_worker_url().to_string(),
            filename,
            payload,
        })
    }

    fn zip_request_body(&self, request: &ZipRequest) -> Value {
        let mut body = Map::new();
        let workspace = request
            .share_workspace_id
            .clone()
            .or_else(|| self.api.client().workspace());
        if let Some(workspace) = workspace {
            body.insert("workspace_id".to_string(), json!(workspace));
        }
        if !request.files.is_empty() {
            body.insert("assets_ids".to_string(), json!(request.files));
        }
        if !request.folders.is_empty() {
            body.insert("category_ids".to_string(), json!(request.folders));
        }
        if let Some(collection) = &request.collection_id {
            body.insert("collection_ids".to_string(), json!([collection]));
        }
        Value::Object(body)
    }

    /// Act on a classified ZIP outcome: fetch direct links as a regular
    /// download, stream worker payloads into the sink, pass the email
    /// case through. The returned outcome carries the authoritative
    /// filename for the streamed case.
    pub async fn run_zip_download(&self, outcome: ZipOutcome) -> Result<ZipOutcome, DownloadError> {
        match outcome {
            ZipOutcome::EmailNotification => Ok(ZipOutcome::EmailNotification),
            ZipOutcome::DirectLink {
                url,
                name,
                file_type,
            } => {
                let request = DownloadRequest {
                    id: unique_id("download"),
                    url: url.clone(),
                    name: name.clone(),
                    file_type: file_type.clone(),
                    multiple: true,
                    extras: Map::new(),
                };
                self.download_file(request).await?;
                Ok(ZipOutcome::DirectLink {
                    url,
                    name,
                    file_type,
                })
            }
            ZipOutcome::Fetch {
                zip_url,
                filename,
                payload,
            } => {
                let stream = self
                    .final_download(&zip_url, &filename, payload.clone())
                    .await?;
                let file_name = stream.file_name.clone();
                let written = self
                    .sink
                    .save_stream(&file_name, stream.into_byte_stream())
                    .await?;
                info!("streamed {} bytes into {}", written, file_name);
                Ok(ZipOutcome::Fetch {
                    zip_url,
                    filename: file_name,
                    payload,
                })
            }
        }
    }

    /// Full batch pipeline: classify, then execute.
    pub async fn download_zip(&self, request: &ZipRequest) -> Result<ZipOutcome, DownloadError> {
        let outcome = self.request_zip(request).await?;
        self.run_zip_download(outcome).await
    }

    /// POST the archive payload to the worker and open the byte stream.
    /// The `Content-Disposition` filename wins over `fallback_name`.
    pub async fn final_download(
        &self,
        zip_url: &str,
        fallback_name: &str,
        payload: Value,
    ) -> Result<ZipStream, DownloadError> {
        let url = format!("{}download", zip_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "payload": payload }))
            .send()
            .await
            .map_err(|e| DownloadError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let status_text = status.canonical_reason().unwrap_or("Unknown").to_string();
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| {
                    body.get("error")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(status_text);
            return Err(DownloadError::Api(message));
        }

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(content_disposition_filename)
            .unwrap_or_else(|| fallback_name.to_string());

        Ok(ZipStream {
            file_name,
            response,
        })
    }

    /// Download a server-rendered image variant and re-tag its MIME
    /// type. The conversion endpoint does not reliably set one.
    pub async fn download_image_asset(
        &self,
        request: &ImageAssetRequest,
    ) -> Result<ImageAsset, DownloadError> {
        let mut body = Map::new();
        if let Some(workspace) = self.api.client().workspace() {
            body.insert("workspace_id".to_string(), json!(workspace));
        }
        body.insert("digital_assets_id".to_string(), json!(request.asset_id));
        body.insert("image_type".to_string(), json!("actual"));

        let bytes = self
            .api
            .download_file(Value::Object(body))
            .await
            .map_err(map_client_error)?;
        let mime = mime_for_image(&request.file_type).to_string();
        self.sink.save(&request.file_name, bytes.clone()).await?;
        info!("converted image {} tagged as {}", request.file_name, mime);
        Ok(ImageAsset {
            file_name: request.file_name.clone(),
            mime,
            bytes,
        })
    }
}

fn map_client_error(error: ClientError) -> DownloadError {
    if error.is_cancelled() {
        DownloadError::Cancelled
    } else {
        DownloadError::Api(error.to_string())
    }
}

/// An open connection to the ZIP worker, already named and ready to
/// stream.
#[derive(Debug)]
pub struct ZipStream {
    file_name: String,
    response: reqwest::Response,
}

impl ZipStream {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Total size, when the worker declared one
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    pub fn into_byte_stream(self) -> BoxStream<'static, Result<Bytes, DownloadError>> {
        self.response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| DownloadError::Request(e.to_string())))
            .boxed()
    }
}
