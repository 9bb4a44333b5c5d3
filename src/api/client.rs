use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use super::interceptor::{
    set_header, AdmissionGate, AuthProvider, PortalRequestInterceptor, PortalResponseInterceptor,
    RequestInterceptor, ResponseInterceptor,
};
use super::models::{Body, FetchConfig, FetchResponse, Payload, PortalConfig, ResponseKind};
use super::registry::{RequestHandle, RequestRegistry};

/// Requests whose path contains this fragment are tracked separately so
/// navigation can cancel the burst of per-category count lookups.
pub const THROTTLE_PATH: &str = "digital-assets/category/get-count/";

pub(crate) const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Session is expired.")]
    SessionExpired,

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        body: Payload,
    },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// HTTP client with axios-style interceptor chains.
///
/// Every request is folded through the registered request interceptors,
/// dispatched with cancellation support, then the outcome is folded
/// through the response interceptors. The built-in portal interceptors
/// handle registration, workspace scoping, token attachment and error
/// normalization.
pub struct FetchClient {
    http: Client,
    config: PortalConfig,
    registry: Arc<RequestRegistry>,
    workspace: Arc<Mutex<Option<String>>>,
    request_interceptors: Vec<Box<dyn RequestInterceptor>>,
    response_interceptors: Vec<Box<dyn ResponseInterceptor>>,
}

impl FetchClient {
    pub fn new(
        config: PortalConfig,
        registry: Arc<RequestRegistry>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self::with_gate(config, registry, auth, None)
    }

    pub fn with_gate(
        config: PortalConfig,
        registry: Arc<RequestRegistry>,
        auth: Arc<dyn AuthProvider>,
        gate: Option<Arc<dyn AdmissionGate>>,
    ) -> Self {
        let workspace = Arc::new(Mutex::new(None));
        Self {
            http: Client::new(),
            config,
            registry: registry.clone(),
            workspace: workspace.clone(),
            request_interceptors: vec![Box::new(PortalRequestInterceptor::new(
                registry.clone(),
                auth.clone(),
                gate,
                workspace,
            ))],
            response_interceptors: vec![Box::new(PortalResponseInterceptor::new(registry, auth))],
        }
    }

    /// Append an interceptor. It runs after the built-in one.
    pub fn add_request_interceptor(&mut self, interceptor: Box<dyn RequestInterceptor>) {
        self.request_interceptors.push(interceptor);
    }

    /// Append an interceptor. It runs after the built-in one.
    pub fn add_response_interceptor(&mut self, interceptor: Box<dyn ResponseInterceptor>) {
        self.response_interceptors.push(interceptor);
    }

    /// Set the ambient workspace attached to requests that do not carry
    /// their own `workspace_id` parameter
    pub fn set_workspace(&self, workspace: Option<String>) {
        *self
            .workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = workspace;
    }

    pub fn workspace(&self) -> Option<String> {
        self.workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub async fn get(&self, url: &str) -> Result<FetchResponse> {
        self.request(FetchConfig::get(url)).await
    }

    pub async fn post(&self, url: &str, body: Value) -> Result<FetchResponse> {
        self.request(FetchConfig::post(url).json(body)).await
    }

    pub async fn put(&self, url: &str, body: Value) -> Result<FetchResponse> {
        self.request(FetchConfig::put(url).json(body)).await
    }

    pub async fn patch(&self, url: &str, body: Value) -> Result<FetchResponse> {
        self.request(FetchConfig::patch(url).json(body)).await
    }

    pub async fn delete(&self, url: &str) -> Result<FetchResponse> {
        self.request(FetchConfig::delete(url)).await
    }

    /// Run one request through both interceptor chains.
    pub async fn request(&self, mut config: FetchConfig) -> Result<FetchResponse> {
        config.base_url = Some(if config.use_api_base {
            self.config.api_base_url.clone()
        } else {
            self.config.app_base_url.clone()
        });

        let mut tracked = None;
        let config = match self.run_request_chain(config, &mut tracked).await {
            Ok(config) => config,
            Err(error) => {
                if let Some(handle) = &tracked {
                    self.registry.unregister(handle);
                }
                return self.run_response_chain(Err(error)).await;
            }
        };

        // A recovery may have replaced the config that carried the
        // registered handle. Release anything that is not the handle
        // actually being dispatched.
        if let Some(stale) = &tracked {
            if config.handle.as_ref().map(RequestHandle::id) != Some(stale.id()) {
                self.registry.unregister(stale);
            }
        }

        let handle = config.handle.clone();
        let url = match build_url(&config) {
            Ok(url) => url,
            Err(error) => {
                if let Some(handle) = &handle {
                    self.registry.unregister(handle);
                }
                return self.run_response_chain(Err(error)).await;
            }
        };

        debug!("{} {}", config.method, url);
        let outcome = self.dispatch(config, &url).await;
        if outcome.is_err() {
            // The success path releases the handle in the response
            // interceptor; failures release it here so no path leaks.
            if let Some(handle) = &handle {
                self.registry.unregister(handle);
            }
        }
        self.run_response_chain(outcome).await
    }

    async fn run_request_chain(
        &self,
        mut config: FetchConfig,
        tracked: &mut Option<RequestHandle>,
    ) -> Result<FetchConfig> {
        for interceptor in &self.request_interceptors {
            match interceptor.on_fulfilled(config).await {
                Ok(next) => {
                    *tracked = next.handle.clone();
                    config = next;
                }
                Err(error) => {
                    // Only the interceptor that failed gets to recover,
                    // and a recovered config skips the rest of the chain.
                    return interceptor.on_rejected(error).await;
                }
            }
        }
        Ok(config)
    }

    async fn run_response_chain(
        &self,
        mut outcome: Result<FetchResponse>,
    ) -> Result<FetchResponse> {
        for interceptor in &self.response_interceptors {
            outcome = match outcome {
                Ok(response) => interceptor.on_fulfilled(response).await,
                Err(error) => interceptor.on_rejected(error).await,
            };
        }
        outcome
    }

    async fn dispatch(&self, config: FetchConfig, url: &str) -> Result<FetchResponse> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        for (name, value) in &config.headers {
            set_header(&mut headers, name, value.clone());
        }
        if matches!(config.body, Body::Multipart(_)) {
            // reqwest supplies the boundary content type for multipart
            headers.retain(|(name, _)| !name.eq_ignore_ascii_case("Content-Type"));
        }

        let FetchConfig {
            method,
            body,
            response_kind,
            handle,
            ..
        } = config;

        let bodyless = method == Method::GET || method == Method::HEAD;
        let mut request = self.http.request(method, url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        match body {
            Body::Json(value) if !bodyless => {
                let encoded = serde_json::to_vec(&value)
                    .map_err(|e| ClientError::InvalidResponse(format!("request body: {}", e)))?;
                request = request.body(encoded);
            }
            Body::Multipart(form) if !bodyless => {
                request = request.multipart(form);
            }
            _ => {}
        }

        let send_and_read = async {
            let response = request.send().await?;
            read_response(response, response_kind, handle.clone()).await
        };

        match &handle {
            Some(handle) => {
                tokio::select! {
                    biased;
                    _ = handle.cancelled() => Err(ClientError::Cancelled),
                    result = send_and_read => result,
                }
            }
            None => send_and_read.await,
        }
    }
}

async fn read_response(
    response: reqwest::Response,
    kind: ResponseKind,
    handle: Option<RequestHandle>,
) -> Result<FetchResponse> {
    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or("").to_string();

    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        headers.insert(
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).to_string(),
        );
    }

    let data = match kind {
        ResponseKind::Binary => Payload::Binary(response.bytes().await?),
        ResponseKind::Auto => {
            let is_json = headers
                .get("content-type")
                .map(|ct| ct.contains("application/json"))
                .unwrap_or(false);
            let text = response.text().await?;
            if is_json {
                // Unparseable bodies degrade to an empty payload
                serde_json::from_str(&text).map(Payload::Json).unwrap_or(Payload::Empty)
            } else if text.is_empty() {
                Payload::Empty
            } else {
                Payload::Text(text)
            }
        }
    };

    if !status.is_success() {
        return Err(ClientError::Http {
            status: status.as_u16(),
            message: format!("Request failed with status {}", status.as_u16()),
            body: data,
        });
    }

    Ok(FetchResponse {
        status: status.as_u16(),
        status_text,
        headers,
        data,
        handle,
    })
}

/// Join the configured base with a relative path, or pass a full URL
/// through untouched, then append the non-empty query parameters.
fn build_url(config: &FetchConfig) -> Result<String> {
    let mut full = if config.url.starts_with("http") {
        config.url.clone()
    } else {
        let base = config.base_url.as_deref().unwrap_or("");
        let joined = if config.url.starts_with('/') {
            format!("{}{}", base, config.url)
        } else {
            format!("{}/{}", base, config.url)
        };
        collapse_duplicate_slashes(&joined)
    };

    if config.params.iter().any(|(_, value)| value.is_some()) {
        let mut parsed =
            Url::parse(&full).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", full, e)))?;
        {
            let mut pairs = parsed.query_pairs_mut();
            for (key, value) in &config.params {
                if let Some(value) = value {
                    pairs.append_pair(key, value);
                }
            }
        }
        full = parsed.to_string();
    }

    Ok(full)
}

/// Collapse duplicate slashes while keeping the scheme separator intact
fn collapse_duplicate_slashes(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for c in url.chars() {
        if c == '/' && out.ends_with('/') {
            match out[..out.len() - 1].chars().next_back() {
                Some(':') | None => {}
                Some(_) => continue,
            }
        }
        out.push(c);
    }
    out
}
