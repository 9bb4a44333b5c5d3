use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use log::{debug, warn};

use super::client::{ClientError, Result, GENERIC_ERROR_MESSAGE, THROTTLE_PATH};
use super::models::{FetchConfig, FetchResponse};
use super::registry::RequestRegistry;

/// Session state as seen from the HTTP layer.
pub trait AuthProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn is_authenticated(&self) -> bool;

    /// Called when the backend rejects the token. Implementations clear
    /// persisted credentials so the next request starts clean.
    fn clear_session(&self);
}

/// Pre-dispatch gate. Lets embedders slot in queueing or rate limiting
/// without touching the client itself.
pub trait AdmissionGate: Send + Sync {
    /// Resolves when the request may proceed.
    fn admit<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ()>;
}

/// Rewrite hook applied to every outgoing request.
///
/// The client folds the config through each registered interceptor in
/// order. When an `on_fulfilled` fails, the same interceptor's
/// `on_rejected` gets a chance to recover; a recovery short-circuits
/// the rest of the chain and the recovered config is dispatched as is.
pub trait RequestInterceptor: Send + Sync {
    fn on_fulfilled<'a>(&'a self, config: FetchConfig) -> BoxFuture<'a, Result<FetchConfig>> {
        Box::pin(async move { Ok(config) })
    }

    fn on_rejected<'a>(&'a self, error: ClientError) -> BoxFuture<'a, Result<FetchConfig>> {
        Box::pin(async move { Err(error) })
    }
}

/// Hook applied to every settled response.
///
/// A successful response flows through each `on_fulfilled`; an error
/// switches the remaining interceptors onto their `on_rejected` branch,
/// which may recover back into a response.
pub trait ResponseInterceptor: Send + Sync {
    fn on_fulfilled<'a>(&'a self, response: FetchResponse) -> BoxFuture<'a, Result<FetchResponse>> {
        Box::pin(async move { Ok(response) })
    }

    fn on_rejected<'a>(&'a self, error: ClientError) -> BoxFuture<'a, Result<FetchResponse>> {
        Box::pin(async move { Err(error) })
    }
}

/// Insert or replace a header, matching names case-insensitively
pub(crate) fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value));
}

/// Insert or replace a query param, keeping one entry per key
pub(crate) fn set_param(
    params: &mut Vec<(String, Option<String>)>,
    name: &str,
    value: Option<String>,
) {
    params.retain(|(n, _)| n != name);
    params.push((name.to_string(), value));
}

/// Built-in request interceptor: admission, cancellation registration,
/// workspace scoping and token attachment, in that order.
pub struct PortalRequestInterceptor {
    registry: Arc<RequestRegistry>,
    auth: Arc<dyn AuthProvider>,
    gate: Option<Arc<dyn AdmissionGate>>,
    workspace: Arc<Mutex<Option<String>>>,
}

impl PortalRequestInterceptor {
    pub fn new(
        registry: Arc<RequestRegistry>,
        auth: Arc<dyn AuthProvider>,
        gate: Option<Arc<dyn AdmissionGate>>,
        workspace: Arc<Mutex<Option<String>>>,
    ) -> Self {
        Self {
            registry,
            auth,
            gate,
            workspace,
        }
    }

    fn ambient_workspace(&self) -> Option<String> {
        self.workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RequestInterceptor for PortalRequestInterceptor {
    fn on_fulfilled<'a>(&'a self, mut config: FetchConfig) -> BoxFuture<'a, Result<FetchConfig>> {
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                gate.admit(&config.url).await;
            }

            let handle = self.registry.register();
            if config.url.contains(THROTTLE_PATH) {
                self.registry.mark_throttled(&handle);
            }
            config.handle = Some(handle);

            // Workspace scoping: the ambient value wins; a caller
            // supplied workspace_id param only applies when no ambient
            // workspace is set. `None` values are skipped when the URL
            // is built.
            let workspace = self.ambient_workspace();
            if workspace.is_some() || !config.has_param("workspace_id") {
                set_param(&mut config.params, "workspace_id", workspace);
            }

            if !config.skip_auth {
                if let Some(token) = self.auth.access_token() {
                    set_header(
                        &mut config.headers,
                        "Authorization",
                        format!("Bearer {}", token),
                    );
                }
            }

            Ok(config)
        })
    }
}

/// Built-in response interceptor: releases the cancellation handle on
/// success and normalizes failures into the client error taxonomy.
pub struct PortalResponseInterceptor {
    registry: Arc<RequestRegistry>,
    auth: Arc<dyn AuthProvider>,
}

impl PortalResponseInterceptor {
    pub fn new(registry: Arc<RequestRegistry>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { registry, auth }
    }
}

impl ResponseInterceptor for PortalResponseInterceptor {
    fn on_fulfilled<'a>(&'a self, response: FetchResponse) -> BoxFuture<'a, Result<FetchResponse>> {
        Box::pin(async move {
            if let Some(handle) = &response.handle {
                self.registry.unregister(handle);
            }
            Ok(response)
        })
    }

    fn on_rejected<'a>(&'a self, error: ClientError) -> BoxFuture<'a, Result<FetchResponse>> {
        Box::pin(async move {
            match error {
                ClientError::Cancelled => {
                    debug!("request aborted by caller");
                    Err(ClientError::Cancelled)
                }
                ClientError::Http { status: 401, .. } => {
                    warn!("received 401, clearing session");
                    self.auth.clear_session();
                    Err(ClientError::SessionExpired)
                }
                ClientError::Http { status, body, .. } => {
                    let message = body.message().unwrap_or(GENERIC_ERROR_MESSAGE).to_string();
                    Err(ClientError::Http {
                        status,
                        message,
                        body,
                    })
                }
                other => Err(other),
            }
        })
    }
}
