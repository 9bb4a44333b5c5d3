use std::sync::Arc;

use crate::api::client::FetchClient;
use crate::api::endpoints::PortalApi;
use crate::api::interceptor::AdmissionGate;
use crate::api::models::PortalConfig;
use crate::api::registry::RequestRegistry;
use crate::application::download_engine::DownloadEngine;
use crate::application::notify::{LogNotifier, Notifier};
use crate::application::save::{DirectorySink, SaveSink};
use crate::application::session::{AuthState, CredentialStore, MemoryCredentialStore, SessionStore};
use crate::application::tracker::DownloadTracker;

/// The fully wired client: one registry, one session and one download
/// engine sharing the same HTTP stack.
pub struct Portal {
    config: PortalConfig,
    registry: Arc<RequestRegistry>,
    client: Arc<FetchClient>,
    api: Arc<PortalApi>,
    session: SessionStore,
    downloads: DownloadEngine,
}

impl Portal {
    /// Build with default collaborators: in-memory credentials, log
    /// notifications, a `downloads` directory sink and no gate.
    pub fn new(config: PortalConfig) -> Self {
        PortalBuilder::new(config).build()
    }

    pub fn builder(config: PortalConfig) -> PortalBuilder {
        PortalBuilder::new(config)
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn client(&self) -> &Arc<FetchClient> {
        &self.client
    }

    pub fn api(&self) -> &Arc<PortalApi> {
        &self.api
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn downloads(&self) -> &DownloadEngine {
        &self.downloads
    }

    /// Sweep every in-flight request, e.g. on teardown.
    pub fn cancel_all_requests(&self) {
        self.registry.cancel_all();
    }

    /// Cancel only the throttled polling requests, e.g. when leaving a
    /// view that polls asset counts.
    pub fn cancel_throttled_requests(&self) {
        self.registry.cancel_throttled();
    }

    /// Scope subsequent requests to a workspace.
    pub fn set_workspace(&self, workspace: Option<String>) {
        self.client.set_workspace(workspace);
    }
}

/// Assembles a [`Portal`], letting hosts swap the collaborators that
/// touch their environment.
pub struct PortalBuilder {
    config: PortalConfig,
    credentials: Box<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    sink: Option<Arc<dyn SaveSink>>,
    gate: Option<Arc<dyn AdmissionGate>>,
}

impl PortalBuilder {
    pub fn new(config: PortalConfig) -> Self {
        Self {
            config,
            credentials: Box::new(MemoryCredentialStore::default()),
            notifier: Arc::new(LogNotifier),
            sink: None,
            gate: None,
        }
    }

    pub fn credentials(mut self, credentials: Box<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn SaveSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn AdmissionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn build(self) -> Portal {
        let state = Arc::new(AuthState::new(self.credentials));
        let registry = Arc::new(RequestRegistry::new());
        let client = Arc::new(FetchClient::with_gate(
            self.config.clone(),
            registry.clone(),
            state.clone(),
            self.gate,
        ));
        let api = Arc::new(PortalApi::new(client.clone()));
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(DirectorySink::new("downloads")));

        let session = SessionStore::new(state, api.clone(), registry.clone());
        let tracker = Arc::new(DownloadTracker::new());
        let downloads = DownloadEngine::new(
            api.clone(),
            self.config.clone(),
            registry.clone(),
            tracker,
            self.notifier,
            sink,
        );

        Portal {
            config: self.config,
            registry,
            client,
            api,
            session,
            downloads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_login_token_flows_into_requests() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"access_token":"tok","user":{"id":1}}}"#)
            .create_async()
            .await;
        let data_mock = server
            .mock("GET", "/digital/common-data")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let portal = Portal::new(PortalConfig::new(server.url(), server.url()));
        let outcome = portal.session().login("a@b.co", "pw", None).await;
        assert!(outcome.success);

        let data = portal.api().common_data().await.unwrap();
        data_mock.assert_async().await;
        assert_eq!(data["ok"], json!(true));
    }

    #[test]
    fn test_cancel_all_requests_clears_registry() {
        let portal = Portal::new(PortalConfig::default());
        let handle = portal.registry().register();

        portal.cancel_all_requests();

        assert!(handle.is_cancelled());
        assert_eq!(portal.registry().active_count(), 0);
    }

    #[test]
    fn test_workspace_applies_to_the_shared_client() {
        let portal = Portal::new(PortalConfig::default());
        portal.set_workspace(Some("w9".to_string()));

        assert_eq!(portal.client().workspace().as_deref(), Some("w9"));
    }

    #[test]
    fn test_fresh_portal_is_unauthenticated() {
        let portal = Portal::new(PortalConfig::default());

        assert!(!portal.session().is_authenticated());
        assert!(portal.session().access_token().is_none());
        assert_eq!(portal.downloads().tracker().count(), 0);
    }
}
