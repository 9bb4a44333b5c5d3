use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};

use crate::api::client::{ClientError, Result};
use crate::api::endpoints::PortalApi;
use crate::api::interceptor::AuthProvider;
use crate::api::models::User;
use crate::api::registry::RequestRegistry;

/// Credentials snapshot handed to the persistence boundary
#[derive(Debug, Clone)]
pub struct StoredCredentials {
    pub token: String,
    pub user: Option<User>,
}

/// Persistence boundary for session credentials (cookies in a browser
/// host, keychain or disk elsewhere).
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Option<StoredCredentials>;
    fn store(&self, credentials: &StoredCredentials);
    fn clear(&self);
}

/// In-memory store, the default for tests and ephemeral hosts
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<StoredCredentials>>,
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Option<StoredCredentials> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, credentials: &StoredCredentials) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
    }

    fn clear(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Session lifecycle notifications, each fired once per transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    LoggedOut,
    Expired,
}

#[derive(Debug, Clone, Default)]
pub struct LoginOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl LoginOutcome {
    fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Default)]
struct SessionState {
    access_token: Option<String>,
    user: Option<User>,
    loading: bool,
}

/// Live session state shared between the store and the HTTP layer.
///
/// The fetch client only ever reads the token and, on a 401, asks for
/// the session to be cleared; every other mutation goes through
/// [`SessionStore`].
type SessionSubscriber = Arc<dyn Fn(SessionEvent) + Send + Sync>;

pub struct AuthState {
    state: Mutex<SessionState>,
    credentials: Box<dyn CredentialStore>,
    subscribers: Mutex<Vec<SessionSubscriber>>,
}

impl AuthState {
    /// Restore whatever the credential store still holds.
    pub fn new(credentials: Box<dyn CredentialStore>) -> Self {
        let state = match credentials.load() {
            Some(creds) => SessionState {
                access_token: Some(creds.token),
                user: creds.user,
                loading: false,
            },
            None => SessionState::default(),
        };
        Self {
            state: Mutex::new(state),
            credentials,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, subscriber: impl Fn(SessionEvent) + Send + Sync + 'static) {
        self.lock_subscribers().push(Arc::new(subscriber));
    }

    pub fn user(&self) -> Option<User> {
        self.lock_state().user.clone()
    }

    pub fn loading(&self) -> bool {
        self.lock_state().loading
    }

    fn set_loading(&self, loading: bool) {
        self.lock_state().loading = loading;
    }

    /// Install a fresh session and persist it.
    fn establish(&self, token: &str, user: Option<User>) {
        {
            let mut state = self.lock_state();
            state.access_token = Some(token.to_string());
            state.user = user.clone();
        }
        self.credentials.store(&StoredCredentials {
            token: token.to_string(),
            user,
        });
        self.emit(SessionEvent::LoggedIn);
    }

    fn set_user(&self, user: User) {
        let token = {
            let mut state = self.lock_state();
            state.user = Some(user.clone());
            state.access_token.clone()
        };
        if let Some(token) = token {
            self.credentials.store(&StoredCredentials {
                token,
                user: Some(user),
            });
        }
    }

    /// Drop the session, firing `event` only when one actually existed.
    /// Makes repeated 401 sweeps emit a single expiry notification.
    fn clear_with(&self, event: SessionEvent) {
        let had_session = {
            let mut state = self.lock_state();
            let had = state.access_token.is_some();
            state.access_token = None;
            state.user = None;
            had
        };
        if had_session {
            self.credentials.clear();
            self.emit(event);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Snapshot first: handlers may subscribe or clear the session.
        let subscribers: Vec<SessionSubscriber> = self.lock_subscribers().clone();
        for subscriber in &subscribers {
            subscriber(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<SessionSubscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl AuthProvider for AuthState {
    fn access_token(&self) -> Option<String> {
        self.lock_state().access_token.clone()
    }

    fn is_authenticated(&self) -> bool {
        let state = self.lock_state();
        state.access_token.is_some() && state.user.is_some()
    }

    fn clear_session(&self) {
        self.clear_with(SessionEvent::Expired);
    }
}

/// Session operations: login flows, logout, profile refresh and the
/// account suspension check. Owns the registry sweep on logout.
pub struct SessionStore {
    state: Arc<AuthState>,
    api: Arc<PortalApi>,
    registry: Arc<RequestRegistry>,
}

impl SessionStore {
    pub fn new(state: Arc<AuthState>, api: Arc<PortalApi>, registry: Arc<RequestRegistry>) -> Self {
        Self {
            state,
            api,
            registry,
        }
    }

    pub fn state(&self) -> &Arc<AuthState> {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.access_token()
    }

    pub fn user(&self) -> Option<User> {
        self.state.user()
    }

    /// Workspace the signed-in user belongs to, as a string id.
    pub fn workspace_id(&self) -> Option<String> {
        self.state.user().and_then(|user| user.workspace())
    }

    pub fn loading(&self) -> bool {
        self.state.loading()
    }

    pub fn subscribe(&self, subscriber: impl Fn(SessionEvent) + Send + Sync + 'static) {
        self.state.subscribe(subscriber);
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        workspace_slug: Option<&str>,
    ) -> LoginOutcome {
        self.state.set_loading(true);
        let outcome = self.login_inner(email, password, workspace_slug).await;
        self.state.set_loading(false);
        if let Some(error) = &outcome.error {
            warn!("login failed: {}", error);
        }
        outcome
    }

    async fn login_inner(
        &self,
        email: &str,
        password: &str,
        workspace_slug: Option<&str>,
    ) -> LoginOutcome {
        let response = match self.api.login(email, password, workspace_slug).await {
            Ok(response) => response,
            Err(error) => return LoginOutcome::failed(error.to_string()),
        };

        let Some(token) = response.access_token().map(str::to_string) else {
            return LoginOutcome::failed("Invalid response");
        };

        let mut user = response.user().cloned();
        if user.is_none() {
            // Some deployments return only the token; fetch the profile
            // to finish establishing the session.
            match self.api.get_user(&token).await {
                Ok(profile) => user = profile.user().cloned(),
                Err(error) => return LoginOutcome::failed(error.to_string()),
            }
        }
        let Some(user) = user else {
            return LoginOutcome::failed("Invalid response");
        };

        self.state.establish(&token, Some(user));
        info!("session established for {}", email);
        LoginOutcome::succeeded()
    }

    /// Exchange a one-time token from a share or invite link for a
    /// session. Token and user must both be present in the response.
    pub async fn login_with_token(&self, one_time_token: &str) -> LoginOutcome {
        let response = match self.api.login_with_id(one_time_token).await {
            Ok(response) => response,
            Err(error) => return LoginOutcome::failed(error.to_string()),
        };

        match (
            response.access_token().map(str::to_string),
            response.user().cloned(),
        ) {
            (Some(token), Some(user)) => {
                self.state.establish(&token, Some(user));
                LoginOutcome::succeeded()
            }
            _ => LoginOutcome::failed("Invalid response"),
        }
    }

    /// Clear the session. The server call is best effort; local state
    /// and in-flight requests are always swept.
    pub async fn logout(&self) {
        if let Some(token) = self.state.access_token() {
            if let Err(error) = self.api.logout(&token).await {
                warn!("server-side logout failed: {}", error);
            }
        }
        self.state.clear_with(SessionEvent::LoggedOut);
        self.registry.cancel_all();
        info!("logged out");
    }

    /// Fetch the current profile. On failure with `force_redirect_on_error`
    /// the session is dropped so subscribers can route back to login.
    pub async fn get_user(&self, force_redirect_on_error: bool) -> Result<User> {
        let Some(token) = self.state.access_token() else {
            return Err(ClientError::SessionExpired);
        };

        match self.api.get_user(&token).await {
            Ok(response) => match response.user().cloned() {
                Some(user) => {
                    self.state.set_user(user.clone());
                    Ok(user)
                }
                None => Err(ClientError::InvalidResponse(
                    "user missing from response".to_string(),
                )),
            },
            Err(error) => {
                if force_redirect_on_error {
                    self.state.clear_with(SessionEvent::Expired);
                }
                Err(error)
            }
        }
    }

    /// Poll the account suspension flag. A suspended account is logged
    /// out on the spot. Returns whether the account was suspended.
    pub async fn check_account_status(&self) -> Result<bool> {
        if !self.state.is_authenticated() {
            return Ok(false);
        }
        let Some(workspace_id) = self.workspace_id() else {
            return Ok(false);
        };

        let response = self.api.check_account_status(&workspace_id).await?;
        let suspended = response.data.and_then(|d| d.is_suspended).unwrap_or(false);
        if suspended {
            warn!("account suspended, dropping session");
            self.logout().await;
        }
        Ok(suspended)
    }

    /// Scope subsequent requests to a workspace
    pub fn set_workspace(&self, workspace: Option<String>) {
        self.api.client().set_workspace(workspace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::FetchClient;
    use crate::api::models::PortalConfig;
    use mockito::Matcher;
    use serde_json::{json, Map};

    fn test_user(id: i64, workspace: Option<&str>) -> User {
        User {
            id,
            email: Some("a@b.co".to_string()),
            name: None,
            workspace_id: workspace.map(|w| json!(w)),
            extra: Map::new(),
        }
    }

    fn store_with_state(server: &mockito::Server, state: Arc<AuthState>) -> SessionStore {
        let registry = Arc::new(RequestRegistry::new());
        let client = FetchClient::new(
            PortalConfig::new(server.url(), server.url()),
            registry.clone(),
            state.clone(),
        );
        let api = Arc::new(PortalApi::new(Arc::new(client)));
        SessionStore::new(state, api, registry)
    }

    fn store_for(server: &mockito::Server) -> SessionStore {
        store_with_state(
            server,
            Arc::new(AuthState::new(Box::new(MemoryCredentialStore::default()))),
        )
    }

    fn seeded_store(server: &mockito::Server, token: &str, user: User) -> SessionStore {
        let creds = MemoryCredentialStore::default();
        creds.store(&StoredCredentials {
            token: token.to_string(),
            user: Some(user),
        });
        store_with_state(server, Arc::new(AuthState::new(Box::new(creds))))
    }

    fn record_events(store: &SessionStore) -> Arc<Mutex<Vec<SessionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        store.subscribe(move |event| sink.lock().unwrap().push(event));
        events
    }

    #[tokio::test]
    async fn test_login_success_establishes_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"access_token":"tok","user":{"id":1,"email":"a@b.co"}}}"#)
            .create_async()
            .await;

        let store = store_for(&server);
        let events = record_events(&store);
        let outcome = store.login("a@b.co", "secret", None).await;

        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert!(store.is_authenticated());
        assert_eq!(store.access_token().as_deref(), Some("tok"));
        assert_eq!(*events.lock().unwrap(), vec![SessionEvent::LoggedIn]);
    }

    #[tokio::test]
    async fn test_login_failure_keeps_session_clear() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"Invalid credentials"}"#)
            .create_async()
            .await;

        let store = store_for(&server);
        let outcome = store.login("a@b.co", "wrong", None).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Invalid credentials"));
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_fetches_missing_profile() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok"}"#)
            .create_async()
            .await;
        let user_mock = server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"user":{"id":4}}}"#)
            .create_async()
            .await;

        let store = store_for(&server);
        let outcome = store.login("a@b.co", "secret", None).await;

        user_mock.assert_async().await;
        assert!(outcome.success);
        assert_eq!(store.user().unwrap().id, 4);
    }

    #[tokio::test]
    async fn test_repeated_401_expires_session_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/user")
            .with_status(401)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let store = seeded_store(&server, "stale", test_user(1, None));
        let events = record_events(&store);

        let first = store.get_user(false).await;
        let second = store.get_user(false).await;

        mock.assert_async().await;
        assert!(matches!(first, Err(ClientError::SessionExpired)));
        assert!(matches!(second, Err(ClientError::SessionExpired)));
        assert_eq!(*events.lock().unwrap(), vec![SessionEvent::Expired]);
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_subscriber_can_resubscribe_during_emit() {
        let creds = MemoryCredentialStore::default();
        creds.store(&StoredCredentials {
            token: "tok".to_string(),
            user: Some(test_user(1, None)),
        });
        let state = Arc::new(AuthState::new(Box::new(creds)));
        let observer = state.clone();
        let fired = Arc::new(Mutex::new(0));
        let count = fired.clone();
        state.subscribe(move |_| {
            *count.lock().unwrap() += 1;
            observer.subscribe(|_| {});
        });

        state.clear_session();

        assert_eq!(*fired.lock().unwrap(), 1);
        assert!(!state.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_clears_state_and_sweeps_registry() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/logout")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let store = seeded_store(&server, "tok", test_user(1, None));
        let events = record_events(&store);
        let lingering = store.registry.register();

        store.logout().await;

        assert!(!store.is_authenticated());
        assert!(store.access_token().is_none());
        assert!(lingering.is_cancelled());
        assert_eq!(store.registry.active_count(), 0);
        assert_eq!(*events.lock().unwrap(), vec![SessionEvent::LoggedOut]);
    }

    #[tokio::test]
    async fn test_logout_survives_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/logout")
            .with_status(500)
            .with_body("{}")
            .create_async()
            .await;

        let store = seeded_store(&server, "tok", test_user(1, None));
        store.logout().await;

        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_suspended_account_is_logged_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/digital/check-account-status")
            .match_query(Matcher::UrlEncoded(
                "workspace_id".to_string(),
                "w1".to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"is_suspended":true}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/logout")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let store = seeded_store(&server, "tok", test_user(1, Some("w1")));
        let events = record_events(&store);
        let suspended = store.check_account_status().await.unwrap();

        assert!(suspended);
        assert!(!store.is_authenticated());
        assert_eq!(*events.lock().unwrap(), vec![SessionEvent::LoggedOut]);
    }

    #[tokio::test]
    async fn test_active_account_stays_logged_in() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/digital/check-account-status")
            .match_query(Matcher::UrlEncoded(
                "workspace_id".to_string(),
                "w1".to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"is_suspended":false}}"#)
            .create_async()
            .await;

        let store = seeded_store(&server, "tok", test_user(1, Some("w1")));
        let suspended = store.check_account_status().await.unwrap();

        assert!(!suspended);
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_with_token_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login-with-id")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"access_token":"tok","user":{"id":2}}}"#)
            .create_async()
            .await;

        let store = store_for(&server);
        let outcome = store.login_with_token("one-time").await;

        assert!(outcome.success);
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_with_token_rejects_partial_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login-with-id")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok"}"#)
            .create_async()
            .await;

        let store = store_for(&server);
        let outcome = store.login_with_token("one-time").await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Invalid response"));
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_session_restored_from_credentials() {
        let server = mockito::Server::new_async().await;
        let store = seeded_store(&server, "persisted", test_user(9, None));

        assert!(store.is_authenticated());
        assert_eq!(store.access_token().as_deref(), Some("persisted"));
        assert_eq!(store.user().unwrap().id, 9);
    }
}
