use std::collections::HashMap;
use std::env;

use bytes::Bytes;
use reqwest::multipart::Form;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::registry::RequestHandle;

/// ZIP streaming worker used when no override is configured
pub const DEFAULT_ZIP_WORKER_URL: &str = "https://devworker.collage.inc/";

/// Configuration for the portal client
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Base for the versioned API routes
    pub api_base_url: String,
    /// Base for top-level app routes such as `verify-domain`
    pub app_base_url: String,
    /// Override for the ZIP streaming worker
    pub zip_download_url: Option<String>,
}

impl PortalConfig {
    pub fn new(api_base_url: impl Into<String>, app_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            app_base_url: app_base_url.into(),
            zip_download_url: None,
        }
    }

    /// Read configuration from the environment, keeping defaults for
    /// anything unset
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base_url: env::var("API_BASE_URL").unwrap_or(defaults.api_base_url),
            app_base_url: env::var("BASE_URL").unwrap_or(defaults.app_base_url),
            zip_download_url: env::var("ZIP_DOWNLOAD_URL").ok(),
        }
    }

    pub fn zip_worker_url(&self) -> &str {
        self.zip_download_url
            .as_deref()
            .unwrap_or(DEFAULT_ZIP_WORKER_URL)
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api/".to_string(),
            app_base_url: "http://localhost:3000/".to_string(),
            zip_download_url: None,
        }
    }
}

/// Request body variants
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    Multipart(Form),
}

/// How the response body should be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
    /// JSON when the content type says so, text otherwise
    #[default]
    Auto,
    /// Raw bytes, for blob endpoints
    Binary,
}

/// Request description consumed by the fetch client. Interceptors may
/// rewrite any part of it before dispatch.
#[derive(Debug)]
pub struct FetchConfig {
    pub method: Method,
    /// Path relative to the configured base, or a full URL
    pub url: String,
    /// Query parameters in insertion order. `None` values are skipped
    /// when the URL is built.
    pub params: Vec<(String, Option<String>)>,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    /// Resolve relative paths against the API base rather than the app base
    pub use_api_base: bool,
    /// Leave out the Authorization header even when a token exists
    pub skip_auth: bool,
    pub response_kind: ResponseKind,
    pub(crate) base_url: Option<String>,
    pub(crate) handle: Option<RequestHandle>,
}

impl FetchConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: Body::Empty,
            use_api_base: true,
            skip_auth: false,
            response_kind: ResponseKind::Auto,
            base_url: None,
            handle: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    pub fn multipart(mut self, form: Form) -> Self {
        self.body = Body::Multipart(form);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), Some(value.into())));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    /// Resolve against the app base URL instead of the API base
    pub fn app_base(mut self) -> Self {
        self.use_api_base = false;
        self
    }

    /// Read the response body as raw bytes instead of JSON or text
    pub fn binary(mut self) -> Self {
        self.response_kind = ResponseKind::Binary;
        self
    }

    pub fn has_param(&self, key: &str) -> bool {
        self.params.iter().any(|(k, _)| k == key)
    }

    pub fn handle(&self) -> Option<&RequestHandle> {
        self.handle.as_ref()
    }
}

/// Decoded response body
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    Empty,
    Json(Value),
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The `message` field of a JSON error body, when present
    pub fn message(&self) -> Option<&str> {
        self.as_json()?.get("message")?.as_str()
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Payload::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Response seen by callers and response interceptors
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    /// Header names lowercased
    pub headers: HashMap<String, String>,
    pub data: Payload,
    pub(crate) handle: Option<RequestHandle>,
}

impl FetchResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Response shape shared by the login and user endpoints. Some
/// deployments nest the payload under `data`, others return it flat,
/// so both are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub data: Option<AuthData>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthData {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthResponse {
    pub fn access_token(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.access_token.as_deref())
            .or(self.access_token.as_deref())
    }

    pub fn user(&self) -> Option<&User> {
        self.data
            .as_ref()
            .and_then(|d| d.user.as_ref())
            .or(self.user.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Workspace id as a string regardless of how the backend typed it
    pub fn workspace(&self) -> Option<String> {
        match &self.workspace_id {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Response from the ZIP generation endpoints
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ZipDataResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ZipData>,
}

/// Archive descriptor. Serialized back verbatim as the worker payload,
/// which is why absent fields are skipped on the way out.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ZipData {
    #[serde(
        rename = "zipFileName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub zip_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Generic list envelope used by the dashboard endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default)]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tile {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub position: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Banner {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub position: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Category {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub id: i64,
    #[serde(default)]
    pub read_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of the notification list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationPage {
    #[serde(default)]
    pub data: Vec<Notification>,
    #[serde(default)]
    pub last_page: i64,
    #[serde(default)]
    pub total_unread_announcement: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadReceipt {
    #[serde(default)]
    pub total_unread_notification: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response from the public portal lookup
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicPortalResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub data: Option<PublicPortalData>,
}

/// Guest credentials issued for a public portal
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicPortalData {
    #[serde(default)]
    pub workspace_id: Option<Value>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response from the domain verification route
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyDomainResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub data: Option<BrandDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrandDetails {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub workspace: Option<BrandWorkspace>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrandWorkspace {
    #[serde(default)]
    pub url_slug: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountStatusResponse {
    #[serde(default)]
    pub data: Option<AccountStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountStatus {
    #[serde(default)]
    pub is_suspended: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_response_nested_shape() {
        let response: AuthResponse = serde_json::from_value(json!({
            "data": {
                "access_token": "tok-1",
                "user": { "id": 7, "email": "a@b.co" }
            }
        }))
        .unwrap();

        assert_eq!(response.access_token(), Some("tok-1"));
        assert_eq!(response.user().unwrap().id, 7);
    }

    #[test]
    fn test_auth_response_flat_shape() {
        let response: AuthResponse = serde_json::from_value(json!({
            "access_token": "tok-2",
            "user": { "id": 9 }
        }))
        .unwrap();

        assert_eq!(response.access_token(), Some("tok-2"));
        assert_eq!(response.user().unwrap().id, 9);
    }

    #[test]
    fn test_user_workspace_accepts_number_or_string() {
        let numeric: User = serde_json::from_value(json!({ "id": 1, "workspace_id": 42 })).unwrap();
        let text: User = serde_json::from_value(json!({ "id": 1, "workspace_id": "w1" })).unwrap();

        assert_eq!(numeric.workspace().as_deref(), Some("42"));
        assert_eq!(text.workspace().as_deref(), Some("w1"));
    }

    #[test]
    fn test_zip_data_round_trips_unknown_fields() {
        let data: ZipData = serde_json::from_value(json!({
            "zipFileName": "assets.zip",
            "expires_at": "2026-01-01"
        }))
        .unwrap();

        let payload = serde_json::to_value(&data).unwrap();
        assert_eq!(
            payload,
            json!({ "zipFileName": "assets.zip", "expires_at": "2026-01-01" })
        );
    }

    #[test]
    fn test_list_envelope_decodes_dashboard_items() {
        let tiles: ListResponse<Tile> = serde_json::from_value(json!({
            "data": [{ "id": 3, "title": "Logos", "url": "/logos" }]
        }))
        .unwrap();
        assert_eq!(tiles.data.len(), 1);
        assert_eq!(tiles.data[0].title, "Logos");

        let empty: ListResponse<Category> = serde_json::from_value(json!({})).unwrap();
        assert!(empty.data.is_empty());
    }

    #[test]
    fn test_payload_message() {
        let payload = Payload::Json(json!({ "message": "nope" }));
        assert_eq!(payload.message(), Some("nope"));
        assert_eq!(Payload::Empty.message(), None);
    }

    #[test]
    fn test_config_zip_worker_fallback() {
        let config = PortalConfig::default();
        assert_eq!(config.zip_worker_url(), DEFAULT_ZIP_WORKER_URL);

        let mut config = PortalConfig::default();
        config.zip_download_url = Some("https://worker.example/".to_string());
        assert_eq!(config.zip_worker_url(), "https://worker.example/");
    }
}
