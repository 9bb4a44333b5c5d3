use std::sync::Arc;

use bytes::Bytes;
use reqwest::multipart::Form;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::client::{ClientError, FetchClient, Result};
use super::models::{
    AccountStatusResponse, AuthResponse, Banner, Category, FetchConfig, FetchResponse,
    ListResponse, NotificationPage, Payload, PublicPortalResponse, ReadReceipt, Tile,
    VerifyDomainResponse, ZipDataResponse,
};

const LOGIN: &str = "login";
const LOGOUT: &str = "logout";
const USER: &str = "user";
const LOGIN_WITH_ID: &str = "login-with-id";
const CHECK_PUBLIC_PORTAL: &str = "check-public-portal";
const VERIFY_DOMAIN: &str = "verify-domain";
const COMMON_DATA: &str = "digital/common-data";
const TILES: &str = "digital/get-tiles";
const BANNERS: &str = "digital/get-banners";
const CATEGORY_LIST: &str = "digital/category-list";
const GENERATE_ZIP_DATA: &str = "digital/generate-zip-data";
const SHARE_ZIP_DATA: &str = "share-zip-data";
const DOWNLOAD_FILE: &str = "digital/download-file";
const NOTIFICATION_LIST: &str = "digital/announcement/notification-list";
const MARK_ALL_READ: &str = "digital/announcement/mark-all-read";
const READ_UNREAD: &str = "digital/announcement/read-unread";
const UPDATE_USER: &str = "digital/instance/update-user";
const CHECK_ACCOUNT_STATUS: &str = "digital/check-account-status";

/// Typed surface over the portal backend routes.
pub struct PortalApi {
    client: Arc<FetchClient>,
}

impl PortalApi {
    pub fn new(client: Arc<FetchClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<FetchClient> {
        &self.client
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        workspace_slug: Option<&str>,
    ) -> Result<AuthResponse> {
        let mut body = json!({ "email": email, "password": password });
        if let Some(slug) = workspace_slug {
            body["workspace_id"] = json!(slug);
        }
        let response = self
            .client
            .request(FetchConfig::post(LOGIN).json(body).skip_auth())
            .await?;
        decode(&response)
    }

    pub async fn login_with_id(&self, token: &str) -> Result<AuthResponse> {
        let response = self
            .client
            .request(
                FetchConfig::post(LOGIN_WITH_ID)
                    .json(json!({ "token": token }))
                    .skip_auth(),
            )
            .await?;
        decode(&response)
    }

    /// Best-effort server-side logout. The token is passed explicitly
    /// because the local session may already be gone.
    pub async fn logout(&self, token: &str) -> Result<()> {
        self.client
            .request(
                FetchConfig::post(LOGOUT).header("Authorization", format!("Bearer {}", token)),
            )
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, token: &str) -> Result<AuthResponse> {
        let response = self
            .client
            .request(FetchConfig::get(USER).header("Authorization", format!("Bearer {}", token)))
            .await?;
        decode(&response)
    }

    pub async fn check_public_portal(&self, url: &str) -> Result<PublicPortalResponse> {
        let response = self
            .client
            .request(
                FetchConfig::post(CHECK_PUBLIC_PORTAL)
                    .json(json!({ "url": url }))
                    .skip_auth(),
            )
            .await?;
        decode(&response)
    }

    /// Resolve brand details for a portal domain. Served from the app
    /// base rather than the API base.
    pub async fn verify_domain(&self, url: &str) -> Result<VerifyDomainResponse> {
        let response = self
            .client
            .request(
                FetchConfig::post(VERIFY_DOMAIN)
                    .json(json!({ "url": url }))
                    .skip_auth()
                    .app_base(),
            )
            .await?;
        decode(&response)
    }

    pub async fn common_data(&self) -> Result<Value> {
        let response = self.client.get(COMMON_DATA).await?;
        Ok(response.data.as_json().cloned().unwrap_or(Value::Null))
    }

    pub async fn tiles(&self) -> Result<Vec<Tile>> {
        let response = self.client.get(TILES).await?;
        let list: ListResponse<Tile> = decode(&response)?;
        Ok(list.data)
    }

    pub async fn banners(&self) -> Result<Vec<Banner>> {
        let response = self.client.get(BANNERS).await?;
        let list: ListResponse<Banner> = decode(&response)?;
        Ok(list.data)
    }

    pub async fn categories(&self) -> Result<Vec<Category>> {
        let response = self.client.get(CATEGORY_LIST).await?;
        let list: ListResponse<Category> = decode(&response)?;
        Ok(list.data)
    }

    pub async fn generate_zip_data(&self, body: Value) -> Result<ZipDataResponse> {
        let response = self.client.post(GENERATE_ZIP_DATA, body).await?;
        decode(&response)
    }

    pub async fn share_zip_data(&self, body: Value) -> Result<ZipDataResponse> {
        let response = self.client.post(SHARE_ZIP_DATA, body).await?;
        decode(&response)
    }

    /// Server-rendered image variant as raw bytes
    pub async fn download_file(&self, body: Value) -> Result<Bytes> {
        let response = self
            .client
            .request(FetchConfig::post(DOWNLOAD_FILE).json(body).binary())
            .await?;
        response
            .data
            .into_bytes()
            .ok_or_else(|| ClientError::InvalidResponse("expected binary payload".to_string()))
    }

    pub async fn notifications(&self, page: u32) -> Result<NotificationPage> {
        let response = self
            .client
            .request(FetchConfig::get(NOTIFICATION_LIST).param("page", page.to_string()))
            .await?;
        decode(&response)
    }

    pub async fn mark_all_notifications_read(&self) -> Result<()> {
        self.client.post(MARK_ALL_READ, json!({})).await?;
        Ok(())
    }

    pub async fn read_notification(&self, notification_id: i64) -> Result<ReadReceipt> {
        let response = self
            .client
            .post(READ_UNREAD, json!({ "notification_id": notification_id }))
            .await?;
        decode(&response)
    }

    /// Profile update as multipart form data
    pub async fn update_user_instance(&self, form: Form) -> Result<FetchResponse> {
        self.client
            .request(FetchConfig::post(UPDATE_USER).multipart(form))
            .await
    }

    pub async fn check_account_status(&self, workspace_id: &str) -> Result<AccountStatusResponse> {
        let response = self
            .client
            .request(FetchConfig::get(CHECK_ACCOUNT_STATUS).param("workspace_id", workspace_id))
            .await?;
        decode(&response)
    }
}

fn decode<T: DeserializeOwned>(response: &FetchResponse) -> Result<T> {
    match &response.data {
        Payload::Json(value) => serde_json::from_value(value.clone())
            .map_err(|e| ClientError::InvalidResponse(format!("JSON decode error: {}", e))),
        Payload::Text(text) => serde_json::from_str(text)
            .map_err(|e| ClientError::InvalidResponse(format!("JSON decode error: {}", e))),
        _ => Err(ClientError::InvalidResponse(
            "expected a JSON payload".to_string(),
        )),
    }
}
