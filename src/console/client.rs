use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::clients::{Credentials, EntryVersion};
use crate::error::ErrorResponse;
use crate::handlers::params::API_KEY_HEADER;
use crate::models::{DatastoreListResponse, EntryListResponse, SuccessResponse, VersionListResponse};

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Request failed: {0}")]
    Network(String),
    #[error("Failed to parse response: {0}")]
    Decode(String),
    #[error("Not connected to a universe")]
    NotConnected,
    #[error("No datastore selected")]
    NoDatastoreSelected,
    #[error("No entry selected")]
    NoEntrySelected,
    #[error("Version {0} is not in the loaded history")]
    UnknownVersion(String),
    #[error("Saving a historical version overwrites the latest value and must be confirmed")]
    ConfirmationRequired,
    #[error("Session storage error: {0}")]
    Storage(String),
}

impl ConsoleError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ConsoleError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Client for the local `/api` routes, as used by the admin UI.
#[derive(Clone)]
pub struct ConsoleClient {
    http_client: Client,
    base_url: String,
}

impl ConsoleClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http_client: Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn datastore_path(&self, datastore: &str, suffix: &str) -> String {
        format!(
            "{}/api/datastores/{}{}",
            self.base_url,
            urlencoding::encode(datastore),
            suffix
        )
    }

    fn request(&self, method: Method, url: String, credentials: &Credentials) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header(API_KEY_HEADER, &credentials.api_token)
            .query(&[("universeId", credentials.universe_id.as_str())])
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ConsoleError> {
        let response = request
            .send()
            .await
            .map_err(|e| ConsoleError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| {
                    if body.is_empty() {
                        status.canonical_reason().unwrap_or("Unknown error").to_string()
                    } else {
                        body
                    }
                });
            warn!(status = status.as_u16(), %message, "console request failed");
            return Err(ConsoleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ConsoleError::Decode(e.to_string()))
    }

    pub async fn list_datastores(&self, credentials: &Credentials) -> Result<DatastoreListResponse, ConsoleError> {
        debug!(universe_id = %credentials.universe_id, "listing datastores");
        let url = format!("{}/api/datastores", self.base_url);
        self.send(self.request(Method::GET, url, credentials)).await
    }

    pub async fn create_datastore(
        &self,
        credentials: &Credentials,
        datastore: &str,
    ) -> Result<SuccessResponse, ConsoleError> {
        let url = format!("{}/api/datastores/create", self.base_url);
        let request = self
            .request(Method::POST, url, credentials)
            .json(&json!({ "datastoreName": datastore }));
        self.send(request).await
    }

    pub async fn list_entries(
        &self,
        credentials: &Credentials,
        datastore: &str,
        cursor: Option<&str>,
        search: Option<&str>,
    ) -> Result<EntryListResponse, ConsoleError> {
        let mut request = self.request(Method::GET, self.datastore_path(datastore, "/entries"), credentials);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        if let Some(search) = search {
            request = request.query(&[("search", search)]);
        }
        self.send(request).await
    }

    pub async fn get_entry(&self, credentials: &Credentials, datastore: &str, key: &str) -> Result<Value, ConsoleError> {
        let request = self
            .request(Method::GET, self.datastore_path(datastore, "/entry"), credentials)
            .query(&[("entryKey", key)]);
        self.send(request).await
    }

    pub async fn set_entry(
        &self,
        credentials: &Credentials,
        datastore: &str,
        key: &str,
        value: &Value,
        exclusive_create: bool,
    ) -> Result<EntryVersion, ConsoleError> {
        let mut body = json!({ "entryKey": key, "value": value });
        if exclusive_create {
            body["exclusiveCreate"] = Value::Bool(true);
        }
        let request = self
            .request(Method::POST, self.datastore_path(datastore, "/entry"), credentials)
            .json(&body);
        self.send(request).await
    }

    pub async fn delete_entry(
        &self,
        credentials: &Credentials,
        datastore: &str,
        key: &str,
    ) -> Result<SuccessResponse, ConsoleError> {
        let request = self
            .request(Method::DELETE, self.datastore_path(datastore, "/entry"), credentials)
            .query(&[("entryKey", key)]);
        self.send(request).await
    }

    pub async fn increment_entry(
        &self,
        credentials: &Credentials,
        datastore: &str,
        key: &str,
        increment_by: i64,
    ) -> Result<Value, ConsoleError> {
        let request = self
            .request(Method::POST, self.datastore_path(datastore, "/entry/increment"), credentials)
            .json(&json!({ "entryKey": key, "incrementBy": increment_by }));
        self.send(request).await
    }

    pub async fn list_versions(
        &self,
        credentials: &Credentials,
        datastore: &str,
        key: &str,
    ) -> Result<VersionListResponse, ConsoleError> {
        let request = self
            .request(Method::GET, self.datastore_path(datastore, "/entry/versions"), credentials)
            .query(&[("entryKey", key)]);
        self.send(request).await
    }

    pub async fn get_version(
        &self,
        credentials: &Credentials,
        datastore: &str,
        key: &str,
        version_id: &str,
    ) -> Result<Value, ConsoleError> {
        let request = self
            .request(Method::GET, self.datastore_path(datastore, "/entry/versions/version"), credentials)
            .query(&[("entryKey", key), ("versionId", version_id)]);
        self.send(request).await
    }
}
