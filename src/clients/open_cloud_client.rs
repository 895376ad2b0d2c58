use async_trait::async_trait;
use base64::Engine;
use log::{debug, error};
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::clients::models::{
    Credentials, DatastoreListing, EntryListing, EntryTarget, EntryVersion, ListDatastoresQuery,
    ListEntriesQuery, ListVersionsQuery, SetEntryOptions, VersionListing, MAX_PAGE_SIZE,
};
use crate::clients::{DatastoreApi, UpstreamError};
use crate::config::settings::UpstreamConfig;
use crate::error::AppError;
use crate::utils::http_client::new_api_client;

const API_KEY_HEADER: &str = "x-api-key";
const CONTENT_MD5_HEADER: &str = "content-md5";

/// HTTP client for the standard-datastores REST API.
#[derive(Debug, Clone)]
pub struct OpenCloudClient {
    client: Client,
    base_url: String,
}

impl OpenCloudClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, AppError> {
        let client = new_api_client(config)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn datastores_url(&self, universe_id: &str) -> String {
        format!(
            "{}/datastores/v1/universes/{}/standard-datastores",
            self.base_url,
            urlencoding::encode(universe_id)
        )
    }

    fn entries_url(&self, universe_id: &str, suffix: &str) -> String {
        format!("{}/datastore/entries{}", self.datastores_url(universe_id), suffix)
    }

    fn authorized(&self, request: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
        request
            .header(API_KEY_HEADER, &credentials.api_token)
            .header(ACCEPT, "application/json")
    }

    fn entry_params(target: &EntryTarget) -> Vec<(&'static str, String)> {
        vec![
            ("datastoreName", target.datastore_name.clone()),
            ("entryKey", target.entry_key.clone()),
            ("scope", target.scope.clone()),
        ]
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, UpstreamError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(format!("Datastore API request timed out: {}", e))
            } else {
                UpstreamError::Transport(format!("Datastore API request failed: {}", e))
            }
        })?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, UpstreamError> {
        let response = self.send(request).await?;
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(format!("Failed to read Datastore API response: {}", e)))?;

        serde_json::from_str(&text).map_err(|e| {
            error!("Unexpected Datastore API response body: {}", text);
            UpstreamError::Decode(format!("Failed to parse Datastore API response: {}", e))
        })
    }
}

/// Condense an upstream failure into a status and a readable message.
async fn read_error(response: Response) -> UpstreamError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    UpstreamError::Status {
        status: status.as_u16(),
        message: error_message(status, &text),
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let message = json["message"]
            .as_str()
            .or_else(|| json["error"].as_str())
            .or_else(|| json["errors"][0]["message"].as_str());
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.canonical_reason().unwrap_or("Unknown error").to_string()
    } else {
        trimmed.to_string()
    }
}

fn page_size(limit: u32) -> String {
    if limit == 0 {
        MAX_PAGE_SIZE.to_string()
    } else {
        limit.min(MAX_PAGE_SIZE).to_string()
    }
}

#[async_trait]
impl DatastoreApi for OpenCloudClient {
    async fn list_datastores(
        &self,
        credentials: &Credentials,
        query: &ListDatastoresQuery,
    ) -> Result<DatastoreListing, UpstreamError> {
        let mut params = vec![("limit", page_size(query.limit))];
        if let Some(cursor) = query.cursor.as_ref().filter(|c| !c.is_empty()) {
            params.push(("cursor", cursor.clone()));
        }

        debug!("Listing datastores for universe {}", credentials.universe_id);
        let request = self
            .client
            .get(self.datastores_url(&credentials.universe_id))
            .query(&params);
        self.send_json(self.authorized(request, credentials)).await
    }

    async fn list_entries(
        &self,
        credentials: &Credentials,
        query: &ListEntriesQuery,
    ) -> Result<EntryListing, UpstreamError> {
        let mut params = vec![
            ("datastoreName", query.datastore_name.clone()),
            ("limit", page_size(query.limit)),
        ];
        if let Some(prefix) = query.prefix.as_ref().filter(|p| !p.is_empty()) {
            params.push(("prefix", prefix.clone()));
        }
        if let Some(cursor) = query.cursor.as_ref().filter(|c| !c.is_empty()) {
            params.push(("cursor", cursor.clone()));
        }

        let request = self
            .client
            .get(self.entries_url(&credentials.universe_id, ""))
            .query(&params);
        self.send_json(self.authorized(request, credentials)).await
    }

    async fn get_entry(&self, credentials: &Credentials, target: &EntryTarget) -> Result<Value, UpstreamError> {
        let request = self
            .client
            .get(self.entries_url(&credentials.universe_id, "/entry"))
            .query(&Self::entry_params(target));
        self.send_json(self.authorized(request, credentials)).await
    }

    async fn set_entry(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        value: &Value,
        options: &SetEntryOptions,
    ) -> Result<EntryVersion, UpstreamError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| UpstreamError::Decode(format!("Failed to serialize entry value: {}", e)))?;
        let checksum = base64::engine::general_purpose::STANDARD.encode(md5::compute(&body).0);

        let mut params = Self::entry_params(target);
        if let Some(match_version) = options.match_version.as_ref().filter(|v| !v.is_empty()) {
            params.push(("matchVersion", match_version.clone()));
        }
        if let Some(exclusive_create) = options.exclusive_create {
            params.push(("exclusiveCreate", exclusive_create.to_string()));
        }

        let request = self
            .client
            .post(self.entries_url(&credentials.universe_id, "/entry"))
            .query(&params)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_MD5_HEADER, checksum)
            .body(body);
        self.send_json(self.authorized(request, credentials)).await
    }

    async fn delete_entry(&self, credentials: &Credentials, target: &EntryTarget) -> Result<(), UpstreamError> {
        let request = self
            .client
            .delete(self.entries_url(&credentials.universe_id, "/entry"))
            .query(&Self::entry_params(target));
        self.send(self.authorized(request, credentials)).await?;
        Ok(())
    }

    async fn increment_entry(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        increment_by: i64,
    ) -> Result<Value, UpstreamError> {
        let mut params = Self::entry_params(target);
        params.push(("incrementBy", increment_by.to_string()));

        // The increment endpoint rejects requests that carry a body.
        let request = self
            .client
            .post(self.entries_url(&credentials.universe_id, "/entry/increment"))
            .query(&params)
            .header(CONTENT_LENGTH, "0")
            .body(Vec::<u8>::new());
        self.send_json(self.authorized(request, credentials)).await
    }

    async fn list_versions(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        query: &ListVersionsQuery,
    ) -> Result<VersionListing, UpstreamError> {
        let mut params = Self::entry_params(target);
        params.push(("limit", page_size(query.limit)));
        params.push(("sortOrder", query.sort_order.as_str().to_string()));
        if let Some(cursor) = query.cursor.as_ref().filter(|c| !c.is_empty()) {
            params.push(("cursor", cursor.clone()));
        }

        let request = self
            .client
            .get(self.entries_url(&credentials.universe_id, "/entry/versions"))
            .query(&params);
        self.send_json(self.authorized(request, credentials)).await
    }

    async fn get_version(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        version_id: &str,
    ) -> Result<Value, UpstreamError> {
        let mut params = Self::entry_params(target);
        params.push(("versionId", version_id.to_string()));

        let request = self
            .client
            .get(self.entries_url(&credentials.universe_id, "/entry/versions/version"))
            .query(&params);
        self.send_json(self.authorized(request, credentials)).await
    }
}
