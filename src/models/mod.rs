//! Response shapes of the local `/api` routes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clients::models::{EntryKeyRef, EntryVersion};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreInfo {
    pub name: String,
    pub created_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreListResponse {
    pub datastores: Vec<DatastoreInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryListResponse {
    pub keys: Vec<EntryKeyRef>,
    #[serde(default)]
    pub next_page_cursor: String,
}

/// A version as listed by the local API, with the derived latest flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(flatten)]
    pub version: EntryVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_latest: Option<bool>,
}

impl VersionInfo {
    pub fn is_latest(&self) -> bool {
        self.is_latest.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionListResponse {
    pub versions: Vec<VersionInfo>,
    #[serde(default)]
    pub next_page_cursor: String,
}
