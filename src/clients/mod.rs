pub mod models;
pub mod open_cloud_client;

use async_trait::async_trait;
use serde_json::Value;

pub use models::{
    Credentials, DatastoreListing, EntryKeyRef, EntryListing, EntryTarget, EntryVersion,
    ListDatastoresQuery, ListEntriesQuery, ListVersionsQuery, SetEntryOptions, SortOrder,
    VersionListing,
};
pub use open_cloud_client::OpenCloudClient;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Datastore API error ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Operations of the standard-datastores REST API used by the route layer.
#[async_trait]
pub trait DatastoreApi: Send + Sync {
    async fn list_datastores(
        &self,
        credentials: &Credentials,
        query: &ListDatastoresQuery,
    ) -> Result<DatastoreListing, UpstreamError>;

    async fn list_entries(
        &self,
        credentials: &Credentials,
        query: &ListEntriesQuery,
    ) -> Result<EntryListing, UpstreamError>;

    async fn get_entry(&self, credentials: &Credentials, target: &EntryTarget) -> Result<Value, UpstreamError>;

    /// `exclusive_create` fails upstream when the key already exists.
    async fn set_entry(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        value: &Value,
        options: &SetEntryOptions,
    ) -> Result<EntryVersion, UpstreamError>;

    async fn delete_entry(&self, credentials: &Credentials, target: &EntryTarget) -> Result<(), UpstreamError>;

    async fn increment_entry(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        increment_by: i64,
    ) -> Result<Value, UpstreamError>;

    async fn list_versions(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        query: &ListVersionsQuery,
    ) -> Result<VersionListing, UpstreamError>;

    async fn get_version(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        version_id: &str,
    ) -> Result<Value, UpstreamError>;
}
