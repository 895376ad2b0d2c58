//! In-memory stand-in for the datastore API used by the route tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use actix_web::web;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

use crate::clients::{
    Credentials, DatastoreApi, DatastoreListing, EntryKeyRef, EntryListing, EntryTarget, EntryVersion,
    ListDatastoresQuery, ListEntriesQuery, ListVersionsQuery, SetEntryOptions, SortOrder, UpstreamError,
    VersionListing,
};
use crate::config::settings::RateLimitConfig;
use crate::middleware::{RateLimitMiddleware, RateLimitStore};
use crate::routes::configure_routes;

#[derive(Clone)]
struct StoredVersion {
    id: String,
    value: Value,
    created_time: DateTime<Utc>,
}

type EntryId = (String, String, String);

#[derive(Default)]
pub struct InMemoryDatastoreApi {
    calls: AtomicUsize,
    entries: Mutex<BTreeMap<EntryId, Vec<StoredVersion>>>,
    datastore_listing: Mutex<Option<Value>>,
    version_listing: Mutex<Option<Value>>,
    failure: Mutex<Option<(u16, String)>>,
    last_entries_query: Mutex<Option<ListEntriesQuery>>,
    last_credentials: Mutex<Option<Credentials>>,
}

fn id_of(target: &EntryTarget) -> EntryId {
    (target.datastore_name.clone(), target.scope.clone(), target.entry_key.clone())
}

fn not_found() -> UpstreamError {
    UpstreamError::Status {
        status: 404,
        message: "NOT_FOUND".to_string(),
    }
}

fn metadata(version: &StoredVersion) -> EntryVersion {
    EntryVersion {
        version: version.id.clone(),
        deleted: false,
        content_length: version.value.to_string().len() as u64,
        created_time: Some(version.created_time),
        object_created_time: None,
    }
}

impl InMemoryDatastoreApi {
    /// Raw upstream body returned by list-datastores instead of the stored names.
    pub fn set_datastore_listing(&self, body: Value) {
        *self.datastore_listing.lock().unwrap() = Some(body);
    }

    /// Raw upstream body returned by list-versions instead of the stored history.
    pub fn set_version_listing(&self, body: Value) {
        *self.version_listing.lock().unwrap() = Some(body);
    }

    pub fn fail_next(&self, status: u16, message: &str) {
        *self.failure.lock().unwrap() = Some((status, message.to_string()));
    }

    pub fn insert(&self, datastore: &str, scope: &str, key: &str, value: Value) {
        let id = (datastore.to_string(), scope.to_string(), key.to_string());
        let mut entries = self.entries.lock().unwrap();
        let history = entries.entry(id).or_default();
        Self::push(history, value);
    }

    pub fn stored(&self, datastore: &str, scope: &str, key: &str) -> Option<Value> {
        let id = (datastore.to_string(), scope.to_string(), key.to_string());
        self.entries
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|history| history.last())
            .map(|v| v.value.clone())
    }

    pub fn keys_in(&self, datastore: &str) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .keys()
            .filter(|(ds, _, _)| ds == datastore)
            .map(|(_, _, key)| key.clone())
            .collect()
    }

    pub fn upstream_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_entries_query(&self) -> Option<ListEntriesQuery> {
        self.last_entries_query.lock().unwrap().clone()
    }

    pub fn last_credentials(&self) -> Option<Credentials> {
        self.last_credentials.lock().unwrap().clone()
    }

    fn push(history: &mut Vec<StoredVersion>, value: Value) -> StoredVersion {
        let n = history.len() + 1;
        let version = StoredVersion {
            id: format!("v{}", n),
            value,
            created_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(n as i64),
        };
        history.push(version.clone());
        version
    }

    fn record(&self, credentials: &Credentials) -> Result<(), UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_credentials.lock().unwrap() = Some(credentials.clone());
        match self.failure.lock().unwrap().take() {
            Some((status, message)) => Err(UpstreamError::Status { status, message }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DatastoreApi for InMemoryDatastoreApi {
    async fn list_datastores(
        &self,
        credentials: &Credentials,
        _query: &ListDatastoresQuery,
    ) -> Result<DatastoreListing, UpstreamError> {
        self.record(credentials)?;
        let body = match self.datastore_listing.lock().unwrap().clone() {
            Some(body) => body,
            None => {
                let mut names: Vec<String> =
                    self.entries.lock().unwrap().keys().map(|(ds, _, _)| ds.clone()).collect();
                names.dedup();
                json!({ "datastores": names.into_iter().map(|name| json!({ "name": name })).collect::<Vec<_>>() })
            }
        };
        serde_json::from_value(body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    async fn list_entries(
        &self,
        credentials: &Credentials,
        query: &ListEntriesQuery,
    ) -> Result<EntryListing, UpstreamError> {
        self.record(credentials)?;
        *self.last_entries_query.lock().unwrap() = Some(query.clone());

        let prefix = query.prefix.clone().unwrap_or_default();
        let keys = self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|(ds, _, key)| ds == &query.datastore_name && key.starts_with(&prefix))
            .map(|(_, scope, key)| EntryKeyRef {
                scope: Some(scope.clone()),
                key: key.clone(),
            })
            .collect();

        Ok(EntryListing {
            keys,
            next_page_cursor: None,
        })
    }

    async fn get_entry(&self, credentials: &Credentials, target: &EntryTarget) -> Result<Value, UpstreamError> {
        self.record(credentials)?;
        self.stored(&target.datastore_name, &target.scope, &target.entry_key)
            .ok_or_else(not_found)
    }

    async fn set_entry(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        value: &Value,
        options: &SetEntryOptions,
    ) -> Result<EntryVersion, UpstreamError> {
        self.record(credentials)?;
        let mut entries = self.entries.lock().unwrap();
        let history = entries.entry(id_of(target)).or_default();

        let precondition_failed = (options.exclusive_create == Some(true) && !history.is_empty())
            || options
                .match_version
                .as_ref()
                .is_some_and(|expected| history.last().map(|v| &v.id) != Some(expected));
        if precondition_failed {
            return Err(UpstreamError::Status {
                status: 412,
                message: "Precondition failed".to_string(),
            });
        }

        Ok(metadata(&Self::push(history, value.clone())))
    }

    async fn delete_entry(&self, credentials: &Credentials, target: &EntryTarget) -> Result<(), UpstreamError> {
        self.record(credentials)?;
        self.entries
            .lock()
            .unwrap()
            .remove(&id_of(target))
            .map(|_| ())
            .ok_or_else(not_found)
    }

    async fn increment_entry(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        increment_by: i64,
    ) -> Result<Value, UpstreamError> {
        self.record(credentials)?;
        let mut entries = self.entries.lock().unwrap();
        let history = entries.entry(id_of(target)).or_default();
        let current = history.last().and_then(|v| v.value.as_i64()).unwrap_or(0);
        let value = json!(current + increment_by);
        Self::push(history, value.clone());
        Ok(value)
    }

    async fn list_versions(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        query: &ListVersionsQuery,
    ) -> Result<VersionListing, UpstreamError> {
        self.record(credentials)?;
        if let Some(body) = self.version_listing.lock().unwrap().clone() {
            return serde_json::from_value(body).map_err(|e| UpstreamError::Decode(e.to_string()));
        }

        let entries = self.entries.lock().unwrap();
        let history = entries.get(&id_of(target)).ok_or_else(not_found)?;
        let mut versions: Vec<EntryVersion> = history.iter().map(metadata).collect();
        if query.sort_order == SortOrder::Descending {
            versions.reverse();
        }

        Ok(VersionListing {
            versions,
            next_page_cursor: None,
        })
    }

    async fn get_version(
        &self,
        credentials: &Credentials,
        target: &EntryTarget,
        version_id: &str,
    ) -> Result<Value, UpstreamError> {
        self.record(credentials)?;
        self.entries
            .lock()
            .unwrap()
            .get(&id_of(target))
            .and_then(|history| history.iter().find(|v| v.id == version_id))
            .map(|v| v.value.clone())
            .ok_or_else(not_found)
    }
}

/// App configuration with the `/api` routes backed by `api`, limited to
/// `max_requests` per minute on the listing resources.
pub fn configure(api: Arc<InMemoryDatastoreApi>, max_requests: u64) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        let config = RateLimitConfig {
            max_requests,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimitMiddleware::new(Arc::new(RateLimitStore::new(config.max_tracked_keys)), &config);
        let api: Arc<dyn DatastoreApi> = api;

        cfg.app_data(web::Data::from(api)).service(
            web::scope("/api").configure(|scope| configure_routes(scope, &limiter)),
        );
    }
}
