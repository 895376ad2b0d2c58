//! Console state: credentials, selection and entry viewing.
//!
//! Entry viewing moves `Unselected -> Latest <-> Version`; a save while a
//! historical version is shown overwrites the latest value, so it needs
//! explicit confirmation and lands back on `Latest`.

use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::clients::{Credentials, EntryVersion};
use crate::console::client::{ConsoleClient, ConsoleError};
use crate::console::session::SessionStore;
use crate::models::{DatastoreInfo, EntryListResponse, VersionInfo};

#[derive(Debug, Clone, PartialEq)]
pub enum EntryView {
    Unselected,
    Latest { key: String, value: Value },
    Version { key: String, version: String, value: Value },
    /// The entry (or the requested version of it) no longer exists upstream.
    Missing { key: String, version: Option<String> },
}

impl EntryView {
    pub fn key(&self) -> Option<&str> {
        match self {
            EntryView::Unselected => None,
            EntryView::Latest { key, .. } | EntryView::Version { key, .. } | EntryView::Missing { key, .. } => {
                Some(key)
            }
        }
    }

    /// What the editor shows: the value, or a placeholder describing the gap.
    pub fn document(&self) -> Option<Value> {
        match self {
            EntryView::Unselected => None,
            EntryView::Latest { value, .. } | EntryView::Version { value, .. } => Some(value.clone()),
            EntryView::Missing { key, version } => Some(json!({
                "status": "missing",
                "entryKey": key,
                "version": version,
                "message": match version {
                    Some(v) => format!("Version {} of entry '{}' was not found", v, key),
                    None => format!("Entry '{}' has been deleted or does not exist", key),
                },
            })),
        }
    }
}

pub struct DatastoreConsole {
    client: ConsoleClient,
    session: SessionStore,
    credentials: Option<Credentials>,
    datastores: Vec<DatastoreInfo>,
    selected_datastore: Option<String>,
    view: EntryView,
    versions: Vec<VersionInfo>,
    known_deleted: HashSet<(String, String)>,
}

impl DatastoreConsole {
    pub fn new(client: ConsoleClient, session: SessionStore) -> Self {
        Self {
            client,
            session,
            credentials: None,
            datastores: Vec::new(),
            selected_datastore: None,
            view: EntryView::Unselected,
            versions: Vec::new(),
            known_deleted: HashSet::new(),
        }
    }

    pub fn client(&self) -> &ConsoleClient {
        &self.client
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Credentials remembered from an earlier run, if any.
    pub fn saved_credentials(&self) -> Option<Credentials> {
        self.session.load().credentials()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn datastores(&self) -> &[DatastoreInfo] {
        &self.datastores
    }

    pub fn selected_datastore(&self) -> Option<&str> {
        self.selected_datastore.as_deref()
    }

    pub fn view(&self) -> &EntryView {
        &self.view
    }

    pub fn versions(&self) -> &[VersionInfo] {
        &self.versions
    }

    pub fn is_known_deleted(&self, key: &str) -> bool {
        self.selected_datastore
            .as_ref()
            .is_some_and(|ds| self.known_deleted.contains(&(ds.clone(), key.to_string())))
    }

    fn require_credentials(&self) -> Result<Credentials, ConsoleError> {
        self.credentials.clone().ok_or(ConsoleError::NotConnected)
    }

    fn require_datastore(&self) -> Result<(Credentials, String), ConsoleError> {
        let credentials = self.require_credentials()?;
        let datastore = self
            .selected_datastore
            .clone()
            .ok_or(ConsoleError::NoDatastoreSelected)?;
        Ok((credentials, datastore))
    }

    fn selected_key(&self) -> Result<String, ConsoleError> {
        self.view.key().map(str::to_string).ok_or(ConsoleError::NoEntrySelected)
    }

    fn mark_deleted(&mut self, datastore: &str, key: &str, deleted: bool) {
        let id = (datastore.to_string(), key.to_string());
        if deleted {
            self.known_deleted.insert(id);
        } else {
            self.known_deleted.remove(&id);
        }
    }

    fn clear_selection(&mut self) {
        self.view = EntryView::Unselected;
        self.versions.clear();
    }

    /// Verifies the credentials by listing datastores, then remembers them.
    pub async fn connect(&mut self, credentials: Credentials) -> Result<&[DatastoreInfo], ConsoleError> {
        let listing = self.client.list_datastores(&credentials).await?;
        self.session.store_credentials(&credentials)?;

        info!(universe_id = %credentials.universe_id, count = listing.datastores.len(), "connected");
        self.credentials = Some(credentials);
        self.datastores = listing.datastores;
        self.selected_datastore = None;
        self.known_deleted.clear();
        self.clear_selection();
        Ok(&self.datastores)
    }

    pub fn disconnect(&mut self) -> Result<(), ConsoleError> {
        self.credentials = None;
        self.datastores.clear();
        self.selected_datastore = None;
        self.known_deleted.clear();
        self.clear_selection();
        self.session.clear_credentials()?;
        info!("disconnected");
        Ok(())
    }

    pub async fn refresh_datastores(&mut self) -> Result<&[DatastoreInfo], ConsoleError> {
        let credentials = self.require_credentials()?;
        let listing = self.client.list_datastores(&credentials).await?;
        self.datastores = listing.datastores;
        Ok(&self.datastores)
    }

    pub async fn create_datastore(&mut self, name: &str) -> Result<&[DatastoreInfo], ConsoleError> {
        let credentials = self.require_credentials()?;
        self.client.create_datastore(&credentials, name).await?;
        info!(datastore = name, "datastore created");
        self.refresh_datastores().await
    }

    pub fn select_datastore(&mut self, name: &str) {
        debug!(datastore = name, "datastore selected");
        self.selected_datastore = Some(name.to_string());
        self.clear_selection();
    }

    pub async fn list_entries(
        &self,
        cursor: Option<&str>,
        search: Option<&str>,
    ) -> Result<EntryListResponse, ConsoleError> {
        let (credentials, datastore) = self.require_datastore()?;
        self.client.list_entries(&credentials, &datastore, cursor, search).await
    }

    /// Loads the latest value; keys known to be deleted are not refetched.
    pub async fn open_entry(&mut self, key: &str) -> Result<&EntryView, ConsoleError> {
        let (credentials, datastore) = self.require_datastore()?;
        self.versions.clear();

        if self.is_known_deleted(key) {
            debug!(key, "entry known to be deleted, skipping fetch");
            self.view = EntryView::Missing { key: key.to_string(), version: None };
            return Ok(&self.view);
        }

        match self.client.get_entry(&credentials, &datastore, key).await {
            Ok(value) => {
                self.view = EntryView::Latest { key: key.to_string(), value };
            }
            Err(e) if e.is_not_found() => {
                warn!(key, "entry not found, remembering as deleted");
                self.mark_deleted(&datastore, key, true);
                self.view = EntryView::Missing { key: key.to_string(), version: None };
            }
            Err(e) => return Err(e),
        }
        Ok(&self.view)
    }

    pub async fn view_latest(&mut self) -> Result<&EntryView, ConsoleError> {
        let key = self.selected_key()?;
        let versions = std::mem::take(&mut self.versions);
        self.open_entry(&key).await?;
        self.versions = versions;
        Ok(&self.view)
    }

    pub async fn load_versions(&mut self) -> Result<&[VersionInfo], ConsoleError> {
        let key = self.selected_key()?;
        let (credentials, datastore) = self.require_datastore()?;
        let listing = self.client.list_versions(&credentials, &datastore, &key).await?;
        self.versions = listing.versions;
        Ok(&self.versions)
    }

    /// Shows a version from the loaded history.
    pub async fn select_version(&mut self, version_id: &str) -> Result<&EntryView, ConsoleError> {
        let key = self.selected_key()?;
        let is_latest = self
            .versions
            .iter()
            .find(|v| v.version.version == version_id)
            .map(VersionInfo::is_latest)
            .ok_or_else(|| ConsoleError::UnknownVersion(version_id.to_string()))?;
        let (credentials, datastore) = self.require_datastore()?;

        self.view = match self.client.get_version(&credentials, &datastore, &key, version_id).await {
            Ok(value) if is_latest => EntryView::Latest { key, value },
            Ok(value) => EntryView::Version {
                key,
                version: version_id.to_string(),
                value,
            },
            Err(e) if e.is_not_found() => EntryView::Missing {
                key,
                version: Some(version_id.to_string()),
            },
            Err(e) => return Err(e),
        };
        Ok(&self.view)
    }

    /// Writes `value` as the new latest version of the selected entry.
    pub async fn save(&mut self, value: Value, confirmed: bool) -> Result<EntryVersion, ConsoleError> {
        let key = self.selected_key()?;
        if matches!(self.view, EntryView::Version { .. }) && !confirmed {
            return Err(ConsoleError::ConfirmationRequired);
        }
        let (credentials, datastore) = self.require_datastore()?;

        let version = self.client.set_entry(&credentials, &datastore, &key, &value, false).await?;
        info!(key = %key, version = %version.version, "entry saved");

        self.mark_deleted(&datastore, &key, false);
        self.versions.clear();
        self.view = EntryView::Latest { key, value };
        Ok(version)
    }

    /// Creates a new entry; fails upstream when the key already exists.
    pub async fn create_entry(&mut self, key: &str, value: Value) -> Result<EntryVersion, ConsoleError> {
        let (credentials, datastore) = self.require_datastore()?;

        let version = self.client.set_entry(&credentials, &datastore, key, &value, true).await?;
        self.mark_deleted(&datastore, key, false);
        self.versions.clear();
        self.view = EntryView::Latest { key: key.to_string(), value };
        Ok(version)
    }

    pub async fn delete_entry(&mut self, key: &str) -> Result<(), ConsoleError> {
        let (credentials, datastore) = self.require_datastore()?;

        self.client.delete_entry(&credentials, &datastore, key).await?;
        info!(key, "entry deleted");
        self.mark_deleted(&datastore, key, true);
        if self.view.key() == Some(key) {
            self.clear_selection();
        }
        Ok(())
    }

    pub async fn increment_entry(&mut self, key: &str, increment_by: i64) -> Result<Value, ConsoleError> {
        let (credentials, datastore) = self.require_datastore()?;

        let value = self.client.increment_entry(&credentials, &datastore, key, increment_by).await?;
        self.mark_deleted(&datastore, key, false);
        if matches!(&self.view, EntryView::Latest { key: selected, .. } if selected == key) {
            self.view = EntryView::Latest { key: key.to_string(), value: value.clone() };
        }
        Ok(value)
    }
}
