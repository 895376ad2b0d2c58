//! Wire types of the datastore REST API.
//!
//! The upstream service has shipped several response layouts over time
//! (bare arrays vs wrapped objects, `data` vs `versions`), so the listing
//! types accept each of them and normalise to one shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCOPE: &str = "global";
pub const MAX_PAGE_SIZE: u32 = 100;

/// Credentials presented on every upstream call. Never stored server-side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub universe_id: String,
    pub api_token: String,
}

impl Credentials {
    pub fn new(universe_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            universe_id: universe_id.into(),
            api_token: api_token.into(),
        }
    }
}

/// One entry addressed by datastore, key and scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryTarget {
    pub datastore_name: String,
    pub entry_key: String,
    pub scope: String,
}

impl EntryTarget {
    pub fn new(datastore_name: impl Into<String>, entry_key: impl Into<String>, scope: Option<String>) -> Self {
        Self {
            datastore_name: datastore_name.into(),
            entry_key: entry_key.into(),
            scope: scope
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ListDatastoresQuery {
    pub cursor: Option<String>,
    pub limit: u32,
}

#[derive(Clone, Debug, Default)]
pub struct ListEntriesQuery {
    pub datastore_name: String,
    pub prefix: Option<String>,
    pub cursor: Option<String>,
    pub limit: u32,
}

#[derive(Clone, Debug, Default)]
pub struct SetEntryOptions {
    pub match_version: Option<String>,
    pub exclusive_create: Option<bool>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "Ascending",
            SortOrder::Descending => "Descending",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ListVersionsQuery {
    pub cursor: Option<String>,
    pub limit: u32,
    pub sort_order: SortOrder,
}

/// A datastore as reported upstream: either a plain name or a descriptor.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawDatastore {
    Name(String),
    Described {
        name: String,
        #[serde(rename = "createdTime", default)]
        created_time: Option<DateTime<Utc>>,
    },
}

impl RawDatastore {
    pub fn name(&self) -> &str {
        match self {
            RawDatastore::Name(name) => name,
            RawDatastore::Described { name, .. } => name,
        }
    }

    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        match self {
            RawDatastore::Name(_) => None,
            RawDatastore::Described { created_time, .. } => *created_time,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum DatastoreListing {
    Paged {
        #[serde(default)]
        datastores: Vec<RawDatastore>,
        #[serde(rename = "nextPageCursor", default)]
        next_page_cursor: Option<String>,
    },
    Bare(Vec<RawDatastore>),
}

impl DatastoreListing {
    pub fn into_parts(self) -> (Vec<RawDatastore>, Option<String>) {
        match self {
            DatastoreListing::Paged { datastores, next_page_cursor } => (datastores, next_page_cursor),
            DatastoreListing::Bare(datastores) => (datastores, None),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntryKey {
    Key(String),
    Scoped {
        #[serde(default)]
        scope: Option<String>,
        key: String,
    },
}

/// Entry key as listed upstream, keeping its field names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawEntryKey")]
pub struct EntryKeyRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub key: String,
}

impl From<RawEntryKey> for EntryKeyRef {
    fn from(raw: RawEntryKey) -> Self {
        match raw {
            RawEntryKey::Key(key) => EntryKeyRef { scope: None, key },
            RawEntryKey::Scoped { scope, key } => EntryKeyRef { scope, key },
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryListing {
    #[serde(default)]
    pub keys: Vec<EntryKeyRef>,
    #[serde(default)]
    pub next_page_cursor: Option<String>,
}

/// Version metadata, also returned by set-entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryVersion {
    pub version: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub content_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_created_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionListing {
    #[serde(default, alias = "data")]
    pub versions: Vec<EntryVersion>,
    #[serde(default)]
    pub next_page_cursor: Option<String>,
}
