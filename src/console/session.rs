use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::clients::Credentials;
use crate::console::client::ConsoleError;

const SESSION_DIR: &str = "datastore-console";
const SESSION_FILE: &str = "session.json";

/// What the console remembers between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default)]
    pub has_seen_onboarding: bool,
    #[serde(default)]
    pub has_seen_welcome: bool,
}

impl SessionData {
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.universe_id, &self.api_token) {
            (Some(universe_id), Some(api_token)) => Some(Credentials::new(universe_id, api_token)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/datastore-console/session.json`
    pub fn default_location() -> Result<Self, ConsoleError> {
        let dir = dirs::config_dir()
            .ok_or_else(|| ConsoleError::Storage("No configuration directory on this platform".to_string()))?;
        Ok(Self::new(dir.join(SESSION_DIR).join(SESSION_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable file is an empty session.
    pub fn load(&self) -> SessionData {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return SessionData::default(),
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), "discarding corrupt session file: {}", e);
            SessionData::default()
        })
    }

    pub fn save(&self, data: &SessionData) -> Result<(), ConsoleError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| ConsoleError::Storage("Session path has no parent directory".to_string()))?;
        fs::create_dir_all(dir).map_err(|e| ConsoleError::Storage(e.to_string()))?;

        let json = serde_json::to_vec_pretty(data).map_err(|e| ConsoleError::Storage(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ConsoleError::Storage(e.to_string()))?;
        tmp.write_all(&json).map_err(|e| ConsoleError::Storage(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| ConsoleError::Storage(e.error.to_string()))?;

        debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    fn update(&self, change: impl FnOnce(&mut SessionData)) -> Result<(), ConsoleError> {
        let mut data = self.load();
        change(&mut data);
        self.save(&data)
    }

    pub fn store_credentials(&self, credentials: &Credentials) -> Result<(), ConsoleError> {
        self.update(|data| {
            data.universe_id = Some(credentials.universe_id.clone());
            data.api_token = Some(credentials.api_token.clone());
        })
    }

    /// Forget the credentials; onboarding flags survive a disconnect.
    pub fn clear_credentials(&self) -> Result<(), ConsoleError> {
        self.update(|data| {
            data.universe_id = None;
            data.api_token = None;
        })
    }

    pub fn mark_onboarding_seen(&self) -> Result<(), ConsoleError> {
        self.update(|data| data.has_seen_onboarding = true)
    }

    pub fn mark_welcome_seen(&self) -> Result<(), ConsoleError> {
        self.update(|data| data.has_seen_welcome = true)
    }
}
