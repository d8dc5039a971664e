//! Persisted user settings: the API key and the selected model.
//!
//! A missing key reads as an empty string and a missing model as
//! [`DEFAULT_MODEL`], so callers never deal with "unset" separately.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

pub const DEFAULT_MODEL: &str = "openai/gpt-4o";

const KEYRING_SERVICE: &str = "peekboard";
const KEYRING_USER: &str = "openrouter-api-key";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(String),
}

pub trait SettingsStore: Send + Sync {
    fn api_key(&self) -> Result<String, SettingsError>;
    fn set_api_key(&self, api_key: &str) -> Result<(), SettingsError>;
    fn selected_model(&self) -> Result<String, SettingsError>;
    fn set_selected_model(&self, model: &str) -> Result<(), SettingsError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected_model: Option<String>,
}

impl StoredSettings {
    fn api_key(&self) -> String {
        self.api_key.clone().unwrap_or_default()
    }

    fn selected_model(&self) -> String {
        self.selected_model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Settings kept only in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    data: RwLock<StoredSettings>,
}

impl MemorySettingsStore {
    pub fn with_api_key(api_key: &str) -> Self {
        Self {
            data: RwLock::new(StoredSettings {
                api_key: non_empty(api_key),
                selected_model: None,
            }),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn api_key(&self) -> Result<String, SettingsError> {
        Ok(self.data.read().unwrap_or_else(PoisonError::into_inner).api_key())
    }

    fn set_api_key(&self, api_key: &str) -> Result<(), SettingsError> {
        self.data.write().unwrap_or_else(PoisonError::into_inner).api_key = non_empty(api_key);
        Ok(())
    }

    fn selected_model(&self) -> Result<String, SettingsError> {
        Ok(self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .selected_model())
    }

    fn set_selected_model(&self, model: &str) -> Result<(), SettingsError> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .selected_model = non_empty(model);
        Ok(())
    }
}

/// JSON settings file, rewritten on every change.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    data: RwLock<StoredSettings>,
}

impl FileSettingsStore {
    /// Platform config location:
    ///   macOS:   ~/Library/Application Support/peekboard/settings.json
    ///   Linux:   ~/.config/peekboard/settings.json
    ///   Windows: %APPDATA%/peekboard/settings.json
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("peekboard")
            .join("settings.json")
    }

    pub fn open_default() -> Result<Self, SettingsError> {
        Self::open(Self::default_path())
    }

    /// Loads `path` if it exists. A corrupt file is an error, not a reset.
    pub fn open(path: PathBuf) -> Result<Self, SettingsError> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|source| SettingsError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&contents)?
        } else {
            StoredSettings::default()
        };

        log::info!("[SETTINGS] Using {}", path.display());
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, apply: impl FnOnce(&mut StoredSettings)) -> Result<(), SettingsError> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        apply(&mut next);
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    fn persist(&self, data: &StoredSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl SettingsStore for FileSettingsStore {
    fn api_key(&self) -> Result<String, SettingsError> {
        Ok(self.data.read().unwrap_or_else(PoisonError::into_inner).api_key())
    }

    fn set_api_key(&self, api_key: &str) -> Result<(), SettingsError> {
        let api_key = non_empty(api_key);
        self.update(|s| s.api_key = api_key)
    }

    fn selected_model(&self) -> Result<String, SettingsError> {
        Ok(self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .selected_model())
    }

    fn set_selected_model(&self, model: &str) -> Result<(), SettingsError> {
        let model = non_empty(model);
        self.update(|s| s.selected_model = model)
    }
}

/// API key in the OS keychain, everything else in a settings file.
pub struct KeyringSettingsStore {
    entry: keyring::Entry,
    file: FileSettingsStore,
}

impl KeyringSettingsStore {
    pub fn new(file: FileSettingsStore) -> Result<Self, SettingsError> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
            .map_err(|e| SettingsError::Keyring(e.to_string()))?;
        Ok(Self { entry, file })
    }
}

impl SettingsStore for KeyringSettingsStore {
    fn api_key(&self) -> Result<String, SettingsError> {
        match self.entry.get_password() {
            Ok(key) => Ok(key),
            Err(keyring::Error::NoEntry) => Ok(String::new()),
            Err(e) => Err(SettingsError::Keyring(e.to_string())),
        }
    }

    fn set_api_key(&self, api_key: &str) -> Result<(), SettingsError> {
        match non_empty(api_key) {
            Some(key) => self
                .entry
                .set_password(&key)
                .map_err(|e| SettingsError::Keyring(e.to_string())),
            None => match self.entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(SettingsError::Keyring(e.to_string())),
            },
        }
    }

    fn selected_model(&self) -> Result<String, SettingsError> {
        self.file.selected_model()
    }

    fn set_selected_model(&self, model: &str) -> Result<(), SettingsError> {
        self.file.set_selected_model(model)
    }
}
