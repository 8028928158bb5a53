//! Key-value settings store shared by the controller and the lyric engine.
//!
//! The store holds runtime preferences that change while the player runs
//! (mode flags, sync threshold, last played song). Static defaults live in
//! [`crate::config`].

use crate::error::{CoreError, Result};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Keys written to the settings store
pub mod keys {
    pub const PREVIOUS_LOOP: &str = "previous_loop";
    pub const PREVIOUS_SHUFFLE: &str = "previous_shuffle";
    /// Misspelled key found in settings files written by older versions
    pub const LEGACY_PREVIOUS_SHUFFLE: &str = "previous__shuffle";
    pub const SHUFFLE: &str = "shuffle";
    pub const LOOP: &str = "loop";
    pub const REPEAT: &str = "repeat";
    /// Object mapping a file path to its saved position in milliseconds
    pub const LAST_PLAYED_SONG: &str = "last_played_song";
    /// Lyric poll interval in seconds
    pub const SYNC_THRESHOLD: &str = "sync_threshold";
    pub const SHOW_LYRICS: &str = "show_lyrics";
    pub const PLAY_SONG_AT_STARTUP: &str = "play_song_at_startup";
}

/// Backing store for settings values.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    /// Store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PersistenceUnavailable`] if the value could not be
    /// persisted. The value is still visible to later `get` calls.
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Settings held only for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<Map<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// Settings persisted as a single JSON object, written through on every `set`
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PersistenceUnavailable`] if the file exists but
    /// cannot be read or does not contain a JSON object.
    pub fn open(path: &Path) -> Result<Self> {
        let values = match fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Map::new(),
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(CoreError::PersistenceUnavailable {
                        reason: format!("{} does not contain a JSON object", path.display()),
                    })
                }
                Err(e) => {
                    return Err(CoreError::PersistenceUnavailable {
                        reason: format!("{}: {e}", path.display()),
                    })
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No settings file at {}, starting empty", path.display());
                Map::new()
            }
            Err(e) => {
                return Err(CoreError::PersistenceUnavailable {
                    reason: format!("{}: {e}", path.display()),
                })
            }
        };

        info!("Opened settings store at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            values: RwLock::new(values),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &Map<String, Value>) -> Result<()> {
        let write = || -> Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let content = serde_json::to_string_pretty(values)?;
            fs::write(&self.path, content)?;
            Ok(())
        };

        write().map_err(|e| CoreError::PersistenceUnavailable {
            reason: format!("{}: {e}", self.path.display()),
        })
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write();
        if values.get(key) == Some(&value) {
            return Ok(());
        }
        values.insert(key.to_string(), value);
        self.flush(&values)
    }
}

/// Open the JSON store at `path`, falling back to an in-memory store for this
/// session if it is unusable.
#[must_use]
pub fn open_or_memory(path: &Path) -> Arc<dyn SettingsStore> {
    match JsonFileStore::open(path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("{e}; using in-memory settings for this session");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Typed access to a shared [`SettingsStore`]
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn SettingsStore>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}

impl Settings {
    #[must_use]
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key)
    }

    /// Absent and `null` both read as `None`.
    #[must_use]
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.store.get(key).and_then(|v| v.as_bool())
    }

    #[must_use]
    pub fn f64(&self, key: &str) -> Option<f64> {
        self.store.get(key).and_then(|v| v.as_f64())
    }

    /// # Errors
    ///
    /// Returns [`CoreError::PersistenceUnavailable`] if the store cannot persist.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.store.set(key, value.into())
    }

    /// Store a value, logging instead of returning persistence failures.
    pub fn persist(&self, key: &str, value: impl Into<Value>) {
        if let Err(e) = self.set(key, value) {
            warn!("Could not save setting {key}: {e}");
        }
    }

    /// The last played song and its saved position.
    ///
    /// The mapping holds a single entry. One with several entries has no
    /// recoverable order and is ignored.
    #[must_use]
    pub fn last_played(&self) -> Option<(PathBuf, u64)> {
        let value = self.store.get(keys::LAST_PLAYED_SONG)?;
        let entries = value.as_object()?;
        if entries.len() != 1 {
            debug!("Ignoring {} with {} entries", keys::LAST_PLAYED_SONG, entries.len());
            return None;
        }
        let (path, position) = entries.iter().next()?;
        let position_ms = position
            .as_u64()
            .or_else(|| position.as_f64().and_then(|ms| crate::time::secs_to_millis(ms / 1000.0)))
            .unwrap_or(0);
        Some((PathBuf::from(path), position_ms))
    }

    /// # Errors
    ///
    /// Returns [`CoreError::PersistenceUnavailable`] if the store cannot persist.
    pub fn set_last_played(&self, path: &Path, position_ms: u64) -> Result<()> {
        let mut entry = Map::new();
        entry.insert(path.to_string_lossy().into_owned(), Value::from(position_ms));
        self.set(keys::LAST_PLAYED_SONG, Value::Object(entry))
    }
}
