//! Durable key/value state.
//!
//! Every key maps to one JSON document. Writes go straight to disk (write to
//! a temp file, then rename) so a crash never loses more than the write in
//! progress. Reads treat missing or malformed documents as absent.

use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const KEY_CONNECTION_CONFIG: &str = "connection_config";
pub const KEY_SYNC_SESSIONS: &str = "sync_sessions";
pub const KEY_OPEN_SESSION: &str = "sync_open_session";
pub const KEY_SYNC_COMPLETION: &str = "sync_completion";
pub const KEY_LAST_KNOWN_HEIGHT: &str = "last_known_height";
pub const KEY_LAST_PROGRESS: &str = "last_progress";
pub const KEY_ONBOARDING_SEEN: &str = "onboarding_seen";
pub const KEY_THEME: &str = "theme";

const STATE_DIR: &str = "state";

#[derive(Debug)]
enum Backend {
    Directory(PathBuf),
    Memory(Mutex<HashMap<String, String>>),
}

#[derive(Debug)]
pub struct Storage {
    backend: Backend,
}

impl Storage {
    /// Open (and create if needed) the state directory under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join(STATE_DIR);
        fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("failed to create state dir {}", dir.display()))?;
        debug!(dir = %dir.display(), "state storage opened");
        Ok(Self {
            backend: Backend::Directory(dir),
        })
    }

    /// Volatile storage, used when no data dir is usable and in tests.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::Directory(_))
    }

    /// Load `key`. Read failures and malformed documents are logged and
    /// reported as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.read_raw(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, error = %err, "failed to read stored state; treating as absent");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "malformed stored state; treating as absent");
                None
            }
        }
    }

    /// Store `value` under `key`. Returns false (after logging) on failure.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let result = serde_json::to_string(value)
            .wrap_err("failed to encode state")
            .and_then(|raw| self.write_raw(key, &raw));
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(key, error = %err, "failed to persist state");
                false
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(err) = self.remove_raw(key) {
            warn!(key, error = %err, "failed to remove stored state");
        }
    }

    fn key_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{key}.json"))
    }

    fn read_raw(&self, key: &str) -> Result<Option<String>> {
        match &self.backend {
            Backend::Directory(dir) => match fs::read_to_string(Self::key_path(dir, key)) {
                Ok(raw) => Ok(Some(raw)),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err).wrap_err("read failed"),
            },
            Backend::Memory(map) => Ok(map.lock().get(key).cloned()),
        }
    }

    fn write_raw(&self, key: &str, raw: &str) -> Result<()> {
        match &self.backend {
            Backend::Directory(dir) => {
                let path = Self::key_path(dir, key);
                let tmp = dir.join(format!("{key}.json.tmp"));
                fs::write(&tmp, raw).wrap_err("write failed")?;
                fs::rename(&tmp, &path).wrap_err("rename failed")?;
                Ok(())
            }
            Backend::Memory(map) => {
                map.lock().insert(key.to_string(), raw.to_string());
                Ok(())
            }
        }
    }

    fn remove_raw(&self, key: &str) -> Result<()> {
        match &self.backend {
            Backend::Directory(dir) => match fs::remove_file(Self::key_path(dir, key)) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err).wrap_err("remove failed"),
            },
            Backend::Memory(map) => {
                map.lock().remove(key);
                Ok(())
            }
        }
    }
}
