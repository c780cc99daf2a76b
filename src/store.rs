//! Durable key-value storage for the conversation log and preferences.
//!
//! Values are JSON blobs validated on read.  A value that is missing, unreadable, not JSON, or
//! fails validation is replaced by the type's default; that condition is logged and counted but
//! never surfaced to the user.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{Error, Result};
use crate::observability::STORE_RESETS;

/// Key holding the conversation log.
pub const MESSAGES_KEY: &str = "messages";

/// Key holding the selected model.
pub const MODEL_KEY: &str = "model";

/// A string-keyed store of JSON blobs.
pub trait Store {
    /// Read the raw value under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value under `key`.
    fn set(&mut self, key: &str, value: String) -> Result<()>;
}

/// An in-process store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `key` with a raw value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// A directory holding one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|err| {
            Error::io(format!("failed to create store {}", root.display()), err)
        })?;
        Ok(Self { root })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io(format!("failed to read {key}"), err)),
        }
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(|err| Error::io(format!("failed to write {key}"), err))?;
        fs::rename(&tmp, &path).map_err(|err| Error::io(format!("failed to write {key}"), err))
    }
}

/// Decode and validate the value under `key`, falling back to the default on any failure.
pub fn load_or_default<T, S, F>(store: &S, key: &str, validate: F) -> T
where
    T: DeserializeOwned + Default,
    S: Store + ?Sized,
    F: FnOnce(&T) -> bool,
{
    match load(store, key, validate) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(err) => {
            STORE_RESETS.click();
            warn!(key, error = %err, "discarding persisted value");
            T::default()
        }
    }
}

fn load<T, S, F>(store: &S, key: &str, validate: F) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: Store + ?Sized,
    F: FnOnce(&T) -> bool,
{
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    let value: T = serde_json::from_str(&raw)
        .map_err(|e| Error::persisted_state_corrupt(key, e.to_string()))?;
    if validate(&value) {
        Ok(Some(value))
    } else {
        Err(Error::persisted_state_corrupt(key, "value failed validation"))
    }
}

/// Serialize `value` and write it under `key`.
pub fn save<T, S>(store: &mut S, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    S: Store + ?Sized,
{
    let raw = serde_json::to_string(value)?;
    store.set(key, raw)
}
