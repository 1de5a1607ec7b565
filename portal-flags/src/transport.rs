//! Storage transports underneath [`crate::KeyedObservableStore`].
//!
//! A transport is a flat string-keyed JSON value map. Namespacing by bucket
//! prefix and change fan-out are the store's job; a transport only persists.
//!
//! [`JsonFileTransport`] persists a single JSON document:
//!
//! ```text
//! { "updated_at": "<rfc3339>", "values": { "<bucket>/<key>": <json>, ... } }
//! ```
//!
//! Writes use an atomic `.tmp` + rename.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{io_err, StorageError};

/// Persistence backend for a keyed store. Implementations must be thread-safe.
#[async_trait]
pub trait StorageTransport: Send + Sync {
    /// Raw value stored under `key`, `None` if never written (or removed).
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Persist `value` under `key`.
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Drop `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local transport; also backs session-scoped flags.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageTransport for MemoryTransport {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// On-disk storage document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageDocument {
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

/// `<home>/.portal/storage/`: pure, no I/O.
pub fn storage_dir_at(home: &Path) -> PathBuf {
    home.join(".portal").join("storage")
}

/// Transport persisting every key into one JSON file.
///
/// Each read-modify-write runs as one blocking task holding an internal lock,
/// so two writes in the same process never lose each other's keys and a
/// cancelled caller cannot release the lock while its save is in flight.
#[derive(Debug)]
pub struct JsonFileTransport {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonFileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// `<storage_dir>/<name>.json`
    pub fn in_dir(storage_dir: &Path, name: &str) -> Self {
        Self::new(storage_dir.join(format!("{name}.json")))
    }

    /// `<home>/.portal/storage/<name>.json`
    pub fn at_home(home: &Path, name: &str) -> Self {
        Self::in_dir(&storage_dir_at(home), name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn locked<R, F>(&self, op: F) -> Result<R, StorageError>
    where
        R: Send + 'static,
        F: FnOnce(&Path) -> Result<R, StorageError> + Send + 'static,
    {
        let path = self.path.clone();
        let lock = Arc::clone(&self.lock);
        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            op(&path)
        })
        .await
        .map_err(|err| StorageError::Transport(format!("storage join error: {err}")))?
    }
}

#[async_trait]
impl StorageTransport for JsonFileTransport {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let key = key.to_string();
        self.locked(move |path| Ok(load_document(path)?.values.remove(&key)))
            .await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let key = key.to_string();
        self.locked(move |path| {
            let mut document = load_document(path)?;
            document.values.insert(key, value);
            document.updated_at = Utc::now();
            save_document(path, &document)
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        self.locked(move |path| {
            let mut document = load_document(path)?;
            if document.values.remove(&key).is_none() {
                return Ok(());
            }
            document.updated_at = Utc::now();
            save_document(path, &document)
        })
        .await
    }
}

fn load_document(path: &Path) -> Result<StorageDocument, StorageError> {
    if !path.exists() {
        return Ok(StorageDocument {
            updated_at: Utc::now(),
            values: BTreeMap::new(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

fn save_document(path: &Path, document: &StorageDocument) -> Result<(), StorageError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid storage path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(document)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}
