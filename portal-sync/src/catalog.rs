//! Target catalogs a reconciler writes into.
//!
//! # Storage layout
//!
//! ```text
//! ~/.portal/
//!   catalog.json   (FileCatalog; { "updated_at": …, "entities": {…}, "refresh_requests": {…} })
//! ```
//!
//! Both implementations delegate to [`crate::mutation::apply_full_mutation`],
//! so ownership scoping and idempotence behave identically.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use portal_core::types::{DerivedEntity, EntityKey, EntityMutation, LocationKey};

use crate::error::{catalog_io_err, CatalogError};
use crate::mutation::{apply_full_mutation, CatalogState, MutationPlan};

/// Sink handle handed to a reconciler by `connect`.
#[async_trait]
pub trait CatalogConnection: Send + Sync {
    /// Apply a mutation atomically and report what changed.
    async fn apply_mutation(&self, mutation: EntityMutation) -> Result<MutationPlan, CatalogError>;

    /// Ask downstream processors to re-validate `keys`.
    async fn refresh(&self, keys: &[EntityKey]) -> Result<(), CatalogError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local catalog. Counts calls so callers can assert on them.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
    mutation_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self) -> CatalogState {
        self.state.read().await.clone()
    }

    /// Entities owned by `location_key`, in key order.
    pub async fn entities_for(&self, location_key: &LocationKey) -> Vec<DerivedEntity> {
        self.state
            .read()
            .await
            .owned_by(location_key)
            .map(|stored| stored.entity.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entities.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of `apply_mutation` calls received.
    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    /// Number of `refresh` calls received.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogConnection for MemoryCatalog {
    async fn apply_mutation(&self, mutation: EntityMutation) -> Result<MutationPlan, CatalogError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        Ok(apply_full_mutation(&mut state, &mutation, Utc::now()))
    }

    async fn refresh(&self, keys: &[EntityKey]) -> Result<(), CatalogError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let mut state = self.state.write().await;
        for key in keys {
            if state.entities.contains_key(key) {
                state.refresh_requests.insert(key.clone(), now);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// On-disk catalog document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogFile {
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: CatalogState,
}

/// `<home>/.portal/catalog.json`: pure, no I/O.
pub fn catalog_path_at(home: &Path) -> PathBuf {
    home.join(".portal").join("catalog.json")
}

/// Load the catalog document at `path`; a missing file is an empty catalog.
pub fn load_catalog(path: &Path) -> Result<CatalogState, CatalogError> {
    if !path.exists() {
        return Ok(CatalogState::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| catalog_io_err(path, e))?;
    let file: CatalogFile = serde_json::from_str(&contents)?;
    Ok(file.state)
}

/// Save the catalog document atomically (`.json.tmp` + rename).
pub fn save_catalog(path: &Path, state: &CatalogState) -> Result<(), CatalogError> {
    let Some(dir) = path.parent() else {
        return Err(catalog_io_err(
            path,
            std::io::Error::other("invalid catalog path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| catalog_io_err(dir, e))?;

    let file = CatalogFile {
        updated_at: Utc::now(),
        state: state.clone(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| catalog_io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| catalog_io_err(path, e))?;
    Ok(())
}

/// Catalog persisted as one JSON document.
///
/// Every operation is one read-modify-write on a blocking thread with the
/// file lock held throughout, so providers sharing the file never lose each
/// other's entities, even when the calling future is dropped mid-write.
#[derive(Debug)]
pub struct FileCatalog {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Catalog at `<home>/.portal/catalog.json`.
    pub fn at_home(home: &Path) -> Self {
        Self::new(catalog_path_at(home))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<CatalogState, CatalogError> {
        self.locked("load", load_catalog).await
    }

    /// Run `op` against the file on a blocking thread while holding the lock.
    async fn locked<R, F>(&self, what: &'static str, op: F) -> Result<R, CatalogError>
    where
        R: Send + 'static,
        F: FnOnce(&Path) -> Result<R, CatalogError> + Send + 'static,
    {
        let path = self.path.clone();
        let lock = Arc::clone(&self.lock);
        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            op(&path)
        })
        .await
        .map_err(|e| CatalogError::Unavailable(format!("catalog {what} join error: {e}")))?
    }
}

#[async_trait]
impl CatalogConnection for FileCatalog {
    async fn apply_mutation(&self, mutation: EntityMutation) -> Result<MutationPlan, CatalogError> {
        self.locked("mutation", move |path| {
            let mut state = load_catalog(path)?;
            let plan = apply_full_mutation(&mut state, &mutation, Utc::now());
            if !plan.summary().is_noop() {
                save_catalog(path, &state)?;
            }
            Ok(plan)
        })
        .await
    }

    async fn refresh(&self, keys: &[EntityKey]) -> Result<(), CatalogError> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys = keys.to_vec();
        self.locked("refresh", move |path| {
            let mut state = load_catalog(path)?;
            let now = Utc::now();
            for key in keys {
                if state.entities.contains_key(&key) {
                    state.refresh_requests.insert(key, now);
                }
            }
            save_catalog(path, &state)
        })
        .await
    }
}
