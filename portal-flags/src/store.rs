//! Keyed observable store.
//!
//! Contract:
//! - `get` returns the last written value or `None`.
//! - `set` calls on one key apply in call order (a per-key async lock is held
//!   across the transport write and the fan-out); different keys never wait on
//!   each other.
//! - `observe` emits the current snapshot first, then one snapshot per later
//!   write, until the [`Observation`] is dropped. Every observer has its own
//!   unbounded queue, so a slow reader never loses a snapshot. An unrecognized
//!   key with no value emits a single absent snapshot and completes.
//! - In strict mode the first access to an unrecognized key posts exactly one
//!   [`Diagnostic::UnregisteredKey`]; later accesses to the same key are silent.
//!
//! Transport errors on `get`/`set` propagate to the caller unchanged.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::OwnedMutexGuard;

use portal_core::types::StorageValueSnapshot;

use crate::error::StorageError;
use crate::reporter::{Diagnostic, ErrorReporter, TracingReporter};
use crate::transport::StorageTransport;

type WriteLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Per-key value store with push-based observation.
pub struct KeyedObservableStore<T> {
    bucket: String,
    transport: Arc<dyn StorageTransport>,
    reporter: Arc<dyn ErrorReporter>,
    strict_mode: bool,
    /// `None` means every key is recognized.
    known: RwLock<Option<HashSet<String>>>,
    /// Value reported for recognized keys that were never written.
    fallback: Option<T>,
    reported: Mutex<HashSet<String>>,
    write_locks: WriteLocks,
    observers: Mutex<HashMap<String, Vec<UnboundedSender<StorageValueSnapshot<T>>>>>,
}

impl<T> KeyedObservableStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Store namespaced under `bucket` on top of `transport`.
    pub fn new(bucket: impl Into<String>, transport: Arc<dyn StorageTransport>) -> Self {
        Self {
            bucket: bucket.into(),
            transport,
            reporter: Arc::new(TracingReporter),
            strict_mode: false,
            known: RwLock::new(None),
            fallback: None,
            reported: Mutex::new(HashSet::new()),
            write_locks: Mutex::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn strict(mut self, strict_mode: bool) -> Self {
        self.strict_mode = strict_mode;
        self
    }

    /// Restrict recognized keys to `keys` (more can be added with [`Self::declare`]).
    #[must_use]
    pub fn with_known_keys<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.known.write().unwrap_or_else(PoisonError::into_inner) =
            Some(keys.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Mark `key` as recognized.
    pub fn declare(&self, key: impl Into<String>) {
        let key = key.into();
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        let mut known = self.known.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(keys) = known.as_mut() {
            keys.insert(key);
        }
    }

    pub fn is_known(&self, key: &str) -> bool {
        self.known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |keys| keys.contains(key))
    }

    /// Last written value for `key`, or `None` if never written.
    pub async fn get(&self, key: &str) -> Result<Option<T>, StorageError> {
        self.check_known(key);
        self.read(key).await
    }

    /// Persist `value` and notify every active observer of `key`.
    pub async fn set(&self, key: &str, value: T) -> Result<(), StorageError> {
        self.check_known(key);
        let _guard = self.lock_key(key).await;
        self.transport
            .set(&self.storage_key(key), serde_json::to_value(&value)?)
            .await?;
        self.emit(key, StorageValueSnapshot::present(key, value));
        Ok(())
    }

    /// Remove the stored value; observers receive the snapshot they would get on a fresh subscribe.
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_known(key);
        let _guard = self.lock_key(key).await;
        self.transport.remove(&self.storage_key(key)).await?;
        let snapshot = self.current_snapshot(key, None);
        self.emit(key, snapshot);
        Ok(())
    }

    /// Current snapshot for `key` without subscribing.
    pub async fn snapshot(&self, key: &str) -> Result<StorageValueSnapshot<T>, StorageError> {
        self.check_known(key);
        let stored = self.read(key).await?;
        Ok(self.current_snapshot(key, stored))
    }

    /// Subscribe to `key`: replay the current snapshot, then push updates.
    pub async fn observe(&self, key: &str) -> Result<Observation<T>, StorageError> {
        self.check_known(key);

        // Holding the key's write lock while subscribing and reading means no
        // write can land between the replayed value and the first update.
        let _guard = self.lock_key(key).await;
        let updates = self.subscribe(key);
        let stored = self.read(key).await?;
        let first = self.current_snapshot(key, stored);

        if !first.is_present() && !self.is_known(key) {
            return Ok(Observation::completed(first));
        }
        Ok(Observation {
            pending: Some(first),
            updates: Some(updates),
        })
    }

    /// Number of live observers of `key`.
    pub fn observer_count(&self, key: &str) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Keys with a write lock currently allocated.
    #[cfg(test)]
    fn write_lock_count(&self) -> usize {
        self.write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn read(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.transport.get(&self.storage_key(key)).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    fn current_snapshot(&self, key: &str, stored: Option<T>) -> StorageValueSnapshot<T> {
        match stored {
            Some(value) => StorageValueSnapshot::present(key, value),
            None => match (&self.fallback, self.is_known(key)) {
                (Some(fallback), true) => StorageValueSnapshot::present(key, fallback.clone()),
                _ => StorageValueSnapshot::absent(key),
            },
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, key)
    }

    fn check_known(&self, key: &str) {
        if !self.strict_mode || self.is_known(key) {
            return;
        }
        let first_time = self
            .reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
        if first_time {
            self.reporter.post(Diagnostic::UnregisteredKey {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            });
        }
    }

    async fn lock_key(&self, key: &str) -> KeyWriteGuard<'_> {
        let lock = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone();
        KeyWriteGuard {
            locks: &self.write_locks,
            key: key.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn subscribe(&self, key: &str) -> UnboundedReceiver<StorageValueSnapshot<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let senders = observers.entry(key.to_string()).or_default();
        senders.retain(|sender| !sender.is_closed());
        senders.push(tx);
        rx
    }

    fn emit(&self, key: &str, snapshot: StorageValueSnapshot<T>) {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = observers.get_mut(key) {
            senders.retain(|sender| sender.send(snapshot.clone()).is_ok());
            if senders.is_empty() {
                observers.remove(key);
            }
        }
    }
}

/// Holds one key's write lock; frees the lock entry when nobody else wants it.
struct KeyWriteGuard<'a> {
    locks: &'a WriteLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyWriteGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        // Clones are only taken under the map lock, so a count of one means no waiter.
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// A subscription returned by [`KeyedObservableStore::observe`].
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Observation<T> {
    pending: Option<StorageValueSnapshot<T>>,
    updates: Option<UnboundedReceiver<StorageValueSnapshot<T>>>,
}

impl<T: Clone> Observation<T> {
    fn completed(only: StorageValueSnapshot<T>) -> Self {
        Self {
            pending: Some(only),
            updates: None,
        }
    }

    /// Next snapshot; `None` once the stream has completed.
    pub async fn next(&mut self) -> Option<StorageValueSnapshot<T>> {
        if let Some(first) = self.pending.take() {
            return Some(first);
        }
        let next = self.updates.as_mut()?.recv().await;
        if next.is_none() {
            self.updates = None;
        }
        next
    }

    /// Non-blocking variant of [`Observation::next`]; `None` when nothing is ready.
    pub fn try_next(&mut self) -> Option<StorageValueSnapshot<T>> {
        if let Some(first) = self.pending.take() {
            return Some(first);
        }
        match self.updates.as_mut()?.try_recv() {
            Ok(snapshot) => Some(snapshot),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.updates = None;
                None
            }
        }
    }

    /// True once no further snapshots can arrive.
    pub fn is_complete(&self) -> bool {
        self.pending.is_none() && self.updates.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::RecordingReporter;
    use crate::transport::MemoryTransport;
    use async_trait::async_trait;
    use portal_core::types::Presence;
    use serde_json::Value;

    fn store() -> KeyedObservableStore<bool> {
        KeyedObservableStore::new("test", Arc::new(MemoryTransport::new()))
    }

    struct FailingTransport;

    #[async_trait]
    impl StorageTransport for FailingTransport {
        async fn get(&self, _key: &str) -> Result<Option<Value>, StorageError> {
            Err(StorageError::Transport("backend down".to_string()))
        }
        async fn set(&self, _key: &str, _value: Value) -> Result<(), StorageError> {
            Err(StorageError::Transport("backend down".to_string()))
        }
        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Transport("backend down".to_string()))
        }
    }

    #[tokio::test]
    async fn get_returns_last_written_value() {
        let store = store();
        assert_eq!(store.get("beta-ui").await.unwrap(), None);
        store.set("beta-ui", true).await.unwrap();
        store.set("beta-ui", false).await.unwrap();
        assert_eq!(store.get("beta-ui").await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn observe_after_write_replays_current_value() {
        let store = store();
        store.set("beta-ui", true).await.unwrap();

        let mut observation = store.observe("beta-ui").await.unwrap();
        let first = observation.next().await.expect("first snapshot");
        assert_eq!(first, StorageValueSnapshot::present("beta-ui", true));
    }

    #[tokio::test]
    async fn observe_pushes_every_later_write_in_order() {
        let store = store();
        let mut observation = store.observe("k").await.unwrap();
        assert_eq!(observation.next().await.unwrap().presence, Presence::Absent);

        store.set("k", true).await.unwrap();
        store.set("k", false).await.unwrap();
        assert_eq!(observation.next().await.unwrap().value, Some(true));
        assert_eq!(observation.next().await.unwrap().value, Some(false));
        assert!(observation.try_next().is_none());
        assert!(!observation.is_complete(), "known key keeps watching");
    }

    #[tokio::test]
    async fn slow_observer_receives_every_write() {
        let store: KeyedObservableStore<u32> =
            KeyedObservableStore::new("test", Arc::new(MemoryTransport::new()));
        let mut observation = store.observe("counter").await.unwrap();
        for n in 0..100 {
            store.set("counter", n).await.unwrap();
        }

        assert_eq!(observation.try_next().unwrap().presence, Presence::Absent);
        let delivered: Vec<u32> = std::iter::from_fn(|| observation.try_next())
            .filter_map(|snapshot| snapshot.value)
            .collect();
        assert_eq!(delivered, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn write_locks_are_released_after_each_write() {
        let store = store();
        for n in 0..20 {
            store.set(&format!("key-{n}"), true).await.unwrap();
        }
        let _observation = store.observe("key-0").await.unwrap();
        store.remove("key-1").await.unwrap();
        assert_eq!(store.write_lock_count(), 0);

        let (a, b) = tokio::join!(store.set("shared", true), store.set("shared", false));
        a.unwrap();
        b.unwrap();
        assert_eq!(store.write_lock_count(), 0);
    }

    #[tokio::test]
    async fn declaring_a_key_forgets_its_report() {
        let reporter = Arc::new(RecordingReporter::new());
        let store = store()
            .with_known_keys(["known"])
            .strict(true)
            .with_reporter(reporter.clone());
        store.get("late").await.unwrap();
        store.declare("late");
        store.get("late").await.unwrap();

        assert_eq!(reporter.count(), 1);
        assert!(store.reported.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_to_other_keys_are_not_delivered() {
        let store = store();
        let mut observation = store.observe("a").await.unwrap();
        observation.next().await.unwrap();
        store.set("b", true).await.unwrap();
        assert!(observation.try_next().is_none());
    }

    #[tokio::test]
    async fn unknown_absent_key_completes_after_one_snapshot() {
        let store = store().with_known_keys(["known"]);
        let mut observation = store.observe("mystery").await.unwrap();
        let only = observation.next().await.expect("absent snapshot");
        assert_eq!(only, StorageValueSnapshot::absent("mystery"));
        assert!(observation.next().await.is_none());
        assert!(observation.is_complete());
    }

    #[tokio::test]
    async fn known_key_never_written_reports_fallback() {
        let store = store().with_known_keys(["known"]).with_fallback(false);
        let mut observation = store.observe("known").await.unwrap();
        assert_eq!(
            observation.next().await.unwrap(),
            StorageValueSnapshot::present("known", false)
        );
        assert!(!observation.is_complete());
    }

    #[tokio::test]
    async fn dropping_observation_unsubscribes() {
        let store = store();
        let observation = store.observe("k").await.unwrap();
        assert_eq!(store.observer_count("k"), 1);
        drop(observation);
        assert_eq!(store.observer_count("k"), 0);
        store.set("k", true).await.unwrap();
    }

    #[tokio::test]
    async fn remove_emits_absent() {
        let store = store();
        store.set("k", true).await.unwrap();
        let mut observation = store.observe("k").await.unwrap();
        observation.next().await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(
            observation.next().await.unwrap(),
            StorageValueSnapshot::absent("k")
        );
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn strict_unknown_key_reports_once() {
        let reporter = Arc::new(RecordingReporter::new());
        let store = store()
            .with_known_keys(["known"])
            .strict(true)
            .with_reporter(reporter.clone());

        for _ in 0..5 {
            store.get("typo").await.unwrap();
        }
        store.set("typo", true).await.unwrap();
        let _ = store.observe("typo").await.unwrap();
        store.get("known").await.unwrap();

        assert_eq!(reporter.count(), 1);
        assert_eq!(
            reporter.posted()[0],
            Diagnostic::UnregisteredKey {
                bucket: "test".to_string(),
                key: "typo".to_string()
            }
        );
    }

    #[tokio::test]
    async fn non_strict_unknown_key_is_silent() {
        let reporter = Arc::new(RecordingReporter::new());
        let store = store()
            .with_known_keys(["known"])
            .with_reporter(reporter.clone());
        store.get("typo").await.unwrap();
        assert_eq!(reporter.count(), 0);
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let store: KeyedObservableStore<bool> =
            KeyedObservableStore::new("test", Arc::new(FailingTransport));
        assert!(matches!(
            store.get("k").await,
            Err(StorageError::Transport(_))
        ));
        assert!(matches!(
            store.set("k", true).await,
            Err(StorageError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn failed_write_notifies_nobody() {
        let store: KeyedObservableStore<bool> =
            KeyedObservableStore::new("test", Arc::new(FailingTransport));
        assert!(store.observe("k").await.is_err());
        assert!(store.set("k", true).await.is_err());
        assert_eq!(store.observer_count("k"), 0);
    }
}
