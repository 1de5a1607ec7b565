//! Scheduling contract and the provider wrapper that owns its schedule.
//!
//! Building a [`ScheduledProvider`] only builds state. Scheduling happens in
//! [`ScheduledProvider::connect`], exactly once per provider instance, so a
//! host that connects twice re-binds the catalog without starting a second
//! timer.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;

use portal_core::config::ScheduleConfig;
use portal_core::types::ProviderId;

use crate::catalog::CatalogConnection;
use crate::reconciler::{PassOutcome, Reconciler};

pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;
/// Called after every pass a scheduled provider runs; the pass completes once
/// the returned future does.
pub type PassObserver = Arc<dyn Fn(&ProviderId, &PassOutcome) -> TaskFuture + Send + Sync>;

/// A recurring task handed to a [`SchedulingDriver`].
#[derive(Clone)]
pub struct TaskDefinition {
    pub id: String,
    pub frequency: Duration,
    /// Upper bound for one run; the driver abandons runs that exceed it.
    pub timeout: Duration,
    pub initial_delay: Duration,
    pub run: TaskFn,
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("id", &self.id)
            .field("frequency", &self.frequency)
            .field("timeout", &self.timeout)
            .field("initial_delay", &self.initial_delay)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("a task with id '{id}' is already scheduled")]
    DuplicateTask { id: String },

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Invokes task functions on a frequency/timeout policy.
pub trait SchedulingDriver: Send + Sync {
    fn schedule_task(&self, task: TaskDefinition) -> Result<(), ScheduleError>;
}

// ---------------------------------------------------------------------------
// ScheduledProvider
// ---------------------------------------------------------------------------

/// A reconciler plus the schedule it should run on.
pub struct ScheduledProvider {
    reconciler: Arc<Reconciler>,
    schedule: ScheduleConfig,
    scheduled: AtomicBool,
    observer: Option<PassObserver>,
}

impl ScheduledProvider {
    pub fn new(reconciler: Reconciler, schedule: ScheduleConfig) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            schedule,
            scheduled: AtomicBool::new(false),
            observer: None,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: PassObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn provider(&self) -> &ProviderId {
        self.reconciler.provider()
    }

    pub fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }

    pub fn task_id(&self) -> String {
        format!("{}:refresh", self.reconciler.provider())
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /// Bind `connection` and, on first connect only, schedule the refresh task.
    pub fn connect(
        &self,
        connection: Arc<dyn CatalogConnection>,
        driver: &dyn SchedulingDriver,
    ) -> Result<(), ScheduleError> {
        self.reconciler.connect(connection);
        if self.scheduled.swap(true, Ordering::AcqRel) {
            tracing::debug!(provider = %self.provider(), "already scheduled; connect only re-bound the catalog");
            return Ok(());
        }

        let task = TaskDefinition {
            id: self.task_id(),
            frequency: self.schedule.frequency(),
            timeout: self.schedule.timeout(),
            initial_delay: self.schedule.initial_delay(),
            run: self.task_fn(),
        };
        if let Err(err) = driver.schedule_task(task) {
            self.scheduled.store(false, Ordering::Release);
            return Err(err);
        }
        tracing::info!(
            provider = %self.provider(),
            frequency_secs = self.schedule.frequency_secs,
            "provider scheduled"
        );
        Ok(())
    }

    /// Run one pass now, outside the schedule, notifying the observer.
    pub async fn run_once(&self) -> PassOutcome {
        let outcome = self.reconciler.refresh().await;
        if let Some(observer) = &self.observer {
            observer(self.reconciler.provider(), &outcome).await;
        }
        outcome
    }

    fn task_fn(&self) -> TaskFn {
        let reconciler = Arc::clone(&self.reconciler);
        let observer = self.observer.clone();
        Arc::new(move || -> TaskFuture {
            let reconciler = Arc::clone(&reconciler);
            let observer = observer.clone();
            Box::pin(async move {
                let outcome = reconciler.refresh().await;
                if let Some(observer) = observer {
                    observer(reconciler.provider(), &outcome).await;
                }
            })
        })
    }
}

// ---------------------------------------------------------------------------
// ManualDriver
// ---------------------------------------------------------------------------

/// Driver that only records tasks; runs happen when the host asks.
///
/// Used for one-shot CLI syncs and in tests.
#[derive(Default)]
pub struct ManualDriver {
    tasks: Mutex<BTreeMap<String, TaskDefinition>>,
}

impl ManualDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn task(&self, id: &str) -> Option<TaskDefinition> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Run task `id` once, bounded by its timeout. Returns `false` if unknown or timed out.
    pub async fn run(&self, id: &str) -> bool {
        let Some(task) = self.task(id) else {
            return false;
        };
        tokio::time::timeout(task.timeout, (task.run)()).await.is_ok()
    }
}

impl SchedulingDriver for ManualDriver {
    fn schedule_task(&self, task: TaskDefinition) -> Result<(), ScheduleError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.contains_key(&task.id) {
            return Err(ScheduleError::DuplicateTask { id: task.id });
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }
}
