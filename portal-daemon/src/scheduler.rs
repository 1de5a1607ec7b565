//! Tokio interval driver for scheduled tasks.
//!
//! Each task gets its own spawned loop: wait `initial_delay`, then run on a
//! `frequency` interval with missed ticks skipped. A run that outlives its
//! `timeout` is abandoned. Every loop exits on the shared shutdown broadcast.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use portal_sync::{ScheduleError, SchedulingDriver, TaskDefinition};

pub struct IntervalScheduler {
    tasks: Mutex<BTreeMap<String, JoinHandle<()>>>,
    shutdown: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        let (shutdown, _) = broadcast::channel(16);
        Self::with_shutdown(shutdown)
    }
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing shutdown channel with the rest of the runtime.
    pub fn with_shutdown(shutdown: broadcast::Sender<()>) -> Self {
        Self {
            tasks: Mutex::new(BTreeMap::new()),
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Stop every task loop and refuse new tasks.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.shutdown.send(());
    }

    /// Wait for every task loop to exit.
    pub async fn join(&self) {
        let handles: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *tasks).into_iter().collect()
        };
        for (id, handle) in handles {
            if let Err(err) = handle.await {
                tracing::error!(task = %id, error = %err, "scheduled task loop failed");
            }
        }
    }
}

impl SchedulingDriver for IntervalScheduler {
    /// Spawn the task loop. Must be called from within a tokio runtime.
    fn schedule_task(&self, task: TaskDefinition) -> Result<(), ScheduleError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScheduleError::ShuttingDown);
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.contains_key(&task.id) {
            return Err(ScheduleError::DuplicateTask { id: task.id });
        }

        let id = task.id.clone();
        let shutdown_rx = self.shutdown.subscribe();
        tasks.insert(id, tokio::spawn(task_loop(task, shutdown_rx)));
        Ok(())
    }
}

async fn task_loop(task: TaskDefinition, mut shutdown_rx: broadcast::Receiver<()>) {
    tokio::select! {
        _ = shutdown_rx.recv() => return,
        _ = tokio::time::sleep(task.initial_delay) => {}
    }

    let mut interval = tokio::time::interval(task.frequency);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                tracing::debug!(task = %task.id, "scheduled run starting");
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    finished = tokio::time::timeout(task.timeout, (task.run)()) => {
                        if finished.is_err() {
                            tracing::warn!(
                                task = %task.id,
                                timeout_secs = task.timeout.as_secs(),
                                "scheduled run timed out; abandoned"
                            );
                        }
                    }
                }
            }
        }
    }
    tracing::debug!(task = %task.id, "task loop stopped");
}
