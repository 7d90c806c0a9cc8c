//! # Task Scheduler
//!
//! Registry of cancelable fixed-rate jobs keyed by string id. A job runs at
//! a constant wall-clock period starting one period after registration; an
//! overrunning tick skips the missed slots instead of bunching. A failing
//! tick is logged and leaves the job scheduled for the next tick.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Fixed-rate job registry used by the polling ingesters.
#[derive(Default)]
pub struct TaskScheduler {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `task` to run every `period`, starting after the first
    /// period elapses. Scheduling under an id that is already registered
    /// cancels and replaces the existing job.
    pub fn schedule_fixed_rate<F, Fut>(&self, id: &str, task: F, period: Duration)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        if let Some(previous) = tasks.remove(id) {
            warn!(id, "replacing already-scheduled task");
            previous.token.cancel();
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let task_id = id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; consume it so the first
            // run happens one period from now.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!(id = %task_id, "scheduled task cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = task().await {
                            error!(id = %task_id, error = %e, "scheduled task failed, will retry next tick");
                        }
                    }
                }
            }
        });

        tasks.insert(id.to_string(), ScheduledTask { token, handle });
    }

    /// Requests cancellation of the job registered under `id`. An in-flight
    /// tick is allowed to complete. Unknown ids are a no-op.
    pub fn cancel(&self, id: &str) {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        if let Some(task) = tasks.remove(id) {
            task.token.cancel();
        }
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.tasks
            .lock()
            .expect("scheduler lock poisoned")
            .contains_key(id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.tasks.lock().expect("scheduler lock poisoned").len()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        let tasks = self.tasks.lock().expect("scheduler lock poisoned");
        for task in tasks.values() {
            task.token.cancel();
            task.handle.abort();
        }
    }
}
