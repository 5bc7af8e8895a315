//! Periodic background work: cache flushing and model reloading.
//!
//! A [`PeriodicScheduler`] owns at most one tokio task. The task skips the
//! interval's immediate first tick, so the first run happens one full period
//! after [`PeriodicScheduler::start`]. [`PeriodicScheduler::stop`] signals the
//! task and joins it; a run already in progress completes first, and no run
//! begins after `stop` returns.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::lock::mutex_lock;
use super::store::ProcessingCache;

const SOURCE: &str = "cache::scheduler";

/// Work executed on every scheduler tick.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn run(&self);
}

struct Running {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Runs a [`PeriodicTask`] every `period` seconds until stopped.
pub struct PeriodicScheduler {
    period_secs: u64,
    task: Arc<dyn PeriodicTask>,
    running: Mutex<Option<Running>>,
}

impl PeriodicScheduler {
    pub fn new(period_secs: u64, task: Arc<dyn PeriodicTask>) -> Self {
        Self {
            period_secs,
            task,
            running: Mutex::new(None),
        }
    }

    pub fn period_secs(&self) -> u64 {
        self.period_secs
    }

    pub fn is_running(&self) -> bool {
        mutex_lock(&self.running, SOURCE, "is_running").is_some()
    }

    /// Spawn the ticking task. Must be called from within a tokio runtime.
    ///
    /// A zero period leaves the scheduler stopped. Calling `start` on a
    /// running scheduler does nothing.
    pub fn start(&self) {
        let task_name = self.task.name();
        if self.period_secs == 0 {
            info!(
                target = "fascio::scheduler",
                task = task_name,
                "periodic task disabled (period is 0)"
            );
            return;
        }

        let mut running = mutex_lock(&self.running, SOURCE, "start");
        if running.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = Arc::clone(&self.task);
        let period = Duration::from_secs(self.period_secs);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => task.run().await,
                }
            }
        });

        info!(
            target = "fascio::scheduler",
            task = task_name,
            period_secs = self.period_secs,
            "periodic task started"
        );
        *running = Some(Running {
            stop: stop_tx,
            handle,
        });
    }

    /// Stop the task and wait for it to finish. Idempotent.
    pub async fn stop(&self) {
        let running = mutex_lock(&self.running, SOURCE, "stop").take();
        let Some(Running { stop, handle }) = running else {
            return;
        };

        // The receiver is gone only if the task already ended.
        let _ = stop.send(());
        if let Err(err) = handle.await {
            warn!(
                target = "fascio::scheduler",
                task = self.task.name(),
                error = %err,
                "periodic task ended abnormally"
            );
        }
        info!(
            target = "fascio::scheduler",
            task = self.task.name(),
            "periodic task stopped"
        );
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        if let Some(running) = mutex_lock(&self.running, SOURCE, "drop").take() {
            running.handle.abort();
        }
    }
}

/// Flushes a [`ProcessingCache`] on every tick.
pub struct CacheFlushTask {
    cache: Arc<dyn ProcessingCache>,
}

impl CacheFlushTask {
    pub fn new(cache: Arc<dyn ProcessingCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PeriodicTask for CacheFlushTask {
    fn name(&self) -> &'static str {
        "cache-flush"
    }

    async fn run(&self) {
        let entries = self.cache.len();
        self.cache.clear();
        info!(
            target = "fascio::scheduler",
            entries, "scheduled cache flush"
        );
    }
}
