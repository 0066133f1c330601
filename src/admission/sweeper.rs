//! Background expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::registry::Registry;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running sweeper task.
///
/// Call [`shutdown`](SweeperHandle::shutdown) to stop it cleanly. Dropping the
/// handle aborts the task.
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Spawn a task sweeping `registry` every `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(registry: Arc<Registry>, interval: Duration) -> Self {
        let (tx, mut rx) = oneshot::channel();

        info!(interval_ms = interval.as_millis() as u64, "Starting admission sweeper");

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.sweep();
                    }
                    _ = &mut rx => {
                        debug!("Admission sweeper received shutdown");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown: Some(tx),
            task: Some(task),
        }
    }

    /// Stop the sweeper and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            // The task may already have exited; nothing to signal then.
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Admission sweeper ended abnormally");
            }
        }
        info!("Admission sweeper stopped");
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Registry {
    /// Start sweeping this registry in the background.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        SweeperHandle::spawn(Arc::clone(self), interval)
    }
}
