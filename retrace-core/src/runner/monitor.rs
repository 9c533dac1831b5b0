use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::{cancel_pair, CancelSignal};
use crate::run::{RunStatus, RunStore};

/// Polls a run's persisted status and fires the handle's cancel signal once
/// the run is marked `cancelled`.
pub struct CancellationMonitor;

impl CancellationMonitor {
    pub fn start(
        store: Arc<dyn RunStore>,
        run_id: impl Into<String>,
        interval: Duration,
    ) -> MonitorHandle {
        let run_id = run_id.into();
        let (trigger, signal) = cancel_pair();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.fetch_run_status(&run_id).await {
                    Ok(Some(RunStatus::Cancelled)) => {
                        info!(run_id = %run_id, "cancellation requested; signalling engines");
                        trigger.cancel();
                        return;
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => debug!(run_id = %run_id, "run vanished while monitoring"),
                    Err(err) => {
                        warn!(run_id = %run_id, error = %err, "cancellation poll failed")
                    }
                }
            }
        });
        MonitorHandle {
            task: Some(task),
            signal,
        }
    }
}

/// Owning handle of a monitor task. Dropping it stops the task.
pub struct MonitorHandle {
    task: Option<JoinHandle<()>>,
    signal: CancelSignal,
}

impl MonitorHandle {
    pub fn signal(&self) -> CancelSignal {
        self.signal.clone()
    }

    /// Whether the monitor observed a cancellation.
    pub fn fired(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
