use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::WorkerSection;
use crate::queue::{JobQueueStore, QueueError, QueueResult, QueuedJob};
use crate::runner::RunOrchestrator;

/// Pulls jobs off the queue and feeds them to the orchestrator with a bounded
/// number of runs in flight.
pub struct Worker {
    queue: JobQueueStore,
    orchestrator: Arc<RunOrchestrator>,
    poll_interval: Duration,
    concurrency: usize,
}

impl Worker {
    pub fn new(queue: JobQueueStore, orchestrator: Arc<RunOrchestrator>, config: &WorkerSection) -> Self {
        Self {
            queue,
            orchestrator,
            poll_interval: config.poll_interval(),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Claims up to `concurrency` jobs, runs them and waits for all of them.
    /// Returns how many jobs were processed.
    pub async fn tick(&self) -> QueueResult<usize> {
        let mut in_flight = JoinSet::new();
        while in_flight.len() < self.concurrency {
            match self.claim().await? {
                Some(job) => {
                    in_flight.spawn(process(self.queue.clone(), Arc::clone(&self.orchestrator), job));
                }
                None => break,
            }
        }
        let mut processed = 0;
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(()) => processed += 1,
                Err(err) => warn!(error = %err, "job task aborted"),
            }
        }
        Ok(processed)
    }

    /// Keeps claiming jobs until `shutdown` flips to true, then waits for the
    /// runs already in flight.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
        match self.requeue_active().await {
            Ok(0) => {}
            Ok(count) => info!(count, "requeued jobs left active by a previous worker"),
            Err(err) => warn!(error = %err, "could not requeue active jobs"),
        }
        info!(concurrency = self.concurrency, "worker started");

        let mut in_flight = JoinSet::new();
        loop {
            if *shutdown.borrow() {
                break;
            }
            while in_flight.len() < self.concurrency {
                match self.claim().await {
                    Ok(Some(job)) => {
                        debug!(job_id = job.job_id, run_id = %job.run_id, "job claimed");
                        in_flight.spawn(process(
                            self.queue.clone(),
                            Arc::clone(&self.orchestrator),
                            job,
                        ));
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "failed to claim job");
                        break;
                    }
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "job task aborted");
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(in_flight = in_flight.len(), "worker stopping; draining runs");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "job task aborted");
            }
        }
    }

    async fn claim(&self) -> QueueResult<Option<QueuedJob>> {
        let queue = self.queue.clone();
        tokio::task::spawn_blocking(move || queue.claim_next())
            .await
            .map_err(|err| QueueError::Join(err.to_string()))?
    }

    async fn requeue_active(&self) -> QueueResult<usize> {
        let queue = self.queue.clone();
        tokio::task::spawn_blocking(move || queue.requeue_active())
            .await
            .map_err(|err| QueueError::Join(err.to_string()))?
    }
}

async fn process(queue: JobQueueStore, orchestrator: Arc<RunOrchestrator>, claimed: QueuedJob) {
    let job_id = claimed.job_id;
    let result = orchestrator.process_job(&claimed.job).await;
    info!(job_id, run_id = %result.run_id, status = %result.status, "job processed");
    match tokio::task::spawn_blocking(move || queue.finish(job_id, &result)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(job_id, error = %err, "failed to record job result"),
        Err(err) => warn!(job_id, error = %err, "job bookkeeping task aborted"),
    }
}
