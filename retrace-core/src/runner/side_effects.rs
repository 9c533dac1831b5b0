use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::warn;

/// Detached best-effort work (incremental persistence, backfills). Errors
/// are logged here and never reach the caller; `settle` joins whatever is
/// still in flight.
#[derive(Debug, Clone, Default)]
pub struct SideEffects {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SideEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F, E>(&self, effect: impl Into<String>, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        let effect = effect.into();
        let handle = tokio::spawn(async move {
            if let Err(err) = future.await {
                warn!(effect = %effect, error = %err, "side effect failed");
            }
        });
        self.lock().push(handle);
    }

    pub fn pending(&self) -> usize {
        self.lock().iter().filter(|handle| !handle.is_finished()).count()
    }

    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    warn!(error = %err, "side effect task aborted");
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn settle_joins_spawned_work_and_swallows_errors() {
        let effects = SideEffects::new();
        let done = Arc::new(AtomicUsize::new(0));
        for n in 0..4 {
            let done = Arc::clone(&done);
            effects.spawn(format!("write {n}"), async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
                if n % 2 == 0 {
                    Err("disk full")
                } else {
                    Ok(())
                }
            });
        }
        effects.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(effects.pending(), 0);
    }
}
