//! Bounded fire-and-forget spawner for background sync work.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::Result;

/// Runs background jobs with at most `limit` executing at once.
///
/// Jobs queue for a permit rather than being rejected. Failures are logged;
/// nothing is reported back to the spawner.
pub struct BackgroundTasks {
    permits: Arc<Semaphore>,
    set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
            set: Mutex::new(JoinSet::new()),
        }
    }

    /// Spawn `job` on the current runtime.
    pub fn spawn<F>(&self, label: &'static str, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let mut set = self.lock_set();
        while let Some(finished) = set.try_join_next() {
            log_join_result(finished);
        }

        set.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            tracing::debug!("Background {label} started");
            match job.await {
                Ok(()) => tracing::debug!("Background {label} finished"),
                Err(error) => tracing::error!("Background {label} failed: {error}"),
            }
        });
    }

    /// Jobs spawned and not yet reaped, running or waiting.
    pub fn in_flight(&self) -> usize {
        self.lock_set().len()
    }

    /// Wait up to `timeout` for outstanding jobs.
    ///
    /// Returns `false` when the deadline passed; the stragglers keep running
    /// detached.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let mut set = std::mem::take(&mut *self.lock_set());
        let outstanding = set.len();
        if outstanding == 0 {
            return true;
        }

        tracing::info!("Waiting up to {timeout:?} for {outstanding} background sync task(s)");
        let drained = tokio::time::timeout(timeout, async {
            while let Some(finished) = set.join_next().await {
                log_join_result(finished);
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                "{} background sync task(s) still running at shutdown, detaching",
                set.len()
            );
            set.detach_all();
        }
        drained
    }

    fn lock_set(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_join_result(result: std::result::Result<(), JoinError>) {
    if let Err(error) = result {
        if error.is_panic() {
            tracing::error!("Background sync task panicked: {error}");
        }
    }
}
