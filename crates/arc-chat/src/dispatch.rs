//! Bounded task pool for chat exchanges

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

/// Default number of exchanges allowed to run at once
pub const DEFAULT_MAX_CONCURRENT: usize = 16;

/// Spawns exchanges as tokio tasks, at most `max` running at a time.
///
/// Spawning never waits; a task beyond the limit parks on the semaphore
/// inside its own task.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    permits: Arc<Semaphore>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl Dispatcher {
    pub fn new(max: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max.max(1))),
        }
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Dispatcher closed, dropping exchange");
                    return;
                }
            };
            fut.await;
        })
    }
}
