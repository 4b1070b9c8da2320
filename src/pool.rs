//! Bounded pool limiting in-flight HTTP attempts per service.
//!
//! A counting semaphore with owned, scope-guarded permits: the slot is
//! returned on every exit path, including errors and cancellation.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_MAX_SIZE: usize = 10;

/// Counting semaphore bounding concurrent outbound attempts.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    semaphore: Arc<Semaphore>,
    max_size: usize,
}

/// Guard for one pool slot; dropping it releases the slot.
#[derive(Debug)]
pub struct PoolPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionPool {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self { semaphore: Arc::new(Semaphore::new(max_size)), max_size }
    }

    /// Wait for a free slot. The permit must be held for the duration of the
    /// outbound attempt.
    pub async fn acquire(&self) -> PoolPermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("ConnectionPool semaphore is never closed");
        PoolPermit { _permit: permit }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}
