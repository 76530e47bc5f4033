//! Compute admission for trainer calls.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Error)]
pub enum LimiterError {
    #[error("resource limiter closed")]
    Closed,
    #[error("resource limiter unavailable: {0}")]
    Unavailable(String),
}

/// A held unit of compute. Dropping the slot releases it.
pub struct ComputeSlot {
    _guard: Box<dyn std::any::Any + Send + Sync>,
}

impl ComputeSlot {
    pub fn new<G: Send + Sync + 'static>(guard: G) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for ComputeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeSlot").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ResourceLimiter: Send + Sync {
    /// Wait for a compute slot.
    async fn acquire(&self) -> Result<ComputeSlot, LimiterError>;
}

/// In-process limiter backed by a tokio semaphore
#[derive(Debug, Clone)]
pub struct SemaphoreLimiter {
    semaphore: Arc<Semaphore>,
}

impl SemaphoreLimiter {
    pub fn new(slots: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(slots.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl ResourceLimiter for SemaphoreLimiter {
    async fn acquire(&self) -> Result<ComputeSlot, LimiterError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LimiterError::Closed)?;
        Ok(ComputeSlot::new(permit))
    }
}
