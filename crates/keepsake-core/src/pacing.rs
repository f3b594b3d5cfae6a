//! Execution modes and batch pacing.
//!
//! Both pipelines are written once as `async` bodies. In [`ExecutionMode::Sync`]
//! nothing they await ever suspends, so driving them with a trivial executor
//! runs every step inline. In [`ExecutionMode::Async`] the pipelines yield to
//! the tokio scheduler every `batch_size` entities and push blocking work
//! (sealing, file I/O) onto the blocking pool.

use crate::error::PersistError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sync,
    Async,
}

/// Counts processed entities and yields once per batch.
#[derive(Debug)]
pub struct Pacer {
    mode: ExecutionMode,
    batch_size: usize,
    count: usize,
    yields: usize,
}

impl Pacer {
    pub fn new(mode: ExecutionMode, batch_size: usize) -> Self {
        Self {
            mode,
            batch_size: batch_size.max(1),
            count: 0,
            yields: 0,
        }
    }

    /// Record one processed entity.
    pub async fn tick(&mut self) {
        self.count += 1;
        if self.count % self.batch_size == 0 && self.mode == ExecutionMode::Async {
            self.yields += 1;
            tokio::task::yield_now().await;
        }
    }

    pub fn processed(&self) -> usize {
        self.count
    }

    /// How many times this pacer handed control back to the scheduler.
    pub fn yields(&self) -> usize {
        self.yields
    }
}

/// Run blocking work: inline in sync mode, on tokio's blocking pool in async
/// mode.
pub async fn offload<T, F>(mode: ExecutionMode, work: F) -> Result<T, PersistError>
where
    F: FnOnce() -> Result<T, PersistError> + Send + 'static,
    T: Send + 'static,
{
    match mode {
        ExecutionMode::Sync => work(),
        ExecutionMode::Async => tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| PersistError::Task(e.to_string()))?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_pacer_never_yields() {
        let mut pacer = Pacer::new(ExecutionMode::Sync, 2);
        pollster::block_on(async {
            for _ in 0..10 {
                pacer.tick().await;
            }
        });
        assert_eq!(pacer.processed(), 10);
        assert_eq!(pacer.yields(), 0);
    }

    #[tokio::test]
    async fn async_pacer_yields_once_per_batch() {
        let mut pacer = Pacer::new(ExecutionMode::Async, 3);
        for _ in 0..10 {
            pacer.tick().await;
        }
        assert_eq!(pacer.yields(), 3);
    }

    #[tokio::test]
    async fn zero_batch_size_yields_every_item() {
        let mut pacer = Pacer::new(ExecutionMode::Async, 0);
        for _ in 0..4 {
            pacer.tick().await;
        }
        assert_eq!(pacer.yields(), 4);
    }

    #[test]
    fn offload_inline_in_sync_mode() {
        let value = pollster::block_on(offload(ExecutionMode::Sync, || Ok(41 + 1))).unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn offload_on_blocking_pool_in_async_mode() {
        let value = offload(ExecutionMode::Async, || Ok::<_, PersistError>("done"))
            .await
            .unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn offload_propagates_panics_as_task_errors() {
        let result: Result<(), _> = offload(ExecutionMode::Async, || panic!("boom")).await;
        assert!(matches!(result, Err(PersistError::Task(_))));
    }
}
