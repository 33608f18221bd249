//! Batch dispatch: run one operation over many independent inputs
//! concurrently.
//!
//! Two execution modes share the same handle contract: cooperative
//! ([`submit`], tokio tasks bounded by a semaphore) and blocking
//! ([`submit_blocking`], a worker thread pool draining a shared queue).
//! `results[i]` always corresponds to `items[i]` regardless of completion
//! order, and one poisoned item never aborts the batch -- its failure
//! surfaces when that slot is read.

mod handle;
mod pool;
mod task;


pub use handle::{BatchHandle, BlockingBatchHandle};
pub use pool::submit_blocking;
pub use task::submit;

use std::time::Duration;

/// Lifecycle of a batch job. Pending -> Running exactly once at submission,
/// Running -> Completed exactly once when every slot is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Running,
    Completed,
}

/// Knobs for a batch submission.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Worker thread count (blocking mode) or maximum simultaneously
    /// in-flight tasks (cooperative mode). Clamped to at least 1.
    pub concurrency: usize,
    /// Fixed delay injected before each item. A test/debug hook.
    pub per_item_delay: Option<Duration>,
    /// Token estimate debited from the shared budget per item.
    pub estimated_tokens_per_item: Option<u64>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            per_item_delay: None,
            estimated_tokens_per_item: None,
        }
    }
}

impl BatchOptions {
    /// Options with the given concurrency width and defaults elsewhere.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    /// Inject a fixed delay before each item.
    pub fn with_per_item_delay(mut self, delay: Duration) -> Self {
        self.per_item_delay = Some(delay);
        self
    }

    /// Debit this many budget tokens per item.
    pub fn with_estimated_tokens_per_item(mut self, tokens: u64) -> Self {
        self.estimated_tokens_per_item = Some(tokens);
        self
    }
}
