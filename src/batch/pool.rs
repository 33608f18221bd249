//! Blocking-mode batch submission.
//!
//! A fixed pool of worker threads drains a shared queue of `(index, item)`
//! pairs. Cancellation stops dispatching queued items; in-flight workers
//! finish their current item, and undispatched slots are recorded as
//! cancelled so the batch still reaches Completed.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::handle::{BlockingBatchHandle, BlockingBatchShared};
use super::BatchOptions;
use crate::error::{DispatchError, DispatchResult};

/// Fan `items` out across `options.concurrency` worker threads running
/// `operation`, returning a handle immediately.
///
/// A single item's failure is captured in its result slot and never aborts
/// its siblings.
pub fn submit_blocking<T, R, F>(
    items: Vec<T>,
    options: &BatchOptions,
    operation: F,
) -> BlockingBatchHandle<R>
where
    T: Send + 'static,
    R: Send + Clone + 'static,
    F: Fn(usize, &T) -> DispatchResult<R> + Send + Sync + 'static,
{
    let total = items.len();
    let shared = BlockingBatchShared::new(total);
    let (tx, rx) = std::sync::mpsc::channel();
    let queue: Arc<Mutex<VecDeque<(usize, T)>>> =
        Arc::new(Mutex::new(items.into_iter().enumerate().collect()));
    let operation = Arc::new(operation);
    let workers = options.concurrency.max(1).min(total.max(1));
    let per_item_delay = options.per_item_delay;

    debug!(total, workers, "submitting blocking batch");
    shared.mark_running();

    for _ in 0..workers {
        let queue = queue.clone();
        let shared = shared.clone();
        let tx = tx.clone();
        let operation = operation.clone();

        std::thread::spawn(move || {
            loop {
                if shared.is_cancelled() {
                    // Drain whatever was never dispatched so the batch still
                    // completes; other workers may be draining concurrently.
                    while let Some((index, _item)) = queue.lock().pop_front() {
                        shared.record(index, Err(DispatchError::Cancelled));
                        let _ = tx.send((index, Err(DispatchError::Cancelled)));
                    }
                    break;
                }
                let next = queue.lock().pop_front();
                let Some((index, item)) = next else { break };
                if let Some(delay) = per_item_delay {
                    std::thread::sleep(delay);
                }
                let result = operation(index, &item);
                shared.record(index, result.clone());
                let _ = tx.send((index, result));
            }
        });
    }
    drop(tx);

    BlockingBatchHandle::new(shared, rx)
}
