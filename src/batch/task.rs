//! Cooperative-mode batch submission.
//!
//! One tokio task per item, bounded to the configured concurrency by a
//! semaphore, cancellable as a group through a `CancellationToken`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::handle::{BatchHandle, BatchShared};
use super::BatchOptions;
use crate::error::{DispatchError, DispatchResult};

/// Fan `items` out across concurrent tasks running `operation`, returning a
/// handle immediately.
///
/// A single item's failure is captured in its result slot and never aborts
/// its siblings. Must be called from within a tokio runtime.
pub fn submit<T, R, F, Fut>(items: Vec<T>, options: &BatchOptions, operation: F) -> BatchHandle<R>
where
    T: Send + 'static,
    R: Send + Clone + 'static,
    F: Fn(usize, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult<R>> + Send + 'static,
{
    let total = items.len();
    let (shared, state_rx) = BatchShared::new(total);
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let operation = Arc::new(operation);
    let per_item_delay = options.per_item_delay;

    debug!(total, concurrency = options.concurrency, "submitting cooperative batch");
    shared.mark_running();

    for (index, item) in items.into_iter().enumerate() {
        let shared = shared.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        let semaphore = semaphore.clone();
        let operation = operation.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(DispatchError::Cancelled),
                result = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| DispatchError::Cancelled)?;
                    if let Some(delay) = per_item_delay {
                        tokio::time::sleep(delay).await;
                    }
                    operation(index, item).await
                } => result,
            };
            shared.record(index, result.clone());
            let _ = tx.send((index, result));
        });
    }

    BatchHandle::new(shared, state_rx, cancel, rx)
}
