//! Batch handles: progress introspection and result retrieval.
//!
//! Results populate out of submission order but always read back in input
//! order: slot `i` belongs to item `i` no matter which worker finished
//! first. Completion-order consumption is available separately through
//! `next_result`/`into_stream`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::Stream;
use parking_lot::{Condvar, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::BatchState;
use crate::error::DispatchResult;

/// State shared between a cooperative batch's tasks and its handle.
pub(super) struct BatchShared<R> {
    results: Mutex<Vec<Option<DispatchResult<R>>>>,
    completed: AtomicUsize,
    total: usize,
    state_tx: watch::Sender<BatchState>,
}

impl<R> BatchShared<R> {
    pub fn new(total: usize) -> (Arc<Self>, watch::Receiver<BatchState>) {
        let (state_tx, state_rx) = watch::channel(BatchState::Pending);
        let mut slots = Vec::with_capacity(total);
        slots.resize_with(total, || None);
        (
            Arc::new(Self {
                results: Mutex::new(slots),
                completed: AtomicUsize::new(0),
                total,
                state_tx,
            }),
            state_rx,
        )
    }

    /// Pending -> Running; an empty batch completes on the spot.
    pub fn mark_running(&self) {
        self.state_tx.send_replace(BatchState::Running);
        if self.total == 0 {
            self.state_tx.send_replace(BatchState::Completed);
        }
    }

    /// Write slot `index` and advance the completed counter; the last writer
    /// flips the state to Completed.
    ///
    /// The slot write strictly precedes the counter increment, so any reader
    /// that observed `Completed` finds every slot populated.
    pub fn record(&self, index: usize, result: DispatchResult<R>) {
        {
            let mut slots = self.results.lock();
            slots[index] = Some(result);
        }
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if done == self.total {
            self.state_tx.send_replace(BatchState::Completed);
        }
    }

    pub fn finished(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> BatchState {
        *self.state_tx.borrow()
    }
}

/// Handle to a cooperative-mode batch.
///
/// Returned immediately by submission; the batch runs regardless of whether
/// the handle is polled.
pub struct BatchHandle<R> {
    shared: Arc<BatchShared<R>>,
    state_rx: watch::Receiver<BatchState>,
    cancel: CancellationToken,
    completions: mpsc::UnboundedReceiver<(usize, DispatchResult<R>)>,
}

impl<R> BatchHandle<R> {
    pub(super) fn new(
        shared: Arc<BatchShared<R>>,
        state_rx: watch::Receiver<BatchState>,
        cancel: CancellationToken,
        completions: mpsc::UnboundedReceiver<(usize, DispatchResult<R>)>,
    ) -> Self {
        Self {
            shared,
            state_rx,
            cancel,
            completions,
        }
    }

    /// Number of submitted items.
    pub fn task_count(&self) -> usize {
        self.shared.total
    }

    /// Number of finished items at this instant. Monotonically
    /// non-decreasing; equals [`task_count`](Self::task_count) exactly when
    /// [`results`](Self::results) would return without waiting.
    pub fn finished_count(&self) -> usize {
        self.shared.finished()
    }

    /// Current batch lifecycle state.
    pub fn state(&self) -> BatchState {
        self.shared.state()
    }

    /// Cancel the batch as a group. Pending and in-flight tasks record
    /// [`crate::error::DispatchError::Cancelled`] in their slots, so the
    /// batch still completes deterministically.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the batch completes, or until `timeout` elapses. Returns
    /// whether the batch is complete. Does not consume results.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.state_rx.clone();
        let done = rx.wait_for(|state| *state == BatchState::Completed);
        match timeout {
            Some(limit) => matches!(tokio::time::timeout(limit, done).await, Ok(Ok(_))),
            None => done.await.is_ok(),
        }
    }

    /// Wait for completion and return every result in input order.
    pub async fn results(&self) -> Vec<DispatchResult<R>>
    where
        R: Clone,
    {
        self.wait(None).await;
        let slots = self.shared.results.lock();
        slots
            .iter()
            .map(|slot| {
                slot.clone()
                    .expect("completed batch has a result in every slot")
            })
            .collect()
    }

    /// Next `(index, result)` pair in completion order, `None` once every
    /// item has been yielded.
    pub async fn next_result(&mut self) -> Option<(usize, DispatchResult<R>)> {
        self.completions.recv().await
    }

    /// Consume the handle into a completion-order stream of
    /// `(index, result)` pairs.
    pub fn into_stream(self) -> impl Stream<Item = (usize, DispatchResult<R>)> {
        UnboundedReceiverStream::new(self.completions)
    }
}

/// State shared between a blocking batch's worker threads and its handle.
pub(super) struct BlockingBatchShared<R> {
    results: Mutex<Vec<Option<DispatchResult<R>>>>,
    completed: AtomicUsize,
    total: usize,
    state: Mutex<BatchState>,
    state_cv: Condvar,
    cancelled: AtomicBool,
}

impl<R> BlockingBatchShared<R> {
    pub fn new(total: usize) -> Arc<Self> {
        let mut slots = Vec::with_capacity(total);
        slots.resize_with(total, || None);
        Arc::new(Self {
            results: Mutex::new(slots),
            completed: AtomicUsize::new(0),
            total,
            state: Mutex::new(BatchState::Pending),
            state_cv: Condvar::new(),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn mark_running(&self) {
        *self.state.lock() = BatchState::Running;
        if self.total == 0 {
            self.complete();
        }
    }

    fn complete(&self) {
        let mut state = self.state.lock();
        *state = BatchState::Completed;
        self.state_cv.notify_all();
    }

    /// Write slot `index` and advance the completed counter. The slot write
    /// strictly precedes the increment, so any reader that observed
    /// `Completed` finds every slot populated.
    pub fn record(&self, index: usize, result: DispatchResult<R>) {
        {
            let mut slots = self.results.lock();
            slots[index] = Some(result);
        }
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if done == self.total {
            self.complete();
        }
    }

    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> BatchState {
        *self.state.lock()
    }
}

/// Handle to a blocking-mode (worker thread) batch.
pub struct BlockingBatchHandle<R> {
    shared: Arc<BlockingBatchShared<R>>,
    completions: std::sync::mpsc::Receiver<(usize, DispatchResult<R>)>,
}

impl<R> BlockingBatchHandle<R> {
    pub(super) fn new(
        shared: Arc<BlockingBatchShared<R>>,
        completions: std::sync::mpsc::Receiver<(usize, DispatchResult<R>)>,
    ) -> Self {
        Self {
            shared,
            completions,
        }
    }

    /// Number of submitted items.
    pub fn task_count(&self) -> usize {
        self.shared.total
    }

    /// Number of finished items at this instant.
    pub fn finished_count(&self) -> usize {
        self.shared.finished()
    }

    /// Current batch lifecycle state.
    pub fn state(&self) -> BatchState {
        self.shared.state()
    }

    /// Stop dispatching queued items. In-flight workers finish their current
    /// item; undispatched slots record
    /// [`crate::error::DispatchError::Cancelled`].
    pub fn cancel(&self) {
        self.shared.request_cancel();
    }

    /// Block until the batch completes, or until `timeout` elapses. Returns
    /// whether the batch is complete.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.shared.state.lock();
        match timeout {
            None => {
                while *state != BatchState::Completed {
                    self.shared.state_cv.wait(&mut state);
                }
                true
            }
            Some(limit) => {
                let deadline = std::time::Instant::now() + limit;
                while *state != BatchState::Completed {
                    if self
                        .shared
                        .state_cv
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return *state == BatchState::Completed;
                    }
                }
                true
            }
        }
    }

    /// Block until completion and return every result in input order.
    pub fn results(&self) -> Vec<DispatchResult<R>>
    where
        R: Clone,
    {
        self.wait(None);
        let slots = self.shared.results.lock();
        slots
            .iter()
            .map(|slot| {
                slot.clone()
                    .expect("completed batch has a result in every slot")
            })
            .collect()
    }

    /// Next `(index, result)` pair in completion order, `None` once every
    /// item has been yielded.
    pub fn next_result(&mut self) -> Option<(usize, DispatchResult<R>)> {
        self.completions.recv().ok()
    }
}
