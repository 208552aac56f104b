//! Mutual exclusion between workspace writes and reads.
//!
//! Write actions (whole-workspace builds and updates) run strictly one at a
//! time, in enqueue order. Read actions (hover, completion, any query that
//! only observes document state) run after the write queue drains, all
//! pending reads together as one concurrent batch. Queuing a new write
//! cancels the token of the previously queued one, so superseded rebuilds
//! abandon themselves at their next checkpoint instead of running to
//! completion for nothing.
//!
//! Actions are always dispatched on a fresh scheduler turn, never inline
//! with their enqueue call, which keeps enqueueing re-entrancy free and is
//! what allows a burst of reads to coalesce into one batch.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Scheduling class for read actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPriority {
    /// Queue behind pending writes and join the next read batch.
    Normal,
    /// Run on the next scheduler turn without queueing. The action still
    /// counts as in-flight, so no new batch starts until it finishes; this
    /// is best-effort low latency, not a real-time guarantee.
    Immediate,
}

type QueuedRun = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

struct QueuedAction {
    run: QueuedRun,
    token: CancellationToken,
}

struct LockState {
    write_queue: VecDeque<QueuedAction>,
    read_queue: VecDeque<QueuedAction>,
    in_flight: usize,
    /// Token of the most recently *enqueued* write, which is the one
    /// `cancel_write` and the next `write` call cancel.
    last_write_token: CancellationToken,
}

struct LockInner {
    state: Mutex<LockState>,
}

impl LockInner {
    /// Core scheduling rule: while anything is in flight, wait; otherwise
    /// run exactly one write alone, or drain the entire read queue as one
    /// concurrent batch.
    fn perform_next(inner: &Arc<LockInner>) {
        let batch = {
            let mut state = inner.state.lock();
            if state.in_flight > 0 {
                return;
            }
            let entries: Vec<QueuedAction> = if let Some(write) = state.write_queue.pop_front() {
                vec![write]
            } else if !state.read_queue.is_empty() {
                state.read_queue.drain(..).collect()
            } else {
                return;
            };
            state.in_flight += entries.len();
            entries
        };
        tracing::trace!(actions = batch.len(), "dispatching workspace actions");
        for entry in batch {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                (entry.run)(entry.token).await;
                LockInner::finish_one(&inner);
            });
        }
    }

    fn finish_one(inner: &Arc<LockInner>) {
        inner.state.lock().in_flight -= 1;
        LockInner::perform_next(inner);
    }
}

/// The workspace scheduler. Cheap to clone; all clones share one queue.
///
/// Requires a tokio runtime: actions are dispatched with `tokio::spawn`.
#[derive(Clone)]
pub struct WorkspaceLock {
    inner: Arc<LockInner>,
}

impl WorkspaceLock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LockInner {
                state: Mutex::new(LockState {
                    write_queue: VecDeque::new(),
                    read_queue: VecDeque::new(),
                    in_flight: 0,
                    last_write_token: CancellationToken::new(),
                }),
            }),
        }
    }

    /// Enqueue a mutating action. Cancels the previously queued write
    /// first, whether or not it has started.
    ///
    /// The returned future settles when the action completes. Cancellation
    /// is quiet: an action that exits with [`EngineError::Cancelled`]
    /// resolves its waiter with `Ok(())`. Any other failure is delivered to
    /// this waiter alone.
    pub fn write<F, Fut>(&self, action: F) -> impl Future<Output = Result<(), EngineError>>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            state.last_write_token.cancel();
            let token = CancellationToken::new();
            state.last_write_token = token.clone();
            let run: QueuedRun = Box::new(move |token| {
                Box::pin(async move {
                    let outcome = match action(token).await {
                        Err(EngineError::Cancelled) => Ok(()),
                        other => other,
                    };
                    let _ = result_tx.send(outcome);
                })
            });
            state.write_queue.push_back(QueuedAction { run, token });
        }
        self.schedule();
        async move { result_rx.await.unwrap_or(Err(EngineError::Shutdown)) }
    }

    /// Enqueue a read-only action. Normal-priority reads wait for queued
    /// writes and then run batched with every other pending read; immediate
    /// reads start on the next scheduler turn regardless of the queues.
    pub fn read<T, F, Fut>(
        &self,
        action: F,
        priority: ReadPriority,
    ) -> impl Future<Output = Result<T, EngineError>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        match priority {
            ReadPriority::Immediate => {
                // Counts as in-flight from the start so the scheduler will
                // not open a new batch underneath it.
                self.inner.state.lock().in_flight += 1;
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let _ = result_tx.send(action().await);
                    LockInner::finish_one(&inner);
                });
            }
            ReadPriority::Normal => {
                let run: QueuedRun = Box::new(move |_token| {
                    Box::pin(async move {
                        let _ = result_tx.send(action().await);
                    })
                });
                self.inner.state.lock().read_queue.push_back(QueuedAction {
                    run,
                    // Reads are not cancellable; the token slot is unused.
                    token: CancellationToken::new(),
                });
                self.schedule();
            }
        }
        async move { result_rx.await.unwrap_or(Err(EngineError::Shutdown)) }
    }

    /// Cancel the most recently enqueued write action, started or not.
    pub fn cancel_write(&self) {
        self.inner.state.lock().last_write_token.cancel();
    }

    fn schedule(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            LockInner::perform_next(&inner);
        });
    }
}

impl Default for WorkspaceLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation checkpoint: yields to the scheduler, then
/// reports whether the surrounding action has been superseded. The build
/// loop calls this at every phase boundary; collaborators with long phases
/// may call it too.
pub async fn checkpoint(token: &CancellationToken) -> Result<(), EngineError> {
    tokio::task::yield_now().await;
    if token.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    Ok(())
}
