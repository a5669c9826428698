//! Priority transfer queue.
//!
//! A fixed pool of tokio workers drains a shared priority heap. Each work
//! item runs an [`Operation`]; failures are captured per item and the first
//! one is handed to the next caller of [`TransferQueue::join`].

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use futures::FutureExt;
use isolate_core::ItemSize;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

/// Scheduling priority. Workers pick `High` before `Medium` before `Low`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Work performed for one queued item.
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    type Key: Clone + Ord + fmt::Debug + Send + Sync + 'static;
    type Destination: Send + 'static;

    async fn run(
        &self,
        key: &Self::Key,
        destination: Self::Destination,
        size: ItemSize,
    ) -> ClientResult<()>;
}

struct Pending<K, D> {
    priority: Priority,
    seq: u64,
    key: K,
    destination: D,
    size: ItemSize,
}

// BinaryHeap is a max-heap: the "greatest" entry is the highest priority,
// then the earliest submitted.
impl<K, D> Ord for Pending<K, D> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<K, D> PartialOrd for Pending<K, D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K, D> PartialEq for Pending<K, D> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<K, D> Eq for Pending<K, D> {}

struct State<K, D> {
    heap: BinaryHeap<Pending<K, D>>,
    next_seq: u64,
    completed: Vec<K>,
    first_failure: Option<ClientError>,
    failures: usize,
}

struct Shared<O: Operation> {
    operation: O,
    state: Mutex<State<O::Key, O::Destination>>,
    /// One permit per queued item.
    ready: Semaphore,
    /// Items queued or in flight. Only modified while `state` is locked.
    outstanding: watch::Sender<usize>,
}

impl<O: Operation> Shared<O> {
    fn lock(&self) -> MutexGuard<'_, State<O::Key, O::Destination>> {
        // Never held across an await or a user callback.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, key: O::Key, result: ClientResult<()>) {
        let mut state = self.lock();
        match result {
            Ok(()) => state.completed.push(key),
            Err(error) => {
                tracing::warn!(key = ?key, error = %error, "Transfer failed");
                state.failures += 1;
                if state.first_failure.is_none() {
                    state.first_failure = Some(error);
                }
            }
        }
        // Updated under the state lock so the count never lags the heap.
        self.outstanding.send_modify(|n| *n -= 1);
    }
}

/// Bounded pool of workers executing an [`Operation`] per queued item.
pub struct TransferQueue<O: Operation> {
    shared: Arc<Shared<O>>,
    workers: Vec<JoinHandle<()>>,
}

impl<O: Operation> TransferQueue<O> {
    /// Spawn `workers` tasks on the current tokio runtime.
    pub fn new(operation: O, workers: usize) -> Self {
        let (outstanding, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            operation,
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                next_seq: 0,
                completed: Vec::new(),
                first_failure: None,
                failures: 0,
            }),
            ready: Semaphore::new(0),
            outstanding,
        });

        let workers = (0..workers.max(1))
            .map(|_| tokio::spawn(worker_loop(Arc::clone(&shared))))
            .collect();

        Self { shared, workers }
    }

    pub fn operation(&self) -> &O {
        &self.shared.operation
    }

    /// Queue an item. Returns immediately.
    pub fn add_item(
        &self,
        priority: Priority,
        key: O::Key,
        destination: O::Destination,
        size: ItemSize,
    ) {
        {
            let mut state = self.shared.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Pending {
                priority,
                seq,
                key,
                destination,
                size,
            });
            self.shared.outstanding.send_modify(|n| *n += 1);
        }
        self.shared.ready.add_permits(1);
    }

    /// Items queued or in flight.
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Wait until every queued item has finished.
    ///
    /// Returns the keys completed since the previous call, sorted. If any
    /// item failed since then, the first failure is returned instead; the
    /// completed keys are drained either way.
    pub async fn join(&self) -> ClientResult<Vec<O::Key>> {
        let mut outstanding = self.shared.outstanding.subscribe();
        // The sender lives in `shared`, so this only ends at zero.
        let _ = outstanding.wait_for(|n| *n == 0).await;

        let mut state = self.shared.lock();
        let mut completed = std::mem::take(&mut state.completed);
        let failures = std::mem::take(&mut state.failures);
        if let Some(error) = state.first_failure.take() {
            tracing::debug!(
                failures,
                completed = completed.len(),
                "Transfers finished with failures"
            );
            return Err(error);
        }
        completed.sort();
        Ok(completed)
    }
}

impl<O: Operation> Drop for TransferQueue<O> {
    fn drop(&mut self) {
        self.shared.ready.close();
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop<O: Operation>(shared: Arc<Shared<O>>) {
    loop {
        let Ok(permit) = shared.ready.acquire().await else {
            return;
        };
        permit.forget();

        let next = shared.lock().heap.pop();
        let Some(Pending {
            key,
            destination,
            size,
            ..
        }) = next
        else {
            continue;
        };

        let outcome = AssertUnwindSafe(shared.operation.run(&key, destination, size))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(ClientError::WorkerPanic(panic_message(&*panic))),
        };
        shared.finish(key, result);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
