//! Unbounded FIFO hand-off between producer and consumer tasks.
//!
//! Items live in a queue guarded by a short-lived lock; availability is
//! tracked by a semaphore holding exactly one permit per queued item. A
//! producer pushes and then adds a permit, so a consumer that wins a permit
//! always finds an item waiting. A consumer whose wait is cancelled or times
//! out never held a permit, which keeps the count exact for the next waiter.

use std::{collections::VecDeque, fmt, time::Duration};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Async hand-off buffer with cancellable, timeout-bounded takes.
///
/// `add` never blocks and can be called from synchronous code. `take` and
/// `try_take` suspend the calling task until an item arrives, the timeout
/// elapses or the token is cancelled. An empty poll is `None`, not an error.
pub struct HandoffBuffer<T> {
    items: Mutex<VecDeque<T>>,
    available: Semaphore,
}

impl<T> HandoffBuffer<T> {
    /// Creates an empty buffer with no waiters.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
        }
    }

    /// Enqueues an item and wakes one waiting consumer.
    ///
    /// Fails with [`Error::Disposed`] once the buffer has been disposed; the
    /// item is dropped.
    pub fn add(&self, item: T) -> Result<()> {
        // Closure is checked under the queue lock so a concurrent dispose
        // either sees this item and clears it, or this add sees the closure.
        let mut items = self.items.lock();
        if self.available.is_closed() {
            return Err(Error::Disposed);
        }
        items.push_back(item);
        self.available.add_permits(1);
        Ok(())
    }

    /// Waits up to `timeout` for an item.
    ///
    /// Returns `None` if the timeout elapses, `cancel` fires or the buffer is
    /// disposed first. `Duration::MAX` waits without a timer.
    pub async fn try_take(&self, timeout: Duration, cancel: &CancellationToken) -> Option<T> {
        if timeout == Duration::MAX {
            return self.take(cancel).await;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = self.next() => item,
            _ = tokio::time::sleep(timeout) => None,
        }
    }

    /// Waits for an item with no timeout.
    ///
    /// Returns `None` only if `cancel` fires or the buffer is disposed.
    pub async fn take(&self, cancel: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = self.next() => item,
        }
    }

    async fn next(&self) -> Option<T> {
        // Dropping the acquire future before it resolves leaves the permit
        // count untouched.
        let permit = self.available.acquire().await.ok()?;
        permit.forget();
        self.items.lock().pop_front()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns `true` if no items are queued. Waiters may still be parked.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Closes the buffer, releasing every waiter with `None` and dropping
    /// any items still queued. Safe to call more than once.
    pub fn dispose(&self) {
        let mut items = self.items.lock();
        self.available.close();
        items.clear();
    }

    /// Returns `true` once [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.available.is_closed()
    }
}

impl<T> Default for HandoffBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HandoffBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffBuffer")
            .field("len", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
