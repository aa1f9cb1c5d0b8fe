//! Message pump: moves messages from a receiver to a dispatcher.
//!
//! A running pump owns two tasks joined by a [`HandoffBuffer`]. The receive
//! loop pulls batches from the transport and enqueues each message; the
//! dispatch loop polls the buffer and hands each message to the dispatcher.
//! Polling with a timeout lets the dispatch loop notice shutdown even when
//! no traffic arrives.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    dispatcher::Dispatcher,
    error::{BoxError, Error, Result},
    handoff::HandoffBuffer,
    settings::{PumpSettings, QueueName},
    tracker::Dispose,
    transport::Receiver,
};

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// A receiver and a dispatcher joined by a hand-off buffer.
///
/// The pump does not dispose its receiver; whoever opened the receiver is
/// responsible for releasing it after the pump.
pub struct MessagePump<R: Receiver, D> {
    queue: QueueName,
    receiver: Arc<R>,
    dispatcher: Arc<D>,
    buffer: Arc<HandoffBuffer<R::Message>>,
    batch_size: usize,
    poll_interval: Duration,
    running: Mutex<Option<Running>>,
    disposed: AtomicBool,
}

impl<R, D> MessagePump<R, D>
where
    R: Receiver,
    D: Dispatcher<R::Message>,
{
    /// Builds a stopped pump over `receiver` and `dispatcher`.
    ///
    /// Queue name, batch size and poll interval come from `settings`. Fails
    /// with [`Error::InvalidBatchSize`] if the batch size is zero.
    pub fn new(receiver: Arc<R>, dispatcher: Arc<D>, settings: &PumpSettings) -> Result<Self> {
        if settings.default_batch_size == 0 {
            return Err(Error::InvalidBatchSize);
        }

        Ok(Self {
            queue: settings.reply_queue_name.clone(),
            receiver,
            dispatcher,
            buffer: Arc::new(HandoffBuffer::new()),
            batch_size: settings.default_batch_size,
            poll_interval: settings.poll_interval,
            running: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    /// Spawns the receive and dispatch loops on the current tokio runtime.
    ///
    /// Starting a pump that is already running is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        if running.is_some() {
            return Ok(());
        }
        let handle = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let cancel = CancellationToken::new();
        let receive = handle.spawn(receive_loop(
            self.queue.clone(),
            Arc::clone(&self.receiver),
            Arc::clone(&self.buffer),
            self.batch_size,
            self.poll_interval,
            cancel.clone(),
        ));
        let dispatch = handle.spawn(dispatch_loop(
            self.queue.clone(),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.buffer),
            self.poll_interval,
            cancel.clone(),
        ));
        *running = Some(Running {
            cancel,
            tasks: vec![receive, dispatch],
        });

        info!(queue = %self.queue, batch_size = self.batch_size, "message pump started");
        Ok(())
    }

    /// Signals both loops to exit. Messages already buffered stay queued and
    /// are dispatched if the pump is started again.
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.cancel.cancel();
            info!(queue = %self.queue, "message pump stopped");
        }
    }

    /// Returns `true` between [`start`](Self::start) and
    /// [`stop`](Self::stop) or disposal.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Messages received but not yet dispatched.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Queue this pump receives from.
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }
}

impl<R, D> Dispose for MessagePump<R, D>
where
    R: Receiver,
    D: Dispatcher<R::Message>,
{
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(running) = self.running.lock().take() {
            running.cancel.cancel();
            for task in running.tasks {
                task.abort();
            }
        }
        self.buffer.dispose();
        debug!(queue = %self.queue, "message pump disposed");
        Ok(())
    }
}

impl<R: Receiver, D> fmt::Debug for MessagePump<R, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePump")
            .field("queue", &self.queue)
            .field("batch_size", &self.batch_size)
            .field("running", &self.running.lock().is_some())
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

async fn receive_loop<R: Receiver>(
    queue: QueueName,
    receiver: Arc<R>,
    buffer: Arc<HandoffBuffer<R::Message>>,
    batch_size: usize,
    retry_after: Duration,
    cancel: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            batch = receiver.receive(batch_size) => batch,
        };

        let messages = match batch {
            Ok(messages) => messages,
            Err(error) => {
                warn!(queue = %queue, %error, "receive failed; retrying");
                Vec::new()
            }
        };
        if messages.is_empty() {
            // Nothing arrived; back off so a transport that returns at once
            // does not spin.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(retry_after) => {}
            }
            continue;
        }

        debug!(queue = %queue, count = messages.len(), "received batch");
        for message in messages {
            if buffer.add(message).is_err() {
                return;
            }
        }
    }
    debug!(queue = %queue, "receive loop exited");
}

async fn dispatch_loop<M, D>(
    queue: QueueName,
    dispatcher: Arc<D>,
    buffer: Arc<HandoffBuffer<M>>,
    poll_interval: Duration,
    cancel: CancellationToken,
) where
    M: Send + 'static,
    D: Dispatcher<M>,
{
    while !cancel.is_cancelled() && !buffer.is_disposed() {
        // None is an empty poll; go round and re-check for shutdown.
        let Some(message) = buffer.try_take(poll_interval, &cancel).await else {
            continue;
        };
        if let Err(error) = dispatcher.handle(message).await {
            warn!(queue = %queue, %error, "dispatcher failed to handle message");
        }
    }
    debug!(queue = %queue, "dispatch loop exited");
}
