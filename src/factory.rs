//! Composition of the reply pump and ownership of everything it acquires.
//!
//! [`ResponsePumpFactory::create`] opens a receiver on the reply queue,
//! builds a [`MessagePump`] over it and records both in a
//! [`ResourceTracker`]. Disposing the factory releases them in the order they
//! were acquired. A failed `create` releases whatever it had already acquired
//! before returning the error.

use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    dispatcher::Dispatcher,
    error::{BoxError, Error, Result},
    pump::MessagePump,
    settings::PumpSettings,
    tracker::{Dispose, ResourceTracker},
    transport::{QueueManager, Receiver},
};

const STATUS_UNUSED: u8 = 0;
const STATUS_CREATING: u8 = 1;
const STATUS_CREATED: u8 = 2;
const STATUS_DISPOSED: u8 = 3;

/// Pump built by a [`ResponsePumpFactory`] over `Q`'s receivers.
pub type ResponsePump<Q, D> = MessagePump<<Q as QueueManager>::Receiver, D>;

/// Builds the reply pump and owns its resources.
///
/// Lifecycle: `Unused -> Created -> Disposed`. `create` succeeds once; a
/// failed attempt returns the factory to `Unused`. `dispose` is terminal and
/// idempotent. Dropping an undisposed factory still releases its resources,
/// but at an unspecified point; call `dispose` for deterministic teardown.
pub struct ResponsePumpFactory<Q, D> {
    queue_manager: Arc<Q>,
    dispatcher: Arc<D>,
    settings: PumpSettings,
    tracker: Mutex<ResourceTracker>,
    status: AtomicU8,
}

impl<Q, D> ResponsePumpFactory<Q, D>
where
    Q: QueueManager,
    D: Dispatcher<<Q::Receiver as Receiver>::Message>,
{
    /// Creates a factory that has not yet opened anything.
    ///
    /// No broker resources are acquired until [`create`](Self::create).
    pub fn new(queue_manager: Arc<Q>, dispatcher: Arc<D>, settings: PumpSettings) -> Self {
        Self {
            queue_manager,
            dispatcher,
            settings,
            tracker: Mutex::new(ResourceTracker::new()),
            status: AtomicU8::new(STATUS_UNUSED),
        }
    }

    /// Opens the reply receiver and builds the pump over it.
    ///
    /// The returned pump is not started. It stays owned by the factory: it is
    /// disposed, after its receiver, when the factory is disposed.
    pub fn create(&self) -> Result<Arc<ResponsePump<Q, D>>> {
        // Taken before the status moves so a concurrent dispose either sees
        // `Unused` or waits for the build to finish.
        let mut tracker = self.tracker.lock();
        if let Err(status) = self.status.compare_exchange(
            STATUS_UNUSED,
            STATUS_CREATING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(match status {
                STATUS_DISPOSED => Error::Disposed,
                _ => Error::AlreadyCreated,
            });
        }
        let mut creating = Creating {
            status: &self.status,
            armed: true,
        };

        let pump = match self.build(&mut tracker) {
            Ok(pump) => pump,
            Err(err) => {
                warn!(
                    queue = %self.settings.reply_queue_name,
                    error = %err,
                    "failed to create reply pump; releasing partial resources"
                );
                release(&mut tracker, "failed create");
                return Err(err);
            }
        };

        creating.armed = false;
        match self.status.compare_exchange(
            STATUS_CREATING,
            STATUS_CREATED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(pump),
            Err(_) => {
                // Disposed while building; the dispose is waiting on the
                // tracker lock and will find it already drained.
                release(&mut tracker, "create raced by dispose");
                Err(Error::Disposed)
            }
        }
    }

    fn build(&self, tracker: &mut ResourceTracker) -> Result<Arc<ResponsePump<Q, D>>> {
        let queue = &self.settings.reply_queue_name;

        let receiver = self
            .queue_manager
            .open_receiver(queue)
            .map_err(|source| Error::Transport {
                queue: queue.to_string(),
                source,
            })?;
        tracker.track(format!("receiver:{queue}"), Arc::clone(&receiver));
        debug!(queue = %queue, "reply receiver opened");

        let pump = Arc::new(MessagePump::new(
            receiver,
            Arc::clone(&self.dispatcher),
            &self.settings,
        )?);
        tracker.track(format!("pump:{queue}"), Arc::clone(&pump));
        debug!(queue = %queue, "reply pump created");

        Ok(pump)
    }

    /// Returns `true` once [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_DISPOSED
    }

    /// Releases every resource created by this factory, in creation order.
    ///
    /// All resources are attempted even if some fail; the failures are
    /// returned together. Later calls are no-ops.
    pub fn dispose(&self) -> Result<()> {
        if self.status.swap(STATUS_DISPOSED, Ordering::AcqRel) == STATUS_DISPOSED {
            return Ok(());
        }
        self.tracker.lock().dispose()?;
        debug!(queue = %self.settings.reply_queue_name, "reply pump factory disposed");
        Ok(())
    }
}

/// Returns the factory to `Unused` if a create does not finish, including
/// when a collaborator panics mid-build. A racing dispose has already moved
/// the status on and is left alone.
struct Creating<'a> {
    status: &'a AtomicU8,
    armed: bool,
}

impl Drop for Creating<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.status.compare_exchange(
                STATUS_CREATING,
                STATUS_UNUSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

fn release(tracker: &mut ResourceTracker, reason: &'static str) {
    if let Err(err) = tracker.dispose() {
        error!(reason, error = %err, "releasing partially created resources was incomplete");
    }
}

impl<Q, D> Dispose for ResponsePumpFactory<Q, D>
where
    Q: QueueManager,
    D: Dispatcher<<Q::Receiver as Receiver>::Message>,
{
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        ResponsePumpFactory::dispose(self).map_err(Into::into)
    }
}
