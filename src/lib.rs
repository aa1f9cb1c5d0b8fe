//! Plumbing for message pumps.
//!
//! [`HandoffBuffer`] passes received messages from the transport task to the
//! dispatch task with cancellable, timeout-bounded waits.
//! [`ResponsePumpFactory`] composes a receiver and a [`MessagePump`] and
//! releases both, in order, exactly once.

pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod handoff;
pub mod pump;
pub mod settings;
pub mod tracker;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use error::{BoxError, Error, Result};
pub use factory::{ResponsePump, ResponsePumpFactory};
pub use handoff::HandoffBuffer;
pub use pump::MessagePump;
pub use settings::{PumpSettings, QueueName};
pub use tracker::{Dispose, DisposeError, DisposeFailure, ResourceTracker};
pub use transport::{QueueManager, Receiver};
