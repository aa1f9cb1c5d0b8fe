//! Errors surfaced by the buffer, the pump and the pump factory.
//!
//! Waiting for work is not an error: an empty poll is reported as `None` by
//! [`HandoffBuffer`](crate::HandoffBuffer) and never reaches this module.

use thiserror::Error;

use crate::tracker::DisposeError;

/// Boxed failure reported by an external collaborator (transport, dispatcher).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type used throughout the crate, defaulting to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong composing, running or disposing a pump.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport could not open a receiver for the queue.
    #[error("failed to open receiver for queue `{queue}`")]
    Transport {
        queue: String,
        #[source]
        source: BoxError,
    },

    /// A pump was configured to receive zero messages per batch.
    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    /// A queue name failed validation.
    #[error("invalid queue name `{name}`: {reason}")]
    InvalidQueueName { name: String, reason: &'static str },

    /// The factory builds exactly one pump over its lifetime.
    #[error("pump has already been created by this factory")]
    AlreadyCreated,

    /// The buffer, pump or factory was used after `dispose`.
    #[error("resource has been disposed")]
    Disposed,

    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime is available to start the pump")]
    NoRuntime,

    /// One or more resources failed to release; all were attempted.
    #[error(transparent)]
    Dispose(#[from] DisposeError),

    /// Settings could not be parsed.
    #[error("invalid pump settings: {0}")]
    Settings(#[from] toml::de::Error),
}
