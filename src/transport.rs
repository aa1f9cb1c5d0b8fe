use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::BoxError, settings::QueueName, tracker::Dispose};

/// Broker-side connection able to open receivers on named queues.
///
/// The queue manager owns the actual broker session. It is shared by every
/// receiver it opens and outlives them; the receivers themselves are released
/// through [`Dispose`].
///
/// Common backends include Azure Service Bus, AMQP brokers and SQS.
pub trait QueueManager: Send + Sync {
    type Receiver: Receiver;

    /// Opens a receiver bound to `queue`.
    ///
    /// Fails if the broker cannot be reached or the queue cannot be created.
    fn open_receiver(&self, queue: &QueueName) -> Result<Arc<Self::Receiver>, BoxError>;
}

/// Pulls raw messages from a single queue.
#[async_trait]
pub trait Receiver: Dispose + 'static {
    type Message: Send + 'static;

    /// Receives up to `batch_size` messages.
    ///
    /// An empty batch means nothing arrived within the transport's own
    /// receive window. An error is transient from the pump's point of view:
    /// it is logged and the receive is retried.
    async fn receive(&self, batch_size: usize) -> Result<Vec<Self::Message>, BoxError>;
}
