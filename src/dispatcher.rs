use async_trait::async_trait;

use crate::error::BoxError;

/// Business-level handling of a received message.
///
/// The pump hands every message it dequeues to exactly one `handle` call.
/// What "handled" means (completing a pending request, dead-lettering a
/// stale reply) is up to the implementation.
#[async_trait]
pub trait Dispatcher<M: Send + 'static>: Send + Sync + 'static {
    /// Handles a single message.
    ///
    /// An error is logged by the pump and does not stop it; retries and
    /// dead-lettering belong to the implementation.
    async fn handle(&self, message: M) -> Result<(), BoxError>;
}
