//! Seam between the session and whatever consumes its capabilities.

use async_trait::async_trait;

use crate::capability::CapabilitySet;
use crate::error::EngineError;

/// Turns one work item into a textual answer, optionally invoking the
/// session's capability proxies along the way.
///
/// Implementations must tolerate being called concurrently: every work item
/// runs in its own task.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Produces the reply text for `input`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when no answer could be produced. The message
    /// is relayed to the peer verbatim.
    async fn respond(&self, tools: &CapabilitySet, input: &str) -> Result<String, EngineError>;
}

#[async_trait]
impl<T> ReasoningEngine for std::sync::Arc<T>
where
    T: ReasoningEngine + ?Sized,
{
    async fn respond(&self, tools: &CapabilitySet, input: &str) -> Result<String, EngineError> {
        self.as_ref().respond(tools, input).await
    }
}
