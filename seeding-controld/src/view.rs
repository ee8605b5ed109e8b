use anyhow::Result;
use async_trait::async_trait;
use shared::types::ViewState;

/// Pushes the rendered view to every registered channel, editing the
/// channel's current message in place once it exists.
#[async_trait]
pub trait ViewPublisher: Send + Sync {
    async fn publish(&self, view: &ViewState) -> Result<()>;
}

/// The reply path back to whoever pressed a control.
#[async_trait]
pub trait CommandReply: Send + Sync {
    /// Placeholder acknowledgment; must go out before any slow work.
    async fn acknowledge(&self) -> Result<()>;

    /// Deliver the final result text, replacing the placeholder if one
    /// went out.
    async fn finish(&self, content: &str) -> Result<()>;

    /// Where the command came from, for logging
    fn origin(&self) -> &str;
}
