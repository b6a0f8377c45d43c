use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use chorus_core::InboundMessage;

/// A transport that viewers connect through.
///
/// Outbound delivery goes through the relay's broadcaster; a channel only
/// owns its listener and feeds human input back to the relay.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name (e.g. "web").
    fn name(&self) -> &str;

    /// Start accepting viewers. Input is sent through `inbound_tx`.
    async fn start(&self, inbound_tx: mpsc::Sender<InboundMessage>) -> Result<()>;

    /// Stop accepting viewers and drop existing connections.
    async fn stop(&self) -> Result<()>;
}
