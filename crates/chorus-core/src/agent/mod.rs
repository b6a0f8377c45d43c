pub mod provider;
pub mod registry;

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::message::{ConversationMode, Message};

pub use provider::{ProviderAgent, ProviderFamily};
pub use registry::{AgentRegistry, RegisteredAgent};

/// Everything a backend needs to produce one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Identifier of the agent being asked to speak.
    pub agent: String,
    /// Persona text currently assigned to the agent.
    pub role: String,
    /// Recent timeline, oldest first.
    pub history: Vec<Message>,
    pub mode: ConversationMode,
    /// Roundtable topic or consensus question, when an overlay is driving.
    pub topic: Option<String>,
}

/// A text-generation capability. Each provider backend implements this once;
/// the scheduler never sees anything more specific.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Whether the backend can be used at all. `Err` carries the reason,
    /// e.g. missing credentials. Checked once at registration.
    fn availability(&self) -> Result<(), String> {
        Ok(())
    }

    /// Produce the agent's next turn.
    async fn generate(&self, request: TurnRequest) -> Result<String, GenerationError>;
}
