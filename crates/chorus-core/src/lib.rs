pub mod agent;
pub mod command;
pub mod error;
pub mod events;
pub mod message;
pub mod modes;
pub mod persist;
pub mod presence;
pub mod relay;
pub mod roles;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export key types
pub use agent::{Agent, AgentRegistry, TurnRequest};
pub use error::{GenerationError, RelayError};
pub use events::{Broadcaster, InboundMessage, RelayEvent};
pub use message::{ConversationMode, Message, MessageRecord, Sender};
pub use modes::Overlay;
pub use persist::SnapshotPersister;
pub use relay::{Relay, RelayBuilder, RelaySettings, RelayStatus};
pub use roles::RoleStore;
pub use scheduler::{SchedulerPhase, TurnOutcome};
pub use store::MessageStore;
