use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::Agent;
use crate::error::RelayError;

/// An agent admitted to the conversation.
#[derive(Clone)]
pub struct RegisteredAgent {
    pub id: String,
    pub role: String,
    pub backend: Arc<dyn Agent>,
}

/// Named handles to generation backends, in registration order.
///
/// Only available backends are admitted. Identity is fixed for the process
/// lifetime; role text may change.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<RegisteredAgent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an agent if its backend reports itself available. Otherwise
    /// nothing changes and `AgentUnavailable` is returned as a diagnostic.
    pub fn register(
        &mut self,
        id: &str,
        role: &str,
        backend: Arc<dyn Agent>,
    ) -> Result<(), RelayError> {
        if let Err(reason) = backend.availability() {
            warn!("Agent '{id}' unavailable, not registering: {reason}");
            return Err(RelayError::AgentUnavailable {
                agent: id.to_string(),
                reason,
            });
        }
        if self.resolve(id).is_some() {
            warn!("Agent '{id}' already registered, ignoring duplicate");
            return Err(RelayError::AgentUnavailable {
                agent: id.to_string(),
                reason: "an agent with this name is already registered".into(),
            });
        }
        info!("Registered agent: {id}");
        self.agents.push(RegisteredAgent {
            id: id.to_string(),
            role: role.to_string(),
            backend,
        });
        Ok(())
    }

    /// Look up an agent by identifier (case-insensitive).
    pub fn get(&self, id: &str) -> Result<&RegisteredAgent, RelayError> {
        self.agents
            .iter()
            .find(|a| a.id.eq_ignore_ascii_case(id))
            .ok_or_else(|| RelayError::UnknownAgent(id.to_string()))
    }

    /// Canonical identifier for a user-typed name.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.get(name).ok().map(|a| a.id.as_str())
    }

    /// Registered identifiers in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id.clone()).collect()
    }

    pub fn set_role(&mut self, id: &str, role: &str) -> Result<(), RelayError> {
        let agent = self
            .agents
            .iter_mut()
            .find(|a| a.id.eq_ignore_ascii_case(id))
            .ok_or_else(|| RelayError::UnknownAgent(id.to_string()))?;
        agent.role = role.to_string();
        Ok(())
    }

    /// (identifier, role) pairs in registration order.
    pub fn roles(&self) -> Vec<(String, String)> {
        self.agents
            .iter()
            .map(|a| (a.id.clone(), a.role.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
