use dashmap::DashSet;

/// Tracks which agents are currently composing a turn.
#[derive(Default)]
pub struct Presence {
    typing: DashSet<String>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an agent as typing. Returns true if this changed the state.
    pub fn start(&self, agent: &str) -> bool {
        self.typing.insert(agent.to_string())
    }

    /// Mark an agent as done. Returns true if this changed the state.
    pub fn finish(&self, agent: &str) -> bool {
        self.typing.remove(agent).is_some()
    }

    /// Clear every indicator. Returns true if any were set.
    pub fn clear(&self) -> bool {
        let had_any = !self.typing.is_empty();
        self.typing.clear();
        had_any
    }

    /// Currently typing agents, sorted for stable output.
    pub fn typing(&self) -> Vec<String> {
        let mut agents: Vec<String> = self.typing.iter().map(|a| a.key().clone()).collect();
        agents.sort();
        agents
    }
}
