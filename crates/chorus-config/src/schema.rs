use std::collections::HashSet;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Sender names the relay reserves for non-agent turns.
pub const RESERVED_SENDERS: [&str; 2] = ["Human", "System"];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    pub scheduler: SchedulerConfig,
    pub history: HistoryConfig,
    pub persistence: PersistenceConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.min_delay_ms > s.max_delay_ms {
            bail!(
                "scheduler.minDelayMs ({}) must not exceed scheduler.maxDelayMs ({})",
                s.min_delay_ms,
                s.max_delay_ms
            );
        }
        if s.response_timeout_ms == 0 {
            bail!("scheduler.responseTimeoutMs must be greater than zero");
        }
        if self.history.capacity == 0 {
            bail!("history.capacity must be greater than zero");
        }

        let mut seen = HashSet::new();
        for agent in &self.agents.roster {
            let name = agent.name.trim();
            if name.is_empty() {
                bail!("agents.roster contains an agent with an empty name");
            }
            if RESERVED_SENDERS
                .iter()
                .any(|r| r.eq_ignore_ascii_case(name))
            {
                bail!("agent name '{name}' is reserved");
            }
            if !seen.insert(name.to_lowercase()) {
                bail!("agent name '{name}' appears more than once in agents.roster");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
    /// Agents to register at startup, in registration order.
    pub roster: Vec<AgentSpec>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            defaults: AgentDefaults::default(),
            roster: vec![
                AgentSpec::new(
                    "Claude",
                    "anthropic",
                    "claude-3-5-sonnet-latest",
                    "a thoughtful philosopher who weighs every side",
                ),
                AgentSpec::new(
                    "GPT",
                    "openai",
                    "gpt-4o-mini",
                    "a pragmatic engineer who likes concrete examples",
                ),
                AgentSpec::new(
                    "Gemini",
                    "gemini",
                    "gemini-2.0-flash",
                    "a curious scientist who asks probing questions",
                ),
                AgentSpec::new(
                    "DeepSeek",
                    "deepseek",
                    "deepseek-chat",
                    "a contrarian who challenges easy consensus",
                ),
            ],
        }
    }
}

/// One participant in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub name: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

impl AgentSpec {
    pub fn new(name: &str, provider: &str, model: &str, role: &str) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            model: model.into(),
            role: role.into(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    pub temperature: f64,
    pub max_tokens: u64,
    /// Number of most recent messages handed to an agent as context.
    pub context_window: usize,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            max_tokens: 600,
            context_window: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub anthropic: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
    pub gemini: Option<ProviderConfig>,
    pub deepseek: Option<ProviderConfig>,
    pub groq: Option<ProviderConfig>,
    pub mistral: Option<ProviderConfig>,
    pub openrouter: Option<ProviderConfig>,
    pub ollama: Option<ProviderConfig>,
}

impl ProvidersConfig {
    /// Look up a provider section by its config key.
    pub fn get(&self, provider: &str) -> Option<&ProviderConfig> {
        match provider {
            "anthropic" => self.anthropic.as_ref(),
            "openai" => self.openai.as_ref(),
            "gemini" => self.gemini.as_ref(),
            "deepseek" => self.deepseek.as_ref(),
            "groq" => self.groq.as_ref(),
            "mistral" => self.mistral.as_ref(),
            "openrouter" => self.openrouter.as_ref(),
            "ollama" => self.ollama.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    pub response_timeout_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Delay before the first turn after `/resume` or `/start`.
    pub resume_delay_ms: u64,
    /// Delay after the selected agent could not be resolved.
    pub invalid_agent_delay_ms: u64,
    /// Delay after a turn opportunity found a generation already in flight.
    pub busy_delay_ms: u64,
    pub roundtable_step_ms: u64,
    pub consensus_step_ms: u64,
    /// Begin the automatic conversation without waiting for human input.
    pub auto_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 25_000,
            min_delay_ms: 8_000,
            max_delay_ms: 20_000,
            resume_delay_ms: 1_000,
            invalid_agent_delay_ms: 1_000,
            busy_delay_ms: 2_000,
            roundtable_step_ms: 2_000,
            consensus_step_ms: 1_500,
            auto_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    /// Maximum number of messages kept; older ones are evicted first.
    pub capacity: usize,
    /// Number of recent messages sent to a newly connected viewer.
    pub greeting_size: usize,
    pub max_content_chars: usize,
    /// Failure diagnostics are truncated to this many characters.
    pub diagnostic_chars: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 150,
            greeting_size: 50,
            max_content_chars: 8_000,
            diagnostic_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceConfig {
    pub path: String,
    /// Written instead of `path` when the process dies on a fault.
    pub crash_path: String,
    pub roles_path: String,
    pub idle_save_secs: u64,
    pub restore_on_start: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: "~/.chorus/conversation.json".into(),
            crash_path: "~/.chorus/conversation.crash.json".into(),
            roles_path: "~/.chorus/roles.json".into(),
            idle_save_secs: 300, // 5 minutes
            restore_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 18790,
            shutdown_grace_secs: 10,
        }
    }
}
