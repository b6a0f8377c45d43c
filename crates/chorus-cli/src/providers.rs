use std::sync::Arc;

use anyhow::Result;
use chorus_config::{AgentSpec, Config, ProviderConfig};
use chorus_core::agent::{ProviderAgent, ProviderFamily};
use chorus_core::AgentRegistry;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::{CompletionClient, Nothing};
use rig::providers::{anthropic, deepseek, gemini, groq, mistral, ollama, openai, openrouter};
use tracing::{info, warn};

const VALID_PROVIDERS: &str =
    "anthropic, openai, gemini, deepseek, groq, mistral, openrouter, ollama";

/// Environment variable consulted when the config carries no API key.
pub(crate) fn env_var_for(family: ProviderFamily) -> Option<&'static str> {
    match family {
        ProviderFamily::Anthropic => Some("ANTHROPIC_API_KEY"),
        ProviderFamily::OpenAi => Some("OPENAI_API_KEY"),
        ProviderFamily::Gemini => Some("GEMINI_API_KEY"),
        ProviderFamily::DeepSeek => Some("DEEPSEEK_API_KEY"),
        ProviderFamily::Groq => Some("GROQ_API_KEY"),
        ProviderFamily::Mistral => Some("MISTRAL_API_KEY"),
        ProviderFamily::OpenRouter => Some("OPENROUTER_API_KEY"),
        ProviderFamily::Ollama => None,
    }
}

/// Resolve an API key from config, falling back to an environment variable.
pub(crate) fn resolve_api_key(provider_cfg: Option<&ProviderConfig>, env_var: &str) -> Option<String> {
    provider_cfg
        .and_then(|c| c.api_key.clone())
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.is_empty()))
}

fn api_base(provider_cfg: Option<&ProviderConfig>) -> Option<String> {
    provider_cfg
        .and_then(|c| c.api_base.clone())
        .filter(|b| !b.is_empty())
}

/// Create a completion model for one roster entry. Errors say what is
/// missing so the agent can be reported as unavailable.
#[allow(deprecated)]
fn create_model_for(
    family: ProviderFamily,
    provider: &str,
    model_name: &str,
    provider_cfg: Option<&ProviderConfig>,
) -> Result<CompletionModelHandle<'static>> {
    if model_name.is_empty() {
        anyhow::bail!("no model configured for provider '{provider}'");
    }

    let require_key = || {
        let env_var = env_var_for(family).unwrap_or_default();
        resolve_api_key(provider_cfg, env_var).ok_or_else(|| {
            anyhow::anyhow!(
                "no API key found. Set providers.{provider}.apiKey in config.json or {env_var} env var"
            )
        })
    };

    match family {
        ProviderFamily::Anthropic => {
            let key = require_key()?;
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&key)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Anthropic client: {e}"))?;
            let model = client.completion_model(model_name);
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        ProviderFamily::OpenAi => {
            let key = require_key()?;
            let mut builder = openai::CompletionsClient::builder().api_key(&key);
            if let Some(ref base) = api_base(provider_cfg) {
                builder = builder.base_url(base);
                info!("Using OpenAI provider with custom base: {base}");
            }
            let client: openai::CompletionsClient = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create OpenAI client: {e}"))?;
            let model = client.completion_model(model_name);
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        ProviderFamily::Ollama => {
            let mut builder = ollama::Client::builder().api_key(Nothing);
            if let Some(ref base) = api_base(provider_cfg) {
                builder = builder.base_url(base);
            }
            let client: ollama::Client = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Ollama client: {e}"))?;
            let model = client.completion_model(model_name);
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        ProviderFamily::OpenRouter => {
            let key = require_key()?;
            let client: openrouter::Client = openrouter::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create OpenRouter client: {e}"))?;
            let model = client.completion_model(model_name);
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        ProviderFamily::DeepSeek => {
            let key = require_key()?;
            let client: deepseek::Client = deepseek::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create DeepSeek client: {e}"))?;
            let model = client.completion_model(model_name);
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        ProviderFamily::Groq => {
            let key = require_key()?;
            let client: groq::Client = groq::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create Groq client: {e}"))?;
            let model = client.completion_model(model_name);
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        ProviderFamily::Gemini => {
            let key = require_key()?;
            let client: gemini::Client = gemini::Client::new(key)
                .map_err(|e| anyhow::anyhow!("Failed to create Gemini client: {e}"))?;
            let model = client.completion_model(model_name);
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        ProviderFamily::Mistral => {
            let key = require_key()?;
            let client: mistral::Client = mistral::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create Mistral client: {e}"))?;
            let model = client.completion_model(model_name);
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }
    }
}

/// Build the backend for a roster entry. A provider that cannot be set up
/// yields an unavailable agent rather than an error; only an unknown
/// provider name is rejected outright.
pub fn build_agent(spec: &AgentSpec, config: &Config) -> Result<ProviderAgent> {
    let family = ProviderFamily::from_provider(&spec.provider).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown provider '{}' for agent '{}'. Valid providers: {VALID_PROVIDERS}",
            spec.provider,
            spec.name
        )
    })?;
    let defaults = &config.agents.defaults;
    let provider_cfg = config.providers.get(&spec.provider.to_lowercase());

    Ok(
        match create_model_for(family, &spec.provider, &spec.model, provider_cfg) {
            Ok(handle) => {
                info!(
                    "Agent '{}' using {} model '{}'",
                    spec.name, spec.provider, spec.model
                );
                ProviderAgent::new(
                    family,
                    &spec.model,
                    handle,
                    spec.temperature.unwrap_or(defaults.temperature),
                    spec.max_tokens.unwrap_or(defaults.max_tokens),
                )
            }
            Err(e) => ProviderAgent::unavailable(family, &spec.model, e.to_string()),
        },
    )
}

/// Register every roster entry whose backend is usable, in roster order.
pub fn build_registry(config: &Config) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for spec in &config.agents.roster {
        let agent = match build_agent(spec, config) {
            Ok(agent) => agent,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        // Refusals are logged by the registry.
        let _ = registry.register(&spec.name, &spec.role, Arc::new(agent));
    }
    if registry.is_empty() {
        warn!("No agents available. Configure provider API keys to let agents speak.");
    } else {
        info!("Agents ready: {}", registry.ids().join(", "));
    }
    registry
}
