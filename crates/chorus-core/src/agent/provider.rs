use async_trait::async_trait;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, CompletionRequest, Message as RigMessage};
use rig::message::{AssistantContent, Text, UserContent};
use rig::OneOrMany;
use tracing::debug;

use crate::agent::{Agent, TurnRequest};
use crate::error::GenerationError;
use crate::message::{ConversationMode, Message, Sender};

/// Provider families differ in how strictly they police the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    Anthropic,
    OpenAi,
    Gemini,
    DeepSeek,
    Groq,
    Mistral,
    OpenRouter,
    Ollama,
}

impl ProviderFamily {
    pub fn from_provider(provider: &str) -> Option<Self> {
        match provider.to_lowercase().as_str() {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "gemini" => Some(Self::Gemini),
            "deepseek" => Some(Self::DeepSeek),
            "groq" => Some(Self::Groq),
            "mistral" => Some(Self::Mistral),
            "openrouter" => Some(Self::OpenRouter),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    /// Anthropic and Gemini reject transcripts that do not strictly
    /// alternate user/assistant starting with a user turn.
    fn requires_alternation(&self) -> bool {
        matches!(self, Self::Anthropic | Self::Gemini)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Speaker {
    User,
    Assistant,
}

/// One shaped transcript entry, before conversion to the provider's types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Generation backed by a rig completion model.
#[allow(deprecated)]
pub struct ProviderAgent {
    family: ProviderFamily,
    model_name: String,
    model: Result<CompletionModelHandle<'static>, String>,
    temperature: f64,
    max_tokens: u64,
}

#[allow(deprecated)]
impl ProviderAgent {
    pub fn new(
        family: ProviderFamily,
        model_name: &str,
        model: CompletionModelHandle<'static>,
        temperature: f64,
        max_tokens: u64,
    ) -> Self {
        Self {
            family,
            model_name: model_name.to_string(),
            model: Ok(model),
            temperature,
            max_tokens,
        }
    }

    /// A backend that could not be constructed (e.g. no API key). It will be
    /// refused at registration.
    pub fn unavailable(family: ProviderFamily, model_name: &str, reason: impl Into<String>) -> Self {
        Self {
            family,
            model_name: model_name.to_string(),
            model: Err(reason.into()),
            temperature: 0.0,
            max_tokens: 0,
        }
    }

    pub fn family(&self) -> ProviderFamily {
        self.family
    }

    fn to_rig(turns: Vec<Turn>) -> Vec<RigMessage> {
        turns
            .into_iter()
            .map(|turn| match turn.speaker {
                Speaker::User => RigMessage::User {
                    content: OneOrMany::one(UserContent::Text(Text { text: turn.text })),
                },
                Speaker::Assistant => RigMessage::Assistant {
                    id: None,
                    content: OneOrMany::one(AssistantContent::Text(Text { text: turn.text })),
                },
            })
            .collect()
    }
}

#[allow(deprecated)]
#[async_trait]
impl Agent for ProviderAgent {
    fn availability(&self) -> Result<(), String> {
        self.model.as_ref().map(|_| ()).map_err(Clone::clone)
    }

    async fn generate(&self, request: TurnRequest) -> Result<String, GenerationError> {
        let model = self
            .model
            .as_ref()
            .map_err(|reason| GenerationError::Provider(reason.clone()))?;

        let preamble = build_preamble(&request);
        let turns = shape_transcript(self.family, &request.agent, &request.history);
        debug!(
            "Generating for {} via {:?}/{}: {} turns, mode={}",
            request.agent,
            self.family,
            self.model_name,
            turns.len(),
            request.mode.as_str()
        );

        let chat_history = OneOrMany::many(Self::to_rig(turns))
            .map_err(|_| GenerationError::Malformed("empty transcript".into()))?;

        let completion = CompletionRequest {
            preamble: Some(preamble),
            chat_history,
            documents: Vec::new(),
            tools: Vec::new(),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            tool_choice: None,
            additional_params: None,
        };

        let response = model
            .completion(completion)
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        let mut saw_text = false;
        let mut text = String::new();
        for content in response.choice.iter() {
            if let AssistantContent::Text(t) = content {
                saw_text = true;
                text.push_str(&t.text);
            }
        }
        if !saw_text {
            return Err(GenerationError::Malformed(
                "response contained no text content".into(),
            ));
        }

        Ok(clean_reply(&request.agent, &text))
    }
}

/// System prompt: who the agent is, its persona, and the current mode.
pub(crate) fn build_preamble(request: &TurnRequest) -> String {
    let mut preamble = format!(
        "You are {name}, one of several AI models taking part in a live group chat \
         watched by a human audience. Other participants speak as \"[Name]: message\".\n",
        name = request.agent
    );
    if !request.role.trim().is_empty() {
        preamble.push_str(&format!("Your personality: {}.\n", request.role.trim()));
    }
    preamble.push_str(
        "Keep replies short (two to four sentences) and conversational. React to what \
         was just said. Never prefix your reply with your own name.\n",
    );

    let topic = request.topic.as_deref().unwrap_or("the current subject");
    match request.mode {
        ConversationMode::Normal => {}
        ConversationMode::Roundtable => preamble.push_str(&format!(
            "This is a structured roundtable on: \"{topic}\". It is your turn. Give your own \
             perspective, building on or contrasting with earlier speakers.\n"
        )),
        ConversationMode::Consensus => preamble.push_str(&format!(
            "The group is working toward consensus on: \"{topic}\". State your position \
             clearly in one or two sentences and note where you agree with others.\n"
        )),
        ConversationMode::Focused => preamble.push_str(
            "The human has addressed the latest question to you directly. Answer it specifically.\n",
        ),
    }
    preamble
}

/// Render the timeline from the agent's point of view.
///
/// The agent's own turns become assistant turns; everything else becomes a
/// user turn prefixed with the speaker's name. The transcript always ends on
/// a user turn so the model has something to answer.
pub(crate) fn shape_transcript(family: ProviderFamily, agent: &str, history: &[Message]) -> Vec<Turn> {
    let mut turns: Vec<Turn> = history
        .iter()
        .map(|msg| match &msg.sender {
            Sender::Agent(id) if id == agent => Turn {
                speaker: Speaker::Assistant,
                text: msg.content.clone(),
            },
            sender => Turn {
                speaker: Speaker::User,
                text: format!("[{sender}]: {}", msg.content),
            },
        })
        .collect();

    if turns.last().map(|t| t.speaker) != Some(Speaker::User) {
        turns.push(Turn {
            speaker: Speaker::User,
            text: "[System]: Continue the conversation.".into(),
        });
    }

    if family.requires_alternation() {
        turns = merge_consecutive(turns);
        if turns.first().map(|t| t.speaker) == Some(Speaker::Assistant) {
            turns.insert(
                0,
                Turn {
                    speaker: Speaker::User,
                    text: "[System]: The conversation so far follows.".into(),
                },
            );
        }
    }
    turns
}

fn merge_consecutive(turns: Vec<Turn>) -> Vec<Turn> {
    let mut merged: Vec<Turn> = Vec::with_capacity(turns.len());
    for turn in turns {
        match merged.last_mut() {
            Some(last) if last.speaker == turn.speaker => {
                last.text.push_str("\n\n");
                last.text.push_str(&turn.text);
            }
            _ => merged.push(turn),
        }
    }
    merged
}

/// Trim and strip a leading "[Name]:" or "Name:" the model echoed back.
pub(crate) fn clean_reply(agent: &str, text: &str) -> String {
    let trimmed = text.trim();
    let bracketed = format!("[{agent}]:");
    let plain = format!("{agent}:");
    for prefix in [bracketed.as_str(), plain.as_str()] {
        if trimmed.len() >= prefix.len()
            && trimmed.is_char_boundary(prefix.len())
            && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return trimmed[prefix.len()..].trim().to_string();
        }
    }
    trimmed.to_string()
}
