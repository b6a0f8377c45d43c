use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

pub const HUMAN: &str = "Human";
pub const SYSTEM: &str = "System";

/// Who authored a turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sender {
    Agent(String),
    Human,
    System,
}

impl Sender {
    pub fn name(&self) -> &str {
        match self {
            Sender::Agent(name) => name,
            Sender::Human => HUMAN,
            Sender::System => SYSTEM,
        }
    }

    pub fn kind(&self) -> SenderType {
        match self {
            Sender::Agent(_) => SenderType::Ai,
            Sender::Human => SenderType::Human,
            Sender::System => SenderType::System,
        }
    }

    /// The agent identifier, if an agent sent this.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Sender::Agent(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Ai,
    Human,
    System,
}

/// The conversational pattern a turn was generated under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    #[default]
    Normal,
    Roundtable,
    Consensus,
    Focused,
}

impl ConversationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationMode::Normal => "normal",
            ConversationMode::Roundtable => "roundtable",
            ConversationMode::Consensus => "consensus",
            ConversationMode::Focused => "focused",
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, ConversationMode::Normal)
    }
}

/// One immutable turn in the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub mode: ConversationMode,
}

impl Message {
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            created_at: Utc::now(),
            mode: ConversationMode::Normal,
        }
    }

    pub fn agent(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Sender::Agent(id.into()), content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Sender::Human, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Sender::System, content)
    }

    pub fn with_mode(mut self, mode: ConversationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Check the message is fit for the timeline.
    pub fn validate(&self, max_chars: usize) -> Result<(), RelayError> {
        if self.content.trim().is_empty() {
            return Err(RelayError::InvalidMessage("content is empty".into()));
        }
        let chars = self.content.chars().count();
        if chars > max_chars {
            return Err(RelayError::InvalidMessage(format!(
                "content is {chars} characters, limit is {max_chars}"
            )));
        }
        if let Sender::Agent(id) = &self.sender {
            if id.trim().is_empty() {
                return Err(RelayError::InvalidMessage("agent sender has no name".into()));
            }
            if id.eq_ignore_ascii_case(HUMAN) || id.eq_ignore_ascii_case(SYSTEM) {
                return Err(RelayError::InvalidMessage(format!(
                    "agent sender may not use reserved name '{id}'"
                )));
            }
        }
        Ok(())
    }

    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            sender: self.sender.name().to_string(),
            content: self.content.clone(),
            timestamp: self.created_at,
            sender_type: self.sender.kind(),
        }
    }
}

/// On-disk and on-wire shape of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sender_type: SenderType,
}

impl MessageRecord {
    pub fn into_message(self) -> Message {
        let sender = match self.sender_type {
            SenderType::Ai => Sender::Agent(self.sender),
            SenderType::Human => Sender::Human,
            SenderType::System => Sender::System,
        };
        Message {
            sender,
            content: self.content,
            created_at: self.timestamp,
            mode: ConversationMode::Normal,
        }
    }
}
