use serde::{Deserialize, Serialize};

use crate::message::{ConversationMode, Message, MessageRecord};

/// Human input received from a viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub viewer_id: String,
    pub content: String,
    pub timestamp: String,
}

/// A message as shown to viewers: the persisted record plus the mode it was
/// generated under.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageView {
    #[serde(flatten)]
    pub record: MessageRecord,
    #[serde(skip_serializing_if = "ConversationMode::is_normal")]
    pub mode: ConversationMode,
}

impl From<&Message> for MessageView {
    fn from(msg: &Message) -> Self {
        Self {
            record: msg.to_record(),
            mode: msg.mode,
        }
    }
}

/// Events pushed to viewers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelayEvent {
    NewMessage {
        message: MessageView,
    },
    TypingStatus {
        agents: Vec<String>,
    },
    History {
        messages: Vec<MessageView>,
        typing: Vec<String>,
    },
    Notice {
        content: String,
    },
    Error {
        content: String,
    },
}

impl RelayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::NewMessage { .. } => "newMessage",
            RelayEvent::TypingStatus { .. } => "typingStatus",
            RelayEvent::History { .. } => "history",
            RelayEvent::Notice { .. } => "notice",
            RelayEvent::Error { .. } => "error",
        }
    }
}

/// Fan-out to connected viewers. Implementations must not block: delivery is
/// fire-and-forget and a slow or gone viewer is the transport's problem.
pub trait Broadcaster: Send + Sync {
    /// Deliver to every connected viewer.
    fn broadcast(&self, event: &RelayEvent);

    /// Deliver to a single viewer.
    fn send_to(&self, viewer_id: &str, event: &RelayEvent);
}

/// Broadcaster that drops everything. Used when no transport is attached.
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn broadcast(&self, _event: &RelayEvent) {}

    fn send_to(&self, _viewer_id: &str, _event: &RelayEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_wire_shape() {
        let msg = Message::agent("Gemini", "hi").with_mode(ConversationMode::Roundtable);
        let event = RelayEvent::NewMessage {
            message: MessageView::from(&msg),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "newMessage");
        assert_eq!(json["message"]["sender"], "Gemini");
        assert_eq!(json["message"]["senderType"], "ai");
        assert_eq!(json["message"]["mode"], "roundtable");
        assert_eq!(event.name(), "newMessage");
    }

    #[test]
    fn test_normal_mode_omitted_on_wire() {
        let view = MessageView::from(&Message::human("hello"));
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("mode"));
    }

    #[test]
    fn test_typing_status_wire_shape() {
        let event = RelayEvent::TypingStatus {
            agents: vec!["Claude".into()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"typingStatus\""));
        assert!(json.contains("\"agents\":[\"Claude\"]"));
    }
}
