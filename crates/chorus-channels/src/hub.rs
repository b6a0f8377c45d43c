use axum::extract::ws::Message;
use chorus_core::{Broadcaster, RelayEvent};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(crate) type ViewerSender = mpsc::UnboundedSender<Message>;

/// Connected viewers, keyed by connection id. Each entry feeds that
/// connection's write loop, so delivery never waits on a socket.
#[derive(Default)]
pub struct ViewerHub {
    viewers: DashMap<String, ViewerSender>,
}

impl ViewerHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, viewer_id: &str, tx: ViewerSender) {
        self.viewers.insert(viewer_id.to_string(), tx);
    }

    pub(crate) fn remove(&self, viewer_id: &str) {
        self.viewers.remove(viewer_id);
    }

    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }

    pub fn clear(&self) {
        self.viewers.clear();
    }

    fn encode(event: &RelayEvent) -> Option<Message> {
        match serde_json::to_string(event) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                warn!("Failed to encode {} event: {e}", event.name());
                None
            }
        }
    }
}

impl Broadcaster for ViewerHub {
    fn broadcast(&self, event: &RelayEvent) {
        if self.viewers.is_empty() {
            return;
        }
        let Some(frame) = Self::encode(event) else {
            return;
        };
        let mut gone = Vec::new();
        for entry in self.viewers.iter() {
            if entry.value().send(frame.clone()).is_err() {
                gone.push(entry.key().clone());
            }
        }
        // Removing while iterating would deadlock the shard.
        for viewer_id in gone {
            debug!("Dropping closed viewer conn={viewer_id}");
            self.viewers.remove(&viewer_id);
        }
    }

    fn send_to(&self, viewer_id: &str, event: &RelayEvent) {
        let Some(frame) = Self::encode(event) else {
            return;
        };
        let closed = match self.viewers.get(viewer_id) {
            Some(tx) => tx.send(frame).is_err(),
            None => {
                debug!("No viewer conn={viewer_id} for {} event", event.name());
                false
            }
        };
        if closed {
            self.viewers.remove(viewer_id);
        }
    }
}
