use std::collections::VecDeque;

use crate::error::RelayError;
use crate::message::{Message, MessageRecord};

/// Bounded, insertion-ordered log of conversation turns.
///
/// Appending past capacity evicts the oldest message. Order is never changed
/// any other way.
#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: VecDeque<Message>,
    capacity: usize,
    max_content_chars: usize,
}

impl MessageStore {
    pub fn new(capacity: usize, max_content_chars: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
            max_content_chars,
        }
    }

    /// Rebuild a store from snapshot records. When the snapshot holds more
    /// than `capacity` entries only the newest are kept.
    pub fn from_records(
        capacity: usize,
        max_content_chars: usize,
        records: Vec<MessageRecord>,
    ) -> Self {
        let mut store = Self::new(capacity, max_content_chars);
        for record in records {
            store.push_evicting(record.into_message());
        }
        store
    }

    /// Append to the tail, evicting the head when over capacity.
    /// Returns the evicted message, if any.
    pub fn append(&mut self, message: Message) -> Result<Option<Message>, RelayError> {
        message.validate(self.max_content_chars)?;
        Ok(self.push_evicting(message))
    }

    fn push_evicting(&mut self, message: Message) -> Option<Message> {
        self.messages.push_back(message);
        if self.messages.len() > self.capacity {
            self.messages.pop_front()
        } else {
            None
        }
    }

    /// The last `k` messages (fewer if the store is shorter), oldest first.
    pub fn recent(&self, k: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(k);
        self.messages.iter().skip(start).cloned().collect()
    }

    /// Every message in timeline order, in persisted form.
    pub fn snapshot(&self) -> Vec<MessageRecord> {
        self.messages.iter().map(Message::to_record).collect()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
