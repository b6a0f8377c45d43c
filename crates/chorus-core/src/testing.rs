//! Scripted agents and a recording broadcaster for relay tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{Agent, AgentRegistry, TurnRequest};
use crate::error::GenerationError;
use crate::events::{Broadcaster, RelayEvent};
use crate::relay::{Relay, RelayBuilder, RelaySettings};

#[derive(Clone)]
pub(crate) enum Reply {
    Text(String),
    Empty,
    Fail(String),
}

pub(crate) struct ScriptedAgent {
    reply: Reply,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedAgent {
    pub(crate) fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        let mut fresh = Self::new(self.reply.clone());
        if let Some(agent) = Arc::get_mut(&mut fresh) {
            agent.delay = delay;
        }
        fresh
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn generate(&self, request: TurnRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match &self.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Empty => Ok(String::new()),
            Reply::Fail(reason) => Err(GenerationError::Provider(reason.clone())),
        }
    }
}

/// Captures every event with its target: `None` for broadcasts.
#[derive(Default)]
pub(crate) struct RecordingBroadcaster {
    events: Mutex<Vec<(Option<String>, RelayEvent)>>,
}

impl RecordingBroadcaster {
    pub(crate) fn broadcasts(&self) -> Vec<RelayEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, _)| target.is_none())
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub(crate) fn typing_updates(&self) -> Vec<Vec<String>> {
        self.broadcasts()
            .into_iter()
            .filter_map(|e| match e {
                RelayEvent::TypingStatus { agents } => Some(agents),
                _ => None,
            })
            .collect()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, event: &RelayEvent) {
        self.events.lock().unwrap().push((None, event.clone()));
    }

    fn send_to(&self, viewer_id: &str, event: &RelayEvent) {
        self.events
            .lock()
            .unwrap()
            .push((Some(viewer_id.to_string()), event.clone()));
    }
}

pub(crate) fn viewer_events(hub: &RecordingBroadcaster, viewer_id: &str) -> Vec<RelayEvent> {
    hub.events
        .lock()
        .unwrap()
        .iter()
        .filter(|(target, _)| target.as_deref() == Some(viewer_id))
        .map(|(_, e)| e.clone())
        .collect()
}

/// Default settings with a fixed 10s gap between automatic turns.
pub(crate) fn test_settings() -> RelaySettings {
    RelaySettings {
        min_delay: Duration::from_secs(10),
        max_delay: Duration::from_secs(10),
        ..RelaySettings::default()
    }
}

pub(crate) fn harness(agents: Vec<(&str, Arc<ScriptedAgent>)>) -> (Relay, Arc<RecordingBroadcaster>) {
    let mut registry = AgentRegistry::new();
    for (id, agent) in agents {
        registry
            .register(id, "a test participant", agent)
            .unwrap();
    }
    let hub = Arc::new(RecordingBroadcaster::default());
    let relay = RelayBuilder::new(test_settings(), registry)
        .broadcaster(hub.clone())
        .build();
    (relay, hub)
}
