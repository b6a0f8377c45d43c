use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chorus_config::Config;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent::AgentRegistry;
use crate::command::{self, Command, ParsedInput};
use crate::error::RelayError;
use crate::events::{Broadcaster, InboundMessage, MessageView, NullBroadcaster, RelayEvent};
use crate::message::{Message, MessageRecord};
use crate::modes::ModeController;
use crate::persist::SnapshotPersister;
use crate::presence::Presence;
use crate::roles::RoleStore;
use crate::scheduler::{truncate_chars, SchedulerPhase, SchedulerState, TurnOutcome};
use crate::store::MessageStore;

/// Timing and sizing knobs for the relay.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub response_timeout: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub resume_delay: Duration,
    pub invalid_agent_delay: Duration,
    pub busy_delay: Duration,
    pub roundtable_step: Duration,
    pub consensus_step: Duration,
    pub capacity: usize,
    pub greeting_size: usize,
    pub context_window: usize,
    pub max_content_chars: usize,
    pub diagnostic_chars: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        let s = &config.scheduler;
        let h = &config.history;
        Self {
            response_timeout: Duration::from_millis(s.response_timeout_ms),
            min_delay: Duration::from_millis(s.min_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            resume_delay: Duration::from_millis(s.resume_delay_ms),
            invalid_agent_delay: Duration::from_millis(s.invalid_agent_delay_ms),
            busy_delay: Duration::from_millis(s.busy_delay_ms),
            roundtable_step: Duration::from_millis(s.roundtable_step_ms),
            consensus_step: Duration::from_millis(s.consensus_step_ms),
            capacity: h.capacity,
            greeting_size: h.greeting_size,
            context_window: config.agents.defaults.context_window,
            max_content_chars: h.max_content_chars,
            diagnostic_chars: h.diagnostic_chars,
        }
    }
}

pub(crate) struct RelayInner {
    pub(crate) settings: RelaySettings,
    pub(crate) store: Arc<Mutex<MessageStore>>,
    pub(crate) registry: RwLock<AgentRegistry>,
    pub(crate) scheduler: Mutex<SchedulerState>,
    /// Single-flight flag: true for the whole of a generation attempt.
    pub(crate) generating: AtomicBool,
    pub(crate) modes: Mutex<ModeController>,
    pub(crate) presence: Presence,
    pub(crate) broadcaster: Arc<dyn Broadcaster>,
    persister: Option<Arc<SnapshotPersister>>,
    roles: Option<Mutex<RoleStore>>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl RelayInner {
    pub(crate) fn broadcast_typing(&self) {
        self.broadcaster.broadcast(&RelayEvent::TypingStatus {
            agents: self.presence.typing(),
        });
    }
}

/// The conversation engine: one per process, cheap to clone, shared by the
/// transport, the timers and the overlay drivers.
#[derive(Clone)]
pub struct Relay {
    pub(crate) inner: Arc<RelayInner>,
}

pub struct RelayBuilder {
    settings: RelaySettings,
    registry: AgentRegistry,
    broadcaster: Arc<dyn Broadcaster>,
    persister: Option<Arc<SnapshotPersister>>,
    roles: Option<RoleStore>,
    history: Vec<MessageRecord>,
}

impl RelayBuilder {
    pub fn new(settings: RelaySettings, registry: AgentRegistry) -> Self {
        Self {
            settings,
            registry,
            broadcaster: Arc::new(NullBroadcaster),
            persister: None,
            roles: None,
            history: Vec::new(),
        }
    }

    pub fn broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn persister(mut self, persister: Arc<SnapshotPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Role overrides; applied to registered agents and updated by `/role`.
    pub fn roles(mut self, roles: RoleStore) -> Self {
        self.roles = Some(roles);
        self
    }

    /// Seed the timeline from a previous snapshot.
    pub fn history(mut self, records: Vec<MessageRecord>) -> Self {
        self.history = records;
        self
    }

    pub fn build(mut self) -> Relay {
        if let Some(roles) = &mut self.roles {
            roles.apply(&mut self.registry);
        }
        let store = MessageStore::from_records(
            self.settings.capacity,
            self.settings.max_content_chars,
            self.history,
        );
        if !store.is_empty() {
            info!("Restored {} messages into the timeline", store.len());
        }
        Relay {
            inner: Arc::new(RelayInner {
                settings: self.settings,
                store: Arc::new(Mutex::new(store)),
                registry: RwLock::new(self.registry),
                scheduler: Mutex::new(SchedulerState::default()),
                generating: AtomicBool::new(false),
                modes: Mutex::new(ModeController::default()),
                presence: Presence::new(),
                broadcaster: self.broadcaster,
                persister: self.persister,
                roles: self.roles.map(Mutex::new),
                background: Mutex::new(None),
            }),
        }
    }
}

/// Point-in-time view of the relay for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub phase: SchedulerPhase,
    pub agents: Vec<String>,
    pub typing: Vec<String>,
    pub overlay: Option<String>,
    pub messages: usize,
}

impl Relay {
    pub fn settings(&self) -> &RelaySettings {
        &self.inner.settings
    }

    /// Validate and append a message, then broadcast it and reset the idle
    /// save countdown. The broadcast happens under the store lock so viewers
    /// see messages in timeline order.
    pub async fn append(&self, message: Message) -> Result<Message, RelayError> {
        {
            let mut store = self.inner.store.lock().await;
            store.append(message.clone())?;
            self.inner.broadcaster.broadcast(&RelayEvent::NewMessage {
                message: MessageView::from(&message),
            });
        }
        if let Some(persister) = &self.inner.persister {
            persister.touch();
        }
        debug!(
            "Appended {} message ({} chars)",
            message.sender,
            message.content.len()
        );
        Ok(message)
    }

    /// Append a System message, cut to the content limit so that long
    /// topics quoted in it never get it rejected.
    pub(crate) async fn narrate(&self, text: impl Into<String>) {
        let text = truncate_chars(&text.into(), self.inner.settings.max_content_chars);
        if let Err(e) = self.append(Message::system(text)).await {
            warn!("Failed to append system message: {e}");
        }
    }

    pub async fn recent(&self, k: usize) -> Vec<Message> {
        self.inner.store.lock().await.recent(k)
    }

    pub async fn snapshot(&self) -> Vec<MessageRecord> {
        self.inner.store.lock().await.snapshot()
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        self.inner.registry.read().await.ids()
    }

    pub fn typing(&self) -> Vec<String> {
        self.inner.presence.typing()
    }

    /// Recent history plus who is typing, for a newly connected viewer.
    pub async fn greeting(&self) -> RelayEvent {
        let store = self.inner.store.lock().await;
        self.history_event(&store)
    }

    fn history_event(&self, store: &MessageStore) -> RelayEvent {
        RelayEvent::History {
            messages: store
                .recent(self.inner.settings.greeting_size)
                .iter()
                .map(MessageView::from)
                .collect(),
            typing: self.typing(),
        }
    }

    /// Greet a new viewer. `join` subscribes it to broadcasts and runs
    /// under the store lock, so every message reaches the viewer once:
    /// inside the history or as a later `newMessage`.
    pub async fn on_viewer_connect(&self, viewer_id: &str, join: impl FnOnce()) {
        let store = self.inner.store.lock().await;
        let greeting = self.history_event(&store);
        join();
        self.inner.broadcaster.send_to(viewer_id, &greeting);
        debug!("Greeted viewer {viewer_id}");
    }

    pub async fn status(&self) -> RelayStatus {
        let overlay = self.inner.modes.lock().await.describe();
        RelayStatus {
            phase: self.phase().await,
            agents: self.agent_ids().await,
            typing: self.typing(),
            overlay,
            messages: self.inner.store.lock().await.len(),
        }
    }

    fn reply_notice(&self, viewer_id: &str, content: impl Into<String>) {
        self.inner.broadcaster.send_to(
            viewer_id,
            &RelayEvent::Notice {
                content: content.into(),
            },
        );
    }

    fn reply_error(&self, viewer_id: &str, content: impl Into<String>) {
        self.inner.broadcaster.send_to(
            viewer_id,
            &RelayEvent::Error {
                content: content.into(),
            },
        );
    }

    /// Route one piece of viewer input: conversation text or a command.
    pub async fn handle_input(&self, input: InboundMessage) {
        let viewer = input.viewer_id;
        match command::parse(&input.content) {
            ParsedInput::Chat(text) => {
                if text.is_empty() {
                    return;
                }
                match self.accept_human(&text).await {
                    Ok(_) => {
                        let relay = self.clone();
                        tokio::spawn(async move {
                            relay.respond_to_human().await;
                        });
                    }
                    Err(e) => self.reply_error(&viewer, e.to_string()),
                }
            }
            ParsedInput::Command(cmd) => self.run_command(&viewer, cmd).await,
            ParsedInput::Usage { usage, .. } => {
                self.reply_error(&viewer, format!("Usage: {usage}"));
            }
            ParsedInput::Unknown(name) => {
                self.reply_error(
                    &viewer,
                    format!("Unknown command '/{name}'. Type /help for the list of commands."),
                );
            }
        }
    }

    async fn run_command(&self, viewer: &str, cmd: Command) {
        debug!("Command from {viewer}: {cmd:?}");
        match cmd {
            Command::Roundtable { topic } => {
                if let Err(e) = self.start_roundtable(&topic).await {
                    self.reply_error(viewer, e.to_string());
                }
            }
            Command::Consensus { question } => {
                if let Err(e) = self.start_consensus(&question).await {
                    self.reply_error(viewer, e.to_string());
                }
            }
            Command::Ask { agent, question } => {
                if self.inner.registry.read().await.resolve(&agent).is_none() {
                    self.reply_error(viewer, RelayError::UnknownAgent(agent).to_string());
                    return;
                }
                let relay = self.clone();
                let viewer = viewer.to_string();
                tokio::spawn(async move {
                    match relay.focused(&agent, &question).await {
                        Ok(TurnOutcome::Busy) => relay.reply_notice(
                            &viewer,
                            "Another agent is still answering; your question is in the timeline, try asking again shortly.",
                        ),
                        Ok(_) => {}
                        Err(e) => relay.reply_error(&viewer, e.to_string()),
                    }
                });
            }
            Command::SetRole { agent, role } => match self.set_role(&agent, &role).await {
                Ok(id) => self.narrate(format!("🎭 {id} is now {role}")).await,
                Err(e) => self.reply_error(viewer, e.to_string()),
            },
            Command::Roles => {
                let roles = self.inner.registry.read().await.roles();
                let mut out = String::from("Current roles:");
                for (id, role) in roles {
                    let role = if role.is_empty() { "(none)" } else { role.as_str() };
                    out.push_str(&format!("\n{id}: {role}"));
                }
                self.reply_notice(viewer, out);
            }
            Command::Agents => {
                let ids = self.agent_ids().await;
                if ids.is_empty() {
                    self.reply_notice(viewer, "No agents are available.");
                } else {
                    self.reply_notice(viewer, format!("Agents: {}", ids.join(", ")));
                }
            }
            Command::Help => self.reply_notice(viewer, command::help_text()),
            Command::Pause => {
                if !self.pause().await {
                    self.reply_notice(viewer, "The conversation is already paused.");
                }
            }
            Command::Resume => {
                if !self.resume().await {
                    self.reply_notice(viewer, "The conversation is not paused.");
                }
            }
            Command::Stop => self.stop().await,
            Command::Start => self.start().await,
        }
    }

    /// Change an agent's role text. Returns the canonical agent id.
    pub async fn set_role(&self, agent: &str, role: &str) -> Result<String, RelayError> {
        let id = {
            let mut registry = self.inner.registry.write().await;
            let id = registry
                .resolve(agent)
                .ok_or_else(|| RelayError::UnknownAgent(agent.to_string()))?
                .to_string();
            registry.set_role(&id, role)?;
            id
        };
        if let Some(roles) = &self.inner.roles {
            if let Err(e) = roles.lock().await.record(&id, role) {
                warn!("Failed to persist role for {id}: {e}");
            }
        }
        info!("Role for {id} set to: {role}");
        Ok(id)
    }

    /// Start the idle-save loop. Call once after construction.
    pub async fn start_background(&self) {
        let Some(persister) = self.inner.persister.clone() else {
            return;
        };
        let handle = tokio::spawn(persister.run(self.inner.store.clone()));
        if let Some(old) = self.inner.background.lock().await.replace(handle) {
            old.abort();
        }
    }

    /// Graceful teardown: halt scheduling, stop background work, and write
    /// the final snapshot.
    pub async fn shutdown(&self) {
        info!("Relay shutting down");
        self.halt().await;
        if let Some(handle) = self.inner.background.lock().await.take() {
            handle.abort();
        }
        if let Some(persister) = &self.inner.persister {
            let records = self.snapshot().await;
            match persister.save(&records) {
                Ok(()) => info!(
                    "Saved {} messages to {}",
                    records.len(),
                    persister.path().display()
                ),
                Err(e) => error!("Final snapshot save failed: {e}"),
            }
        }
    }

    /// Emergency dump from a synchronous fault handler. Skips the dump if
    /// the store is locked rather than risk blocking a dying process.
    pub fn crash_dump(&self) -> Option<&Path> {
        let persister = self.inner.persister.as_ref()?;
        let records = match self.inner.store.try_lock() {
            Ok(store) => store.snapshot(),
            Err(_) => {
                error!("Crash dump skipped: message store is locked");
                return None;
            }
        };
        match persister.save_crash_dump(&records) {
            Ok(()) => Some(persister.crash_path()),
            Err(e) => {
                error!("Crash dump failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{harness, viewer_events, Reply, ScriptedAgent};
    use tempfile::TempDir;

    fn input(text: &str) -> InboundMessage {
        InboundMessage {
            viewer_id: "viewer-1".into(),
            content: text.into(),
            timestamp: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_broadcasts_in_order() {
        let (relay, hub) = harness(vec![]);
        relay.append(Message::human("one")).await.unwrap();
        relay.append(Message::system("two")).await.unwrap();
        let contents: Vec<String> = hub
            .broadcasts()
            .into_iter()
            .filter_map(|e| match e {
                RelayEvent::NewMessage { message } => Some(message.record.content),
                _ => None,
            })
            .collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_append_not_broadcast() {
        let (relay, hub) = harness(vec![]);
        assert!(relay.append(Message::human(" ")).await.is_err());
        assert!(hub.broadcasts().is_empty());
        assert!(relay.snapshot().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewer_connect_gets_recent_history_and_typing() {
        let (relay, hub) = harness(vec![]);
        for i in 0..60 {
            relay.append(Message::human(format!("m{i}"))).await.unwrap();
        }
        let mut joined = false;
        relay
            .on_viewer_connect("v9", || {
                // Appends wait until the viewer is subscribed.
                assert!(relay.inner.store.try_lock().is_err());
                joined = true;
            })
            .await;
        assert!(joined);
        let events = viewer_events(&hub, "v9");
        assert_eq!(events.len(), 1);
        match &events[0] {
            RelayEvent::History { messages, typing } => {
                assert_eq!(messages.len(), 50);
                assert_eq!(messages[0].record.content, "m10");
                assert!(typing.is_empty());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_command_replies_only_to_sender() {
        let (relay, hub) = harness(vec![]);
        relay.handle_input(input("/dance")).await;
        let events = viewer_events(&hub, "viewer-1");
        assert!(matches!(&events[0], RelayEvent::Error { content } if content.contains("/dance")));
        assert!(hub.broadcasts().is_empty());
        assert!(relay.snapshot().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_error_for_missing_arguments() {
        let (relay, hub) = harness(vec![]);
        relay.handle_input(input("/consensus")).await;
        let events = viewer_events(&hub, "viewer-1");
        assert!(
            matches!(&events[0], RelayEvent::Error { content } if content == "Usage: /consensus <question>")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ask_unknown_agent_is_rejected() {
        let (relay, hub) = harness(vec![("A", ScriptedAgent::new(Reply::Text("hi".into())))]);
        relay.handle_input(input("/ask Nobody hello?")).await;
        let events = viewer_events(&hub, "viewer-1");
        assert!(
            matches!(&events[0], RelayEvent::Error { content } if content.contains("unknown agent 'Nobody'"))
        );
        assert!(relay.snapshot().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_input_gets_a_reply() {
        let agent = ScriptedAgent::new(Reply::Text("hello human".into()));
        let (relay, _hub) = harness(vec![("A", agent.clone())]);
        relay.handle_input(input("hi everyone")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let snapshot = relay.snapshot().await;
        assert_eq!(snapshot[0].content, "hi everyone");
        assert_eq!(snapshot[1].sender, "A");
        assert_eq!(snapshot[1].content, "hello human");
        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_role_command_updates_registry_and_store() {
        let dir = TempDir::new().unwrap();
        let roles_path = dir.path().join("roles.json");
        let mut registry = AgentRegistry::new();
        registry
            .register("Claude", "poet", ScriptedAgent::new(Reply::Text("x".into())))
            .unwrap();
        let relay = RelayBuilder::new(RelaySettings::default(), registry)
            .roles(RoleStore::open(&roles_path))
            .build();

        relay.handle_input(input("/role claude a stern judge")).await;
        let roles = relay.inner.registry.read().await.roles();
        assert_eq!(roles[0], ("Claude".to_string(), "a stern judge".to_string()));
        assert_eq!(RoleStore::open(&roles_path).get("Claude"), Some("a stern judge"));
        let last = relay.recent(1).await;
        assert!(last[0].content.contains("Claude is now a stern judge"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_saved_roles_seed_registry() {
        let dir = TempDir::new().unwrap();
        let roles_path = dir.path().join("roles.json");
        RoleStore::open(&roles_path).record("GPT", "a pirate").unwrap();

        let mut registry = AgentRegistry::new();
        registry
            .register("GPT", "default", ScriptedAgent::new(Reply::Text("x".into())))
            .unwrap();
        let relay = RelayBuilder::new(RelaySettings::default(), registry)
            .roles(RoleStore::open(&roles_path))
            .build();
        assert_eq!(relay.inner.registry.read().await.get("GPT").unwrap().role, "a pirate");
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_seed_and_shutdown_save() {
        let dir = TempDir::new().unwrap();
        let persister = Arc::new(SnapshotPersister::new(
            dir.path().join("c.json"),
            dir.path().join("c.crash.json"),
            Duration::from_secs(300),
        ));
        let relay = RelayBuilder::new(RelaySettings::default(), AgentRegistry::new())
            .persister(persister.clone())
            .history(vec![Message::human("before restart").to_record()])
            .build();
        relay.start_background().await;
        relay.append(Message::human("after restart")).await.unwrap();
        relay.shutdown().await;

        let saved = persister.load().unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].content, "before restart");
        assert_eq!(saved[1].content, "after restart");
        assert!(!persister.crash_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_dump_writes_crash_target() {
        let dir = TempDir::new().unwrap();
        let persister = Arc::new(SnapshotPersister::new(
            dir.path().join("c.json"),
            dir.path().join("c.crash.json"),
            Duration::from_secs(300),
        ));
        let relay = RelayBuilder::new(RelaySettings::default(), AgentRegistry::new())
            .persister(persister.clone())
            .build();
        relay.append(Message::human("unsaved")).await.unwrap();
        let path = relay.crash_dump().unwrap().to_path_buf();
        assert_eq!(path, persister.crash_path());
        assert!(!persister.path().exists());
        assert_eq!(crate::persist::read_snapshot(&path).unwrap()[0].content, "unsaved");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_agents_and_phase() {
        let (relay, _hub) = harness(vec![
            ("A", ScriptedAgent::new(Reply::Text("a".into()))),
            ("B", ScriptedAgent::new(Reply::Text("b".into()))),
        ]);
        let status = relay.status().await;
        assert_eq!(status.agents, vec!["A", "B"]);
        assert_eq!(status.phase, SchedulerPhase::Idle);
        assert!(status.overlay.is_none());
        assert_eq!(status.messages, 0);
    }
}
