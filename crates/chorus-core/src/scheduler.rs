//! Turn scheduling: who speaks next, when, and what happens when a backend
//! fails or stalls.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{GenerationError, RelayError};
use crate::message::{ConversationMode, Message, Sender};
use crate::relay::{Relay, RelayInner};

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerPhase {
    /// Waiting for a human to start the conversation.
    Idle,
    /// An automatic turn is armed.
    Scheduled,
    /// A generation is in flight.
    Generating,
    Paused,
    Stopped,
}

/// Result of one generation attempt.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The agent's reply was appended.
    Spoke(Message),
    /// The backend answered with nothing; no message was appended.
    Empty,
    /// The attempt failed; a System diagnostic was appended.
    Failed(GenerationError),
    /// Another generation holds the lock. Nothing happened.
    Busy,
    /// The chosen agent is not registered.
    UnknownAgent(String),
    /// Nobody is registered to take the turn.
    NoAgents,
}

struct ArmedTimer {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct SchedulerState {
    active: bool,
    paused: bool,
    stopped: bool,
    timer: Option<ArmedTimer>,
    /// Monotonic id of the last armed timer; a firing timer whose id no
    /// longer matches has been superseded.
    pub(crate) timers_armed: u64,
}

impl SchedulerState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
            debug!("Cancelled pending turn #{}", timer.id);
        }
    }

    /// Mark the conversation live, e.g. on human input or an overlay.
    pub(crate) fn activate(&mut self) {
        if !self.active {
            info!("Conversation started");
        }
        self.active = true;
        self.stopped = false;
        self.cancel_timer();
    }
}

/// Holds the single-flight generation lock. Dropping it releases the lock and
/// clears the speaker's typing indicator, on every exit path.
struct GenerationGuard<'a> {
    inner: &'a RelayInner,
    typing: Option<String>,
}

impl<'a> GenerationGuard<'a> {
    fn acquire(inner: &'a RelayInner) -> Option<Self> {
        inner
            .generating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self {
            inner,
            typing: None,
        })
    }

    fn show_typing(&mut self, agent: &str) {
        if self.inner.presence.start(agent) {
            self.inner.broadcast_typing();
        }
        self.typing = Some(agent.to_string());
    }
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        if let Some(agent) = self.typing.take() {
            if self.inner.presence.finish(&agent) {
                self.inner.broadcast_typing();
            }
        }
        self.inner.generating.store(false, Ordering::Release);
    }
}

/// Pick a speaker uniformly at random, excluding whoever spoke last unless
/// that would leave nobody.
pub(crate) fn select_speaker(agents: &[String], last: Option<&Sender>) -> Option<String> {
    let last_agent = last.and_then(Sender::agent_id);
    let candidates: Vec<&String> = agents
        .iter()
        .filter(|id| Some(id.as_str()) != last_agent)
        .collect();
    let mut rng = rand::thread_rng();
    if candidates.is_empty() {
        agents.choose(&mut rng).cloned()
    } else {
        candidates.choose(&mut rng).map(|id| (*id).clone())
    }
}

/// Cut to `max` characters, marking the cut.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

impl Relay {
    pub async fn phase(&self) -> SchedulerPhase {
        let state = self.inner.scheduler.lock().await;
        if state.stopped {
            SchedulerPhase::Stopped
        } else if self.inner.generating.load(Ordering::Acquire) {
            SchedulerPhase::Generating
        } else if state.paused {
            SchedulerPhase::Paused
        } else if state.timer.is_some() {
            SchedulerPhase::Scheduled
        } else {
            SchedulerPhase::Idle
        }
    }

    fn random_delay(&self) -> Duration {
        let min = self.inner.settings.min_delay.as_millis() as u64;
        let max = self.inner.settings.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max.max(min)))
    }

    /// Arm the next automatic turn, replacing any pending one. Does nothing
    /// while an overlay is running, while paused, or before the conversation
    /// has started.
    pub(crate) async fn schedule_next(&self, forced: Option<Duration>) {
        let overlay_active = self.inner.modes.lock().await.is_active();
        if overlay_active {
            debug!("Overlay active, not arming a turn");
            return;
        }
        let mut state = self.inner.scheduler.lock().await;
        if !state.active || state.paused {
            return;
        }
        let delay = forced.unwrap_or_else(|| self.random_delay());
        state.cancel_timer();
        state.timers_armed += 1;
        let id = state.timers_armed;
        let handle = tokio::spawn(self.clone().timer(id, delay));
        state.timer = Some(ArmedTimer { id, handle });
        debug!("Next turn #{id} in {}ms", delay.as_millis());
    }

    // Boxed with an explicit Send bound: the timer task re-arms through
    // `schedule_next`, and an inferred future type would be recursive.
    fn timer(self, id: u64, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            self.on_timer_fired(id).await;
        })
    }

    async fn on_timer_fired(&self, id: u64) {
        {
            let mut state = self.inner.scheduler.lock().await;
            if state.timer.as_ref().map(|t| t.id) != Some(id) {
                return;
            }
            // Take the handle without aborting: this is the running task.
            state.timer = None;
            if !state.active || state.paused {
                return;
            }
        }
        if self.inner.modes.lock().await.is_active() {
            return;
        }

        let speaker = {
            let registry = self.inner.registry.read().await;
            let store = self.inner.store.lock().await;
            select_speaker(&registry.ids(), store.last().map(|m| &m.sender))
        };
        let Some(speaker) = speaker else {
            debug!("No agents registered, scheduler idle");
            return;
        };
        let outcome = self.run_turn(&speaker, ConversationMode::Normal, None).await;
        self.after_turn(&outcome).await;
    }

    /// Re-arm according to how the last attempt went.
    pub(crate) async fn after_turn(&self, outcome: &TurnOutcome) {
        let forced = match outcome {
            TurnOutcome::Busy => Some(self.inner.settings.busy_delay),
            TurnOutcome::UnknownAgent(_) => Some(self.inner.settings.invalid_agent_delay),
            _ => None,
        };
        self.schedule_next(forced).await;
    }

    /// One generation attempt for `agent`, under the single-flight lock.
    ///
    /// Never returns an error: failures and timeouts become a System
    /// diagnostic in the timeline. A reply that arrives after the timeout is
    /// discarded.
    pub(crate) async fn run_turn(
        &self,
        agent: &str,
        mode: ConversationMode,
        topic: Option<String>,
    ) -> TurnOutcome {
        let Some(mut guard) = GenerationGuard::acquire(&self.inner) else {
            debug!("Generation in progress, skipping turn for {agent}");
            return TurnOutcome::Busy;
        };

        let (id, role, backend) = {
            let registry = self.inner.registry.read().await;
            match registry.get(agent) {
                Ok(a) => (a.id.clone(), a.role.clone(), a.backend.clone()),
                Err(_) => {
                    warn!("Selected agent '{agent}' is not registered");
                    return TurnOutcome::UnknownAgent(agent.to_string());
                }
            }
        };
        guard.show_typing(&id);

        let request = crate::agent::TurnRequest {
            agent: id.clone(),
            role,
            history: self.recent(self.inner.settings.context_window).await,
            mode,
            topic,
        };
        let timeout = self.inner.settings.response_timeout;
        debug!("{id} is generating ({} mode)", mode.as_str());
        let call = tokio::spawn(async move { backend.generate(request).await });
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(GenerationError::Provider(format!(
                "generation task failed: {e}"
            ))),
            Err(_) => Err(GenerationError::Timeout(timeout)),
        };

        let outcome = match result {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    warn!("{id} returned an empty reply");
                    TurnOutcome::Empty
                } else {
                    let text = truncate_chars(text, self.inner.settings.max_content_chars);
                    match self.append(Message::agent(&id, text).with_mode(mode)).await {
                        Ok(message) => TurnOutcome::Spoke(message),
                        Err(e) => {
                            let error = GenerationError::Malformed(e.to_string());
                            self.append_diagnostic(&id, &error).await;
                            TurnOutcome::Failed(error)
                        }
                    }
                }
            }
            Err(error) => {
                warn!("{id} failed to respond: {error}");
                self.append_diagnostic(&id, &error).await;
                TurnOutcome::Failed(error)
            }
        };
        drop(guard);
        outcome
    }

    async fn append_diagnostic(&self, agent: &str, error: &GenerationError) {
        let text = truncate_chars(
            &format!("⚠️ {agent} could not respond: {error}"),
            self.inner.settings.diagnostic_chars,
        );
        self.narrate(text).await;
    }

    /// Append human input and mark the conversation live. Cancels any
    /// pending automatic turn; the caller follows up with
    /// [`respond_to_human`](Self::respond_to_human).
    pub async fn accept_human(&self, text: &str) -> Result<Message, RelayError> {
        let message = self.append(Message::human(text)).await?;
        self.inner.scheduler.lock().await.activate();
        Ok(message)
    }

    /// Immediate reply to fresh human input by a uniformly random agent.
    /// The last speaker is not excluded here.
    pub async fn respond_to_human(&self) -> TurnOutcome {
        let speaker = {
            let ids = self.inner.registry.read().await.ids();
            ids.choose(&mut rand::thread_rng()).cloned()
        };
        let Some(speaker) = speaker else {
            debug!("No agents registered to answer");
            self.after_turn(&TurnOutcome::NoAgents).await;
            return TurnOutcome::NoAgents;
        };
        let outcome = self.run_turn(&speaker, ConversationMode::Normal, None).await;
        match outcome {
            // The in-flight generation re-arms when it finishes; this is the
            // fallback if it already has.
            TurnOutcome::Busy => self.schedule_next(None).await,
            ref other => self.after_turn(other).await,
        }
        outcome
    }

    /// Append human input and wait for the immediate reply.
    pub async fn submit_human(&self, text: &str) -> Result<TurnOutcome, RelayError> {
        self.accept_human(text).await?;
        Ok(self.respond_to_human().await)
    }

    /// Suspend automatic turns. Returns false if already paused.
    pub async fn pause(&self) -> bool {
        {
            let mut state = self.inner.scheduler.lock().await;
            if state.paused {
                return false;
            }
            state.paused = true;
            state.cancel_timer();
        }
        info!("Conversation paused");
        self.narrate("⏸️ Conversation paused. Use /resume to continue.")
            .await;
        true
    }

    /// Lift a pause and arm a turn shortly after. Returns false if not
    /// paused.
    pub async fn resume(&self) -> bool {
        {
            let mut state = self.inner.scheduler.lock().await;
            if !state.paused {
                return false;
            }
            state.paused = false;
        }
        info!("Conversation resumed");
        self.narrate("▶️ Conversation resumed.").await;
        self.schedule_next(Some(self.inner.settings.resume_delay))
            .await;
        true
    }

    /// Cancel everything pending without narrating: overlay driver, timer and
    /// typing indicators. In-flight generations finish but do not re-arm.
    pub(crate) async fn halt(&self) -> Option<&'static str> {
        let cancelled = self.cancel_overlay().await;
        {
            let mut state = self.inner.scheduler.lock().await;
            state.active = false;
            state.paused = false;
            state.stopped = true;
            state.cancel_timer();
        }
        if self.inner.presence.clear() {
            self.inner.broadcast_typing();
        }
        cancelled
    }

    /// End the conversation until a human speaks or `/start` is issued.
    pub async fn stop(&self) {
        if let Some(kind) = self.halt().await {
            self.narrate(format!("🛑 The {kind} was cancelled.")).await;
        }
        info!("Conversation stopped");
        self.narrate("⏹️ Conversation stopped. Send a message or use /start to begin again.")
            .await;
    }

    /// Restart automatic turns after a stop.
    pub async fn start(&self) {
        {
            let mut state = self.inner.scheduler.lock().await;
            state.activate();
            state.paused = false;
        }
        self.narrate("▶️ Conversation started.").await;
        self.schedule_next(Some(self.inner.settings.resume_delay))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RelayEvent;
    use crate::message::SenderType;
    use crate::testing::{harness, Reply, ScriptedAgent};
    use std::sync::Arc;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_speaker_excludes_last() {
        let agents = ids(&["A", "B", "C"]);
        let last = Sender::Agent("B".into());
        for _ in 0..200 {
            let pick = select_speaker(&agents, Some(&last)).unwrap();
            assert_ne!(pick, "B");
        }
    }

    #[test]
    fn test_select_speaker_single_agent_repeats() {
        let agents = ids(&["Solo"]);
        let last = Sender::Agent("Solo".into());
        assert_eq!(select_speaker(&agents, Some(&last)).unwrap(), "Solo");
    }

    #[test]
    fn test_select_speaker_human_last_uses_everyone() {
        let agents = ids(&["A", "B"]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(select_speaker(&agents, Some(&Sender::Human)).unwrap());
        }
        assert_eq!(seen.len(), 2);
        assert!(select_speaker(&[], None).is_none());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        let cut = truncate_chars("abcdefghij", 5);
        assert_eq!(cut.chars().count(), 5);
        assert!(cut.ends_with('…'));
    }

    #[tokio::test]
    async fn test_random_delay_within_window() {
        let relay = crate::relay::RelayBuilder::new(
            crate::relay::RelaySettings::default(),
            crate::agent::AgentRegistry::new(),
        )
        .build();
        for _ in 0..500 {
            let delay = relay.random_delay();
            assert!(delay >= Duration::from_millis(8_000));
            assert!(delay <= Duration::from_millis(20_000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_turns_before_conversation_starts() {
        let agent = ScriptedAgent::new(Reply::Text("hi".into()));
        let (relay, _hub) = harness(vec![("A", agent.clone())]);
        relay.schedule_next(None).await;
        assert_eq!(relay.phase().await, SchedulerPhase::Idle);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(agent.calls(), 0);
        assert!(relay.snapshot().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_human_input_triggers_reply_then_rearms() {
        let agent = ScriptedAgent::new(Reply::Text("hello".into()));
        let (relay, _hub) = harness(vec![("A", agent.clone())]);

        let outcome = relay.submit_human("hi").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Spoke(ref m) if m.content == "hello"));
        assert_eq!(relay.phase().await, SchedulerPhase::Scheduled);

        // The next automatic turn fires within the delay window.
        tokio::time::sleep(Duration::from_millis(10_001)).await;
        assert_eq!(agent.calls(), 2);
        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_automatic_turns_alternate_speakers() {
        let a = ScriptedAgent::new(Reply::Text("from a".into()));
        let b = ScriptedAgent::new(Reply::Text("from b".into()));
        let (relay, _hub) = harness(vec![("A", a), ("B", b)]);
        relay.submit_human("go").await.unwrap();
        tokio::time::sleep(Duration::from_secs(200)).await;
        relay.stop().await;

        let speakers: Vec<String> = relay
            .snapshot()
            .await
            .into_iter()
            .filter(|r| r.sender_type == SenderType::Ai)
            .map(|r| r.sender)
            .collect();
        assert!(speakers.len() >= 5);
        for pair in speakers.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_generation() {
        let agent = ScriptedAgent::new(Reply::Text("slow".into())).with_delay(Duration::from_secs(1));
        let (relay, _hub) = harness(vec![("A", agent.clone())]);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let relay = relay.clone();
            handles.push(tokio::spawn(async move {
                relay.run_turn("A", ConversationMode::Normal, None).await
            }));
        }
        let mut spoke = 0;
        let mut busy = 0;
        for handle in handles {
            match handle.await.unwrap() {
                TurnOutcome::Spoke(_) => spoke += 1,
                TurnOutcome::Busy => busy += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!((spoke, busy), (1, 4));
        assert_eq!(agent.max_in_flight(), 1);
        assert!(!relay.inner.generating.load(Ordering::Acquire));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_appends_one_diagnostic_and_discards_late_reply() {
        let agent =
            ScriptedAgent::new(Reply::Text("too late".into())).with_delay(Duration::from_secs(30));
        let (relay, hub) = harness(vec![("A", agent.clone())]);
        relay.inner.scheduler.lock().await.activate();

        let outcome = relay.run_turn("A", ConversationMode::Normal, None).await;
        assert!(matches!(
            outcome,
            TurnOutcome::Failed(GenerationError::Timeout(_))
        ));
        relay.after_turn(&outcome).await;
        let armed = relay.inner.scheduler.lock().await.timers_armed;
        assert_eq!(armed, 1);

        // Let the abandoned call finish; its reply must not surface.
        relay.pause().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = relay.snapshot().await;
        let diagnostics: Vec<_> = snapshot
            .iter()
            .filter(|r| r.content.contains("could not respond"))
            .collect();
        assert_eq!(diagnostics.len(), 1);
        assert!(snapshot.iter().all(|r| r.content != "too late"));
        assert!(hub.typing_updates().last().unwrap().is_empty());
        assert!(relay.typing().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_becomes_truncated_diagnostic() {
        let reason = "x".repeat(500);
        let agent = ScriptedAgent::new(Reply::Fail(reason));
        let (relay, _hub) = harness(vec![("A", agent)]);

        let outcome = relay.run_turn("A", ConversationMode::Normal, None).await;
        assert!(matches!(outcome, TurnOutcome::Failed(GenerationError::Provider(_))));
        let last = relay.recent(1).await.pop().unwrap();
        assert_eq!(last.sender, Sender::System);
        assert!(last.content.starts_with("⚠️ A could not respond"));
        assert_eq!(last.content.chars().count(), 200);
        assert!(!relay.inner.generating.load(Ordering::Acquire));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_reply_appends_nothing() {
        let (relay, hub) = harness(vec![("A", ScriptedAgent::new(Reply::Empty))]);
        let outcome = relay.run_turn("A", ConversationMode::Normal, None).await;
        assert!(matches!(outcome, TurnOutcome::Empty));
        assert!(relay.snapshot().await.is_empty());
        // Typing went on and off.
        assert_eq!(hub.typing_updates(), vec![vec!["A".to_string()], vec![]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_agent_rearms_after_short_delay() {
        let (relay, _hub) = harness(vec![("A", ScriptedAgent::new(Reply::Text("hi".into())))]);
        relay.inner.scheduler.lock().await.activate();
        let outcome = relay.run_turn("Ghost", ConversationMode::Normal, None).await;
        assert!(matches!(outcome, TurnOutcome::UnknownAgent(ref id) if id == "Ghost"));
        assert!(relay.typing().is_empty());

        relay.after_turn(&outcome).await;
        tokio::time::sleep(Duration::from_millis(1_001)).await;
        let last = relay.recent(1).await.pop().unwrap();
        assert_eq!(last.sender, Sender::Agent("A".into()));
        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_human_input_supersedes_pending_timer() {
        let agent = ScriptedAgent::new(Reply::Text("hey".into()));
        let (relay, _hub) = harness(vec![("A", agent.clone())]);
        relay.submit_human("one").await.unwrap();
        let first = relay.inner.scheduler.lock().await.timers_armed;

        relay.submit_human("two").await.unwrap();
        let second = relay.inner.scheduler.lock().await.timers_armed;
        assert_eq!(second, first + 1);

        // Only the newest timer fires.
        tokio::time::sleep(Duration::from_millis(10_001)).await;
        assert_eq!(agent.calls(), 3);
        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let agent = ScriptedAgent::new(Reply::Text("hey".into()));
        let (relay, _hub) = harness(vec![("A", agent.clone())]);
        relay.submit_human("hello").await.unwrap();

        assert!(relay.pause().await);
        assert!(!relay.pause().await);
        assert_eq!(relay.phase().await, SchedulerPhase::Paused);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(agent.calls(), 1);

        assert!(relay.resume().await);
        assert!(!relay.resume().await);
        tokio::time::sleep(Duration::from_millis(1_001)).await;
        assert_eq!(agent.calls(), 2);
        relay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_timer_and_typing() {
        let agent = ScriptedAgent::new(Reply::Text("hey".into())).with_delay(Duration::from_secs(5));
        let (relay, hub) = harness(vec![("A", agent.clone())]);
        relay.accept_human("hello").await.unwrap();
        let responder = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.respond_to_human().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(relay.typing(), vec!["A"]);

        relay.stop().await;
        assert_eq!(relay.phase().await, SchedulerPhase::Stopped);
        assert!(relay.typing().is_empty());
        assert!(hub.typing_updates().last().unwrap().is_empty());

        // The in-flight reply lands but nothing further is scheduled.
        responder.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(agent.calls(), 1);
        assert!(relay.inner.scheduler.lock().await.timer.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_stop_resumes_turns() {
        let agent = ScriptedAgent::new(Reply::Text("hey".into()));
        let (relay, _hub) = harness(vec![("A", agent.clone())]);
        relay.stop().await;
        relay.start().await;
        assert_eq!(relay.phase().await, SchedulerPhase::Scheduled);
        tokio::time::sleep(Duration::from_millis(1_001)).await;
        assert_eq!(agent.calls(), 1);
        relay.stop().await;

        let narration: Vec<String> = relay
            .snapshot()
            .await
            .into_iter()
            .filter(|r| r.sender_type == SenderType::System)
            .map(|r| r.content)
            .collect();
        assert!(narration[0].contains("stopped"));
        assert!(narration[1].contains("started"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_agents_leaves_scheduler_idle() {
        let (relay, hub) = harness(Vec::<(&str, Arc<ScriptedAgent>)>::new());
        let outcome = relay.submit_human("anyone?").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::NoAgents));
        // The usual re-arm happens and the timer disarms when it fires.
        assert_eq!(relay.phase().await, SchedulerPhase::Scheduled);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(relay.phase().await, SchedulerPhase::Idle);
        assert_eq!(relay.snapshot().await.len(), 1);
        assert!(hub
            .broadcasts()
            .iter()
            .all(|e| !matches!(e, RelayEvent::TypingStatus { .. })));
        relay.stop().await;
    }
}
