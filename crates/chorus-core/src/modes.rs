//! Structured overlays on the open conversation: roundtable and consensus
//! sessions, plus one-off focused questions.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::message::{ConversationMode, Message};
use crate::relay::Relay;
use crate::scheduler::TurnOutcome;

#[derive(Debug, Clone)]
pub struct RoundtableState {
    pub topic: String,
    /// Participants, fixed when the session starts.
    pub agents: Vec<String>,
    pub current_index: usize,
}

#[derive(Debug, Clone)]
pub struct ConsensusState {
    pub question: String,
    pub agents: Vec<String>,
    pub current_index: usize,
    /// (agent, position) for every agent that answered, in speaking order.
    pub responses: Vec<(String, String)>,
}

/// The active overlay, if any. At most one exists at a time.
#[derive(Debug, Clone, Default)]
pub enum Overlay {
    #[default]
    None,
    Roundtable(RoundtableState),
    Consensus(ConsensusState),
}

/// The next turn an overlay wants taken.
struct OverlayTurn {
    agent: String,
    mode: ConversationMode,
    topic: String,
}

impl Overlay {
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            Overlay::None => None,
            Overlay::Roundtable(_) => Some("roundtable"),
            Overlay::Consensus(_) => Some("consensus"),
        }
    }

    fn current_turn(&self) -> Option<OverlayTurn> {
        match self {
            Overlay::None => None,
            Overlay::Roundtable(s) => s.agents.get(s.current_index).map(|agent| OverlayTurn {
                agent: agent.clone(),
                mode: ConversationMode::Roundtable,
                topic: s.topic.clone(),
            }),
            Overlay::Consensus(s) => s.agents.get(s.current_index).map(|agent| OverlayTurn {
                agent: agent.clone(),
                mode: ConversationMode::Consensus,
                topic: s.question.clone(),
            }),
        }
    }

    /// Advance past `agent`'s turn, whatever its outcome.
    fn complete_turn(&mut self, agent: &str, outcome: &TurnOutcome) {
        match self {
            Overlay::None => {}
            Overlay::Roundtable(s) => s.current_index += 1,
            Overlay::Consensus(s) => {
                if let TurnOutcome::Spoke(message) = outcome {
                    s.responses
                        .push((agent.to_string(), message.content.clone()));
                }
                s.current_index += 1;
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct ModeController {
    overlay: Overlay,
    driver: Option<JoinHandle<()>>,
}

impl ModeController {
    pub(crate) fn is_active(&self) -> bool {
        !matches!(self.overlay, Overlay::None)
    }

    /// Short progress line for status output.
    pub(crate) fn describe(&self) -> Option<String> {
        match &self.overlay {
            Overlay::None => None,
            Overlay::Roundtable(s) => Some(format!(
                "roundtable on \"{}\" ({}/{})",
                s.topic,
                s.current_index.min(s.agents.len()),
                s.agents.len()
            )),
            Overlay::Consensus(s) => Some(format!(
                "consensus on \"{}\" ({}/{})",
                s.question,
                s.current_index.min(s.agents.len()),
                s.agents.len()
            )),
        }
    }
}

fn consensus_summary(state: &ConsensusState) -> String {
    if state.responses.is_empty() {
        return format!(
            "🤝 Consensus on \"{}\": no agent gave a position.",
            state.question
        );
    }
    let mut out = format!("🤝 Consensus summary for \"{}\":", state.question);
    for (agent, position) in &state.responses {
        out.push_str(&format!("\n• {agent}: {position}"));
    }
    out
}

impl Relay {
    /// Every registered agent speaks once, in registration order, on `topic`.
    pub async fn start_roundtable(&self, topic: &str) -> Result<(), RelayError> {
        self.start_overlay(
            |agents| {
                (
                    Overlay::Roundtable(RoundtableState {
                        topic: topic.to_string(),
                        agents: agents.to_vec(),
                        current_index: 0,
                    }),
                    format!(
                        "🔄 Roundtable started on \"{topic}\". Speaking order: {}.",
                        agents.join(" → ")
                    ),
                )
            },
            topic,
        )
        .await
    }

    /// Every registered agent states a position, then a summary is posted.
    pub async fn start_consensus(&self, question: &str) -> Result<(), RelayError> {
        self.start_overlay(
            |agents| {
                (
                    Overlay::Consensus(ConsensusState {
                        question: question.to_string(),
                        agents: agents.to_vec(),
                        current_index: 0,
                        responses: Vec::new(),
                    }),
                    format!(
                        "🤝 Consensus requested on \"{question}\". Each of {} will state a position, then a summary follows.",
                        agents.join(", ")
                    ),
                )
            },
            question,
        )
        .await
    }

    async fn start_overlay(
        &self,
        build: impl FnOnce(&[String]) -> (Overlay, String),
        prompt: &str,
    ) -> Result<(), RelayError> {
        let prompt = Message::human(prompt);
        prompt.validate(self.inner.settings.max_content_chars)?;

        let agents = self.agent_ids().await;
        if agents.is_empty() {
            return Err(RelayError::NoAgents);
        }
        let (overlay, announcement) = build(&agents);
        {
            let mut modes = self.inner.modes.lock().await;
            if let Some(kind) = modes.overlay.kind() {
                return Err(RelayError::OverlayActive(kind));
            }
            info!("Starting {} with {} agents", overlay.kind().unwrap_or("overlay"), agents.len());
            modes.overlay = overlay;
        }
        // Pending automatic turns give way to the overlay.
        self.inner.scheduler.lock().await.activate();

        self.narrate(announcement).await;
        if let Err(e) = self.append(prompt).await {
            warn!("Failed to append overlay prompt: {e}");
        }

        let handle = tokio::spawn(self.clone().drive_overlay());
        self.inner.modes.lock().await.driver = Some(handle);
        Ok(())
    }

    async fn drive_overlay(self) {
        let mut wait: Option<Duration> = None;
        loop {
            let turn = self.inner.modes.lock().await.overlay.current_turn();
            let Some(turn) = turn else {
                break;
            };
            let step = match turn.mode {
                ConversationMode::Consensus => self.inner.settings.consensus_step,
                _ => self.inner.settings.roundtable_step,
            };
            tokio::time::sleep(wait.take().unwrap_or(step)).await;

            let outcome = self
                .run_turn(&turn.agent, turn.mode, Some(turn.topic))
                .await;
            if matches!(outcome, TurnOutcome::Busy) {
                debug!("{} turn for {} deferred, lock busy", turn.mode.as_str(), turn.agent);
                wait = Some(self.inner.settings.busy_delay);
                continue;
            }
            self.inner
                .modes
                .lock()
                .await
                .overlay
                .complete_turn(&turn.agent, &outcome);
        }
        self.finish_overlay().await;
    }

    async fn finish_overlay(&self) {
        let finished = {
            let mut modes = self.inner.modes.lock().await;
            modes.driver = None;
            std::mem::take(&mut modes.overlay)
        };
        match finished {
            Overlay::None => return,
            Overlay::Roundtable(state) => {
                info!("Roundtable on \"{}\" complete", state.topic);
                self.narrate(format!(
                    "✅ Roundtable on \"{}\" complete. Back to open conversation.",
                    state.topic
                ))
                .await;
            }
            Overlay::Consensus(state) => {
                info!(
                    "Consensus complete with {}/{} positions",
                    state.responses.len(),
                    state.agents.len()
                );
                self.narrate(consensus_summary(&state)).await;
            }
        }
        self.schedule_next(None).await;
    }

    /// Abort the running overlay, if any. Returns its kind.
    pub(crate) async fn cancel_overlay(&self) -> Option<&'static str> {
        let mut modes = self.inner.modes.lock().await;
        if let Some(driver) = modes.driver.take() {
            driver.abort();
        }
        let kind = modes.overlay.kind();
        modes.overlay = Overlay::None;
        if let Some(kind) = kind {
            info!("Cancelled {kind}");
        }
        kind
    }

    /// Put `question` to one agent and get a single reply. Allowed while
    /// paused and alongside an overlay; competes for the generation lock
    /// like any other turn.
    pub async fn focused(&self, agent: &str, question: &str) -> Result<TurnOutcome, RelayError> {
        let id = self
            .inner
            .registry
            .read()
            .await
            .resolve(agent)
            .map(str::to_string)
            .ok_or_else(|| RelayError::UnknownAgent(agent.to_string()))?;
        self.append(
            Message::human(format!("@{id} {question}")).with_mode(ConversationMode::Focused),
        )
        .await?;

        let outcome = self
            .run_turn(&id, ConversationMode::Focused, Some(question.to_string()))
            .await;
        if !matches!(outcome, TurnOutcome::Busy) {
            self.after_turn(&outcome).await;
        }
        Ok(outcome)
    }
}
