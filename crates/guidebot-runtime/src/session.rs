//! [`ConversationSession`] – one customer utterance, start to finish.
//!
//! The session owns the in-flight ReAct run.  A new utterance aborts the
//! previous run (barge-in), so at most one run and one navigation wait are
//! live at any time.  Around the run it drives the state machine through
//! `Reasoning` → `Speaking` → `Listening`, acts on the flags tools raised
//! (staff call, end of conversation), and logs the turn.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use guidebot_hal::{Movement, Speech};
use guidebot_kernel::StateMachine;
use guidebot_memory::{InteractionLogStore, MemoryStore};
use guidebot_types::{ApplicationState, InteractionRecord, StateKind};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::flags::SessionFlags;
use crate::navigation::NavigationOrchestrator;
use crate::phrases;
use crate::react::{ReActOrchestrator, ReActOutcome};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on a whole ReAct run.
    pub total_timeout: Duration,
    pub language: String,
    /// System instruction for the model; the backend default when `None`.
    pub system_prompt: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(25),
            language: "ja-JP".to_string(),
            system_prompt: None,
        }
    }
}

/// Shared handles the session works with.
pub struct SessionParts {
    pub state: Arc<StateMachine>,
    pub react: Arc<ReActOrchestrator>,
    pub navigation: Arc<NavigationOrchestrator>,
    pub movement: Arc<dyn Movement>,
    pub speech: Arc<dyn Speech>,
    pub flags: Arc<SessionFlags>,
    pub memory: Arc<Mutex<MemoryStore>>,
    pub log: Arc<Mutex<InteractionLogStore>>,
}

pub struct ConversationSession {
    config: SessionConfig,
    parts: SessionParts,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationSession {
    pub fn new(config: SessionConfig, parts: SessionParts) -> Self {
        Self {
            config,
            parts,
            current: Mutex::new(None),
        }
    }

    /// Start handling `text` in the background, interrupting any turn still
    /// in flight.  Blank input is ignored.
    pub fn handle_utterance(self: &Arc<Self>, text: &str, language: &str) {
        let text = text.trim().to_string();
        if text.is_empty() {
            debug!("Session: ignoring blank utterance");
            return;
        }
        let language = if language.trim().is_empty() {
            self.config.language.clone()
        } else {
            language.to_string()
        };

        let mut current = self.current();
        let barged_in = match current.take() {
            Some(previous) if !previous.is_finished() => {
                info!("Session: barge-in, aborting previous turn");
                previous.abort();
                true
            }
            _ => false,
        };

        let this = Arc::clone(self);
        *current = Some(tokio::spawn(async move {
            if barged_in {
                this.parts.speech.stop().await;
            }
            this.respond(&text, &language).await;
        }));
    }

    /// Wait for the turn in flight, if any.
    pub async fn join(&self) {
        let handle = self.current().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Abort the turn in flight.
    pub fn cancel(&self) {
        if let Some(handle) = self.current().take() {
            handle.abort();
            info!("Session: turn cancelled");
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Handle one utterance to completion.
    pub async fn respond(&self, text: &str, language: &str) {
        let started = Instant::now();
        let parts = &self.parts;

        if phrases::is_return_command(text) {
            info!(%text, "Session: return command");
            parts.flags.mark_user_ended();
            parts.movement.stop_movement().await;
            parts.speech.speak(phrases::RETURNING_HOME, language).await;
            parts.navigation.return_to_base().await;
            self.record(text, Some(phrases::RETURNING_HOME.to_string()), Vec::new(), started, None);
            return;
        }

        parts.navigation.cancel_linger();
        self.enter_reasoning();
        parts.speech.speak(phrases::ACK, language).await;

        let context = self.memory_context();
        let run = parts
            .react
            .run(text, self.config.system_prompt.as_deref(), context.as_deref());

        let outcome = match tokio::time::timeout(self.config.total_timeout, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(timeout = ?self.config.total_timeout, "Session: ReAct run timed out");
                if parts.state.current_kind() == StateKind::Navigating {
                    parts.movement.stop_movement().await;
                }
                parts.speech.speak(phrases::ERROR, language).await;
                self.enter(ApplicationState::listening());
                self.record(
                    text,
                    Some(phrases::ERROR.to_string()),
                    Vec::new(),
                    started,
                    Some("run timed out".to_string()),
                );
                return;
            }
        };

        self.finish(text, language, &outcome).await;
        self.remember_turn(text, &outcome.text);
        self.record(
            text,
            Some(outcome.text.clone()),
            outcome.executed_tools.clone(),
            started,
            outcome.error.clone(),
        );
    }

    async fn finish(&self, text: &str, language: &str, outcome: &ReActOutcome) {
        let parts = &self.parts;
        if outcome.waiting_for_user {
            self.enter(ApplicationState::Listening {
                prompt: outcome.text.clone(),
                is_queued_question: true,
            });
            debug!(%text, "Session: waiting for the customer's answer");
            return;
        }

        self.enter(ApplicationState::speaking(outcome.text.clone()));
        parts.speech.speak(&outcome.text, language).await;

        if let Some(reason) = parts.flags.take_staff_call() {
            info!(%reason, "Session: escalating to staff");
            self.enter(ApplicationState::StaffCall { reason });
        } else if parts.flags.take_end_request() {
            info!("Session: conversation ended, heading home");
            parts.navigation.return_to_base().await;
        } else {
            self.enter(ApplicationState::listening());
            if parts.state.current_kind() == StateKind::Listening {
                parts.navigation.arm_linger();
            }
        }
    }

    // Reasoning is only reachable from Listening; go through it when needed.
    fn enter_reasoning(&self) {
        let state = &self.parts.state;
        if state.transition(ApplicationState::Reasoning) {
            return;
        }
        if state.transition(ApplicationState::listening()) && state.transition(ApplicationState::Reasoning) {
            return;
        }
        state.force_transition(ApplicationState::Reasoning);
    }

    fn enter(&self, target: ApplicationState) {
        let state = &self.parts.state;
        if state.current() == target {
            return;
        }
        if !state.transition(target.clone()) {
            state.force_transition(target);
        }
    }

    fn memory_context(&self) -> Option<String> {
        let now = Instant::now().into_std();
        match lock(&self.parts.memory).context(now) {
            Ok(context) if !context.is_empty() => Some(context),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Session: memory context unavailable");
                None
            }
        }
    }

    fn remember_turn(&self, input: &str, reply: &str) {
        let now = Instant::now().into_std();
        let mut memory = lock(&self.parts.memory);
        memory.push_turn("user", input, now);
        memory.push_turn("assistant", reply, now);
    }

    // Fire-and-forget: a slow disk never delays the conversation.
    fn record(
        &self,
        input: &str,
        output: Option<String>,
        tools_executed: Vec<String>,
        started: Instant,
        error: Option<String>,
    ) {
        let record = InteractionRecord {
            timestamp: Utc::now(),
            input: input.to_string(),
            output,
            tools_executed,
            latency_ms: started.elapsed().as_millis() as u64,
            success: error.is_none(),
            error,
        };
        let log = Arc::clone(&self.parts.log);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = lock(&log).append(&record) {
                warn!(error = %e, "Session: failed to append interaction record");
            }
        });
    }

    fn current(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        lock(&self.current)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
