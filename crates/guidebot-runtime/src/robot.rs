//! [`GuideRobot`] – owns and wires every component.
//!
//! The coordinator builds the tool registry, the orchestrators and the
//! background loops from a [`RobotConfig`], then routes bus traffic:
//!
//! | Topic | Payload | Destination |
//! |---|---|---|
//! | Navigation | `NavigationStatus` | navigation awaiter + orchestrator |
//! | Movement | `Movement` | turn awaiter |
//! | Perception | `PersonDetected(true)` | autonomy preemption, greeting |
//! | Conversation | `UserUtterance` | patrol/autonomy preemption, conversation session |
//!
//! State changes back to `Idle` resume the autonomy scheduler unless a patrol
//! owns the floor.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use guidebot_hal::{Movement, Speech};
use guidebot_kernel::{StateChange, StateMachine};
use guidebot_memory::{InteractionLogStore, MemoryStore, StoreError};
use guidebot_middleware::{EventBus, NavigationAwaiter, Topic, TopicReceiver, TurnAwaiter};
use guidebot_types::{ApplicationState, EventPayload, GuideError, RobotEvent, StateKind};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::autonomy::{AutonomyConfig, AutonomyScheduler, Persona};
use crate::flags::SessionFlags;
use crate::llm_driver::ModelBackend;
use crate::navigation::{NavigationConfig, NavigationOrchestrator};
use crate::patrol::{PatrolConfig, PatrolLoop};
use crate::phrases;
use crate::react::{ReActConfig, ReActOrchestrator};
use crate::session::{ConversationSession, SessionConfig, SessionParts};
use crate::supervisor::{Recovery, WatchdogConfig, WatchdogLoop};
use crate::tools::{
    AskUserTool, CallStaffTool, EndConversationTool, GetLocationsTool, NavigateTool, PauseTool,
    SaveMemoryTool, SpeakTool, TiltHeadTool, ToolRegistry, TurnTool,
};

const SOURCE: &str = "guidebot-runtime::robot";

/// Every tunable of the runtime, grouped by component.
#[derive(Debug, Clone, Default)]
pub struct RobotConfig {
    pub react: ReActConfig,
    pub navigation: NavigationConfig,
    pub session: SessionConfig,
    pub autonomy: AutonomyConfig,
    pub patrol: PatrolConfig,
    pub watchdog: WatchdogConfig,
    pub persona: Persona,
}

/// The persistence collaborators.
pub struct Stores {
    pub memory: MemoryStore,
    pub log: InteractionLogStore,
}

impl Stores {
    /// Open `memory.db` and `interactions.db` under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        Ok(Self {
            memory: MemoryStore::open(dir.join("memory.db"))?,
            log: InteractionLogStore::open(dir.join("interactions.db"))?,
        })
    }

    /// Throwaway stores; everything is lost on exit.
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            memory: MemoryStore::open_in_memory()?,
            log: InteractionLogStore::open_in_memory()?,
        })
    }
}

struct Routes {
    navigation: TopicReceiver,
    movement: TopicReceiver,
    perception: TopicReceiver,
    conversation: TopicReceiver,
    changes: broadcast::Receiver<StateChange>,
}

pub struct GuideRobot {
    language: String,
    bus: EventBus,
    state: Arc<StateMachine>,
    flags: Arc<SessionFlags>,
    movement: Arc<dyn Movement>,
    speech: Arc<dyn Speech>,
    registry: Arc<ToolRegistry>,
    navigation: Arc<NavigationOrchestrator>,
    session: Arc<ConversationSession>,
    autonomy: Arc<AutonomyScheduler>,
    patrol: Arc<PatrolLoop>,
    log: Arc<Mutex<InteractionLogStore>>,
    watchdog: Mutex<Option<WatchdogLoop>>,
    shutdown: CancellationToken,
}

impl GuideRobot {
    pub fn new(
        config: RobotConfig,
        backend: Arc<dyn ModelBackend>,
        movement: Arc<dyn Movement>,
        speech: Arc<dyn Speech>,
        bus: EventBus,
        stores: Stores,
    ) -> Arc<Self> {
        let language = config.session.language.clone();
        let shutdown = CancellationToken::new();
        let state = Arc::new(StateMachine::new());
        let flags = Arc::new(SessionFlags::new());
        let turns = Arc::new(TurnAwaiter::new());
        let memory = Arc::new(Mutex::new(stores.memory));
        let log = Arc::new(Mutex::new(stores.log));

        let navigation = Arc::new(NavigationOrchestrator::new(
            config.navigation.clone(),
            Arc::clone(&state),
            Arc::clone(&movement),
            Arc::clone(&speech),
            Arc::new(NavigationAwaiter::new()),
            Arc::clone(&turns),
            Arc::clone(&flags),
        ));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SpeakTool::new(Arc::clone(&speech), language.clone())));
        registry.register(Arc::new(AskUserTool::new(Arc::clone(&speech), language.clone())));
        registry.register(Arc::new(NavigateTool::new(Arc::clone(&navigation))));
        registry.register(Arc::new(TurnTool::new(
            Arc::clone(&movement),
            Arc::clone(&turns),
            config.navigation.turn_timeout,
        )));
        registry.register(Arc::new(TiltHeadTool::new(Arc::clone(&movement))));
        registry.register(Arc::new(GetLocationsTool::new(Arc::clone(&movement))));
        registry.register(Arc::new(CallStaffTool::new(Arc::clone(&flags), bus.clone())));
        registry.register(Arc::new(SaveMemoryTool::new(Arc::clone(&memory))));
        registry.register(Arc::new(EndConversationTool::new(Arc::clone(&flags))));
        registry.register(Arc::new(PauseTool::new(
            Arc::clone(&movement),
            Arc::clone(&speech),
            language.clone(),
        )));
        let registry = Arc::new(registry);

        let react = Arc::new(ReActOrchestrator::new(backend, Arc::clone(&registry), config.react));
        let session = Arc::new(ConversationSession::new(
            config.session,
            SessionParts {
                state: Arc::clone(&state),
                react,
                navigation: Arc::clone(&navigation),
                movement: Arc::clone(&movement),
                speech: Arc::clone(&speech),
                flags: Arc::clone(&flags),
                memory,
                log: Arc::clone(&log),
            },
        ));
        let autonomy = Arc::new(AutonomyScheduler::new(
            config.autonomy,
            config.persona,
            Arc::clone(&state),
            Arc::clone(&navigation),
            Arc::clone(&movement),
            Arc::clone(&speech),
            shutdown.clone(),
        ));
        let patrol = Arc::new(PatrolLoop::new(
            config.patrol,
            Arc::clone(&state),
            Arc::clone(&navigation),
            Arc::clone(&movement),
            Arc::clone(&speech),
            Arc::clone(&autonomy),
            shutdown.clone(),
        ));
        let watchdog = WatchdogLoop::new(config.watchdog, Arc::clone(&state));

        Arc::new(Self {
            language,
            bus,
            state,
            flags,
            movement,
            speech,
            registry,
            navigation,
            session,
            autonomy,
            patrol,
            log,
            watchdog: Mutex::new(Some(watchdog)),
            shutdown,
        })
    }

    /// Spawn the event router, the watchdog and the autonomy loop.
    pub fn start(self: &Arc<Self>) {
        // Subscribe before returning so events published right after
        // `start` are not lost.
        let routes = Routes {
            navigation: self.bus.subscribe_to(Topic::Navigation),
            movement: self.bus.subscribe_to(Topic::Movement),
            perception: self.bus.subscribe_to(Topic::Perception),
            conversation: self.bus.subscribe_to(Topic::Conversation),
            changes: self.state.subscribe(),
        };
        let this = Arc::clone(self);
        tokio::spawn(async move { this.route_events(routes).await });

        let watchdog = self
            .watchdog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(watchdog) = watchdog {
            let recovery: Arc<dyn Recovery> = Arc::clone(self) as Arc<dyn Recovery>;
            tokio::spawn(watchdog.run(recovery, self.shutdown.clone()));
        }

        self.autonomy.start();
        info!(tools = ?self.registry.names(), "GuideRobot: started");
    }

    /// Stop every background loop and the conversation in flight.
    pub fn shutdown(&self) {
        self.session.cancel();
        self.navigation.cancel();
        self.shutdown.cancel();
        info!("GuideRobot: shut down");
    }

    /// Publish a recognised utterance, as the speech pipeline would.
    pub fn hear(&self, text: &str) -> Result<usize, GuideError> {
        self.bus.publish(RobotEvent::new(
            SOURCE,
            EventPayload::UserUtterance {
                text: text.to_string(),
                language: self.language.clone(),
            },
        ))
    }

    pub fn state(&self) -> &Arc<StateMachine> {
        &self.state
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn navigation(&self) -> &Arc<NavigationOrchestrator> {
        &self.navigation
    }

    pub fn session(&self) -> &Arc<ConversationSession> {
        &self.session
    }

    pub fn autonomy(&self) -> &Arc<AutonomyScheduler> {
        &self.autonomy
    }

    pub fn patrol(&self) -> &Arc<PatrolLoop> {
        &self.patrol
    }

    pub fn interaction_log(&self) -> &Arc<Mutex<InteractionLogStore>> {
        &self.log
    }

    async fn route_events(self: Arc<Self>, routes: Routes) {
        let Routes {
            mut navigation,
            mut movement,
            mut perception,
            mut conversation,
            mut changes,
        } = routes;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(event) = navigation.next() => {
                    if let EventPayload::NavigationStatus { location, status } = event.payload {
                        self.navigation.on_navigation_status(&location, &status);
                    }
                }
                Some(event) = movement.next() => {
                    if let EventPayload::Movement(status) = event.payload {
                        self.navigation.on_movement_status(&status);
                    }
                }
                Some(event) = perception.next() => {
                    if let EventPayload::PersonDetected(true) = event.payload {
                        let this = Arc::clone(&self);
                        tokio::spawn(async move { this.on_person_detected().await });
                    }
                }
                Some(event) = conversation.next() => {
                    if let EventPayload::UserUtterance { text, language } = event.payload {
                        self.yield_floor().await;
                        self.session.handle_utterance(&text, &language);
                    }
                }
                change = changes.recv() => match change {
                    Ok(change) => self.on_state_change(change.to.kind()),
                    Err(RecvError::Lagged(n)) => warn!(lagged_by = n, "GuideRobot: state changes lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("GuideRobot: event router stopped");
    }

    fn on_state_change(&self, to: StateKind) {
        if to == StateKind::Idle && !self.patrol.is_active() && self.autonomy.start() {
            debug!("GuideRobot: autonomy resumed");
        }
    }

    // A customer spoke: self-directed movement ends before the turn starts.
    async fn yield_floor(&self) {
        let roaming = self.state.current_kind() == StateKind::Autonomous;
        self.autonomy.stop();
        if self.patrol.is_active() {
            info!("GuideRobot: customer spoke, ending patrol");
            self.patrol.stop().await;
        } else if roaming {
            info!("GuideRobot: customer spoke, halting autonomous move");
            self.movement.stop_movement().await;
        }
    }

    async fn on_person_detected(&self) {
        if self.patrol.is_active() {
            self.patrol.stop().await;
        }
        if !self.autonomy.handle_person_detected().await {
            debug!(state = %self.state.current(), "GuideRobot: person detected while busy");
            return;
        }
        if self.state.current_kind() == StateKind::Autonomous {
            self.state.transition(ApplicationState::Idle);
        }
        if !self.state.transition(ApplicationState::Greeting) {
            return;
        }
        info!("GuideRobot: greeting");
        self.speech.speak(phrases::GREETING, &self.language).await;
        if self.state.current() == ApplicationState::Greeting
            && self.state.transition(ApplicationState::listening())
        {
            self.navigation.arm_linger();
        }
    }
}

#[async_trait]
impl Recovery for GuideRobot {
    async fn force_reset(&self) {
        warn!(state = %self.state.current(), "GuideRobot: forcing reset");
        self.session.cancel();
        self.speech.stop().await;
        self.movement.stop_movement().await;
        self.navigation.cancel();
        self.patrol.stop().await;
        self.flags.clear();
        self.state.force_transition(ApplicationState::Idle);
        self.autonomy.stop();
        self.autonomy.start();
    }
}
