//! `guidebot-runtime` – the control core of the shop-guide robot.
//!
//! # Modules
//!
//! - [`react`] – [`ReActOrchestrator`]: the bounded reason-act-observe loop
//!   that turns one customer utterance into tool executions and a reply.
//! - [`llm_driver`] – [`LlmDriver`]: an OpenAI-compatible chat client with
//!   native tool calling, behind the [`ModelBackend`] seam.
//!   [`scripted`] provides a deterministic backend for tests and demos.
//! - [`tools`] – the [`Tool`] trait, the [`ToolRegistry`] and the ten robot
//!   capabilities the model can invoke.
//! - [`navigation`] – [`NavigationOrchestrator`]: guided trips with arrival
//!   waits, bounded retries, queued stops and a linger timer that returns
//!   the robot to its home base.
//! - [`session`] – [`ConversationSession`]: drives one utterance through
//!   `Reasoning` → `Speaking` → `Listening` with barge-in.
//! - [`autonomy`] / [`patrol`] – self-directed behaviour while nobody is
//!   being served.
//! - [`supervisor`] – [`WatchdogLoop`]: forces a reset when the robot sits
//!   in `Reasoning` for too long.
//! - [`robot`] – [`GuideRobot`]: owns every component and routes bus events.
//! - [`telemetry`] – [`init_tracing`]: console or JSON logs with an optional
//!   OTLP span exporter.

pub mod autonomy;
pub mod flags;
pub mod llm_driver;
pub mod navigation;
pub mod patrol;
pub mod phrases;
pub mod react;
pub mod robot;
pub mod scripted;
pub mod session;
pub mod supervisor;
pub mod telemetry;
pub mod tools;

pub use autonomy::{AutonomyConfig, AutonomyScheduler, BehaviorScheduler, IdleBehavior, Persona};
pub use flags::SessionFlags;
pub use llm_driver::{ChatMessage, LlmDriver, LlmError, ModelBackend, ModelRequest, ModelResponse, Role};
pub use navigation::{NavigationConfig, NavigationOrchestrator};
pub use patrol::{PatrolConfig, PatrolLoop};
pub use react::{ReActConfig, ReActOrchestrator, ReActOutcome};
pub use robot::{GuideRobot, RobotConfig, Stores};
pub use scripted::{ScriptedBackend, Step};
pub use session::{ConversationSession, SessionConfig};
pub use supervisor::{Recovery, WatchdogConfig, WatchdogLoop};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use tools::{Tool, ToolRegistry, ToolSchema};
