//! Events routed over the headless event bus.
//!
//! The movement subsystem reports progress through push callbacks; adapters
//! wrap each callback into a [`RobotEvent`] and publish it so the runtime can
//! route it to whichever component is waiting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::ApplicationState;

/// Unified event wrapper for the headless event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"guidebot-hal::sim"`
    pub source: String,
    pub payload: EventPayload,
}

impl RobotEvent {
    /// Wrap `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Progress of a `goTo` command.
    NavigationStatus { location: String, status: NavStatus },
    /// Completion of a non-navigation movement such as `turnBy`.
    Movement(MovementStatus),
    /// The person detector changed its verdict.
    PersonDetected(bool),
    /// A finished speech-recognition result.
    UserUtterance { text: String, language: String },
    StateChanged {
        from: ApplicationState,
        to: ApplicationState,
    },
    /// A member of staff was requested.
    StaffAlert { reason: String },
    SystemFault { component: String, message: String },
}

/// Status strings reported by the navigation subsystem for a `goTo` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavStatus {
    Going,
    Calculating,
    Complete,
    Abort,
    Obstacle,
    Reposing,
    Other(String),
}

impl NavStatus {
    /// Parse a raw status string.  Unknown strings are kept verbatim.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "going" => Self::Going,
            "calculating" => Self::Calculating,
            "complete" => Self::Complete,
            "abort" => Self::Abort,
            "obstacle" | "obstacle detected" => Self::Obstacle,
            "reposing" => Self::Reposing,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Going => "going",
            Self::Calculating => "calculating",
            Self::Complete => "complete",
            Self::Abort => "abort",
            Self::Obstacle => "obstacle",
            Self::Reposing => "reposing",
            Self::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for NavStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion event of a movement primitive (`turnBy`, `tiltAngle`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementStatus {
    /// e.g. `"turnBy"`
    pub kind: String,
    pub status: NavStatus,
}

impl MovementStatus {
    pub const TURN_BY: &'static str = "turnBy";

    pub fn turn(status: NavStatus) -> Self {
        Self {
            kind: Self::TURN_BY.to_string(),
            status,
        }
    }

    /// `true` for a finished (`complete` or `abort`) `turnBy`.
    pub fn is_finished_turn(&self) -> bool {
        self.kind == Self::TURN_BY && matches!(self.status, NavStatus::Complete | NavStatus::Abort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nav_status_parses_known_strings() {
        assert_eq!(NavStatus::parse("complete"), NavStatus::Complete);
        assert_eq!(NavStatus::parse("ABORT"), NavStatus::Abort);
        assert_eq!(NavStatus::parse("obstacle detected"), NavStatus::Obstacle);
        assert_eq!(NavStatus::parse("reposing"), NavStatus::Reposing);
    }

    #[test]
    fn nav_status_keeps_unknown_strings() {
        let status = NavStatus::parse("docking");
        assert_eq!(status, NavStatus::Other("docking".to_string()));
        assert_eq!(status.to_string(), "docking");
    }

    #[test]
    fn finished_turn_detection() {
        assert!(MovementStatus::turn(NavStatus::Complete).is_finished_turn());
        assert!(MovementStatus::turn(NavStatus::Abort).is_finished_turn());
        assert!(!MovementStatus::turn(NavStatus::Going).is_finished_turn());
        let tilt = MovementStatus {
            kind: "tiltAngle".to_string(),
            status: NavStatus::Complete,
        };
        assert!(!tilt.is_finished_turn());
    }

    #[test]
    fn event_roundtrip() {
        let event = RobotEvent::new(
            "guidebot-hal::sim",
            EventPayload::NavigationStatus {
                location: "レジ".to_string(),
                status: NavStatus::Going,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: RobotEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.source, event.source);
    }
}
