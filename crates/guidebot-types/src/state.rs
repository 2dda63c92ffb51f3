//! [`ApplicationState`] – what the robot is doing right now.
//!
//! Exactly one state is current at any instant.  States are never mutated in
//! place: the kernel's `StateMachine` replaces the whole value on every
//! accepted transition.

use serde::{Deserialize, Serialize};

/// The closed set of application states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data")]
pub enum ApplicationState {
    /// Waiting for a person to show up.
    Idle,
    /// Showing the greeting to a freshly detected person.
    Greeting,
    /// Speech recognition is open.
    Listening {
        /// Text spoken before the microphone opens.
        prompt: String,
        /// `true` when the robot is waiting on the answer to its own question.
        is_queued_question: bool,
    },
    /// A ReAct run is in flight.
    Reasoning,
    /// Text-to-speech is playing.
    Speaking {
        text: String,
        is_welcome: bool,
        /// State to enter automatically once speech completes.
        next_state: Option<Box<ApplicationState>>,
    },
    /// The drive base is moving towards a saved location.
    Navigating {
        destination_id: String,
        display_name: String,
        /// Text to speak on arrival.
        pending_announcement: Option<String>,
    },
    /// The robot reached a guided destination.
    Arrived {
        location_id: String,
        display_name: String,
        announcement: Option<String>,
        listen_after_arrival: bool,
    },
    /// A human member of staff has been called.
    StaffCall { reason: String },
    /// Self-directed behaviour (wandering, patrol, idle talk).
    Autonomous { task_description: String },
    Error { message: String, recoverable: bool },
}

/// Payload-free tag of an [`ApplicationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    Idle,
    Greeting,
    Listening,
    Reasoning,
    Speaking,
    Navigating,
    Arrived,
    StaffCall,
    Autonomous,
    Error,
}

impl ApplicationState {
    /// The variant tag of this state.
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Idle => StateKind::Idle,
            Self::Greeting => StateKind::Greeting,
            Self::Listening { .. } => StateKind::Listening,
            Self::Reasoning => StateKind::Reasoning,
            Self::Speaking { .. } => StateKind::Speaking,
            Self::Navigating { .. } => StateKind::Navigating,
            Self::Arrived { .. } => StateKind::Arrived,
            Self::StaffCall { .. } => StateKind::StaffCall,
            Self::Autonomous { .. } => StateKind::Autonomous,
            Self::Error { .. } => StateKind::Error,
        }
    }

    /// `Listening` with an empty prompt.
    pub fn listening() -> Self {
        Self::Listening {
            prompt: String::new(),
            is_queued_question: false,
        }
    }

    /// `Speaking` with no follow-up state.
    pub fn speaking(text: impl Into<String>) -> Self {
        Self::Speaking {
            text: text.into(),
            is_welcome: false,
            next_state: None,
        }
    }

    /// `Navigating` towards `destination_id`, displayed under the same name.
    pub fn navigating(destination_id: impl Into<String>) -> Self {
        let destination_id = destination_id.into();
        Self::Navigating {
            display_name: destination_id.clone(),
            destination_id,
            pending_announcement: None,
        }
    }

    pub fn autonomous(task_description: impl Into<String>) -> Self {
        Self::Autonomous {
            task_description: task_description.into(),
        }
    }

    /// Short diagnostic label with truncated payloads, for log lines.
    pub fn label(&self) -> String {
        match self {
            Self::Idle => "Idle".to_string(),
            Self::Greeting => "Greeting".to_string(),
            Self::Listening {
                prompt,
                is_queued_question,
            } => format!(
                "Listening(prompt='{}', queued={is_queued_question})",
                truncate(prompt, 20)
            ),
            Self::Reasoning => "Reasoning".to_string(),
            Self::Speaking {
                text, is_welcome, ..
            } => format!("Speaking(text='{}', welcome={is_welcome})", truncate(text, 20)),
            Self::Navigating { destination_id, .. } => {
                format!("Navigating(dest='{destination_id}')")
            }
            Self::Arrived { location_id, .. } => format!("Arrived(loc='{location_id}')"),
            Self::StaffCall { reason } => format!("StaffCall(reason='{}')", truncate(reason, 20)),
            Self::Autonomous { task_description } => {
                format!("Autonomous(task='{}')", truncate(task_description, 20))
            }
            Self::Error { message, .. } => format!("Error(msg='{}')", truncate(message, 30)),
        }
    }
}

impl std::fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

// Char-based so multi-byte Japanese text never splits mid-codepoint.
fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
