//! Legality of state transitions.
//!
//! Rules are evaluated in order:
//!
//! 1. re-entering an identical state is a no-op and therefore illegal;
//! 2. `Autonomous` may not be entered from `Arrived`, `Navigating` or
//!    `Speaking`;
//! 3. `Idle` and `Error` are reachable from anywhere;
//! 4. everything else must appear in the adjacency table.
//!
//! | From | Allowed targets |
//! |---|---|
//! | Idle | Greeting, Listening, Speaking, Autonomous, Navigating |
//! | Greeting | Listening, Speaking, Navigating |
//! | Listening | Listening, Reasoning, Speaking |
//! | Reasoning | Listening, Speaking, Navigating, StaffCall |
//! | Speaking | Listening, Speaking, Navigating, StaffCall |
//! | Navigating | Speaking, Navigating, Arrived |
//! | Arrived | Listening, Speaking, Navigating |
//! | StaffCall | – |
//! | Autonomous | Listening, Speaking, Navigating, Autonomous |
//! | Error | Speaking |

use guidebot_types::{ApplicationState, StateKind};

/// `true` when moving from `from` to `to` is permitted.
pub fn can_transition(from: &ApplicationState, to: &ApplicationState) -> bool {
    if from == to {
        return false;
    }

    let (from, to) = (from.kind(), to.kind());

    if to == StateKind::Autonomous
        && matches!(
            from,
            StateKind::Arrived | StateKind::Navigating | StateKind::Speaking
        )
    {
        return false;
    }

    if matches!(to, StateKind::Idle | StateKind::Error) {
        return true;
    }

    allowed_targets(from).contains(&to)
}

/// Adjacency list of `from`, excluding the universal `Idle` / `Error` edges.
pub fn allowed_targets(from: StateKind) -> &'static [StateKind] {
    use StateKind::*;
    match from {
        Idle => &[Greeting, Listening, Speaking, Autonomous, Navigating],
        Greeting => &[Listening, Speaking, Navigating],
        Listening => &[Listening, Reasoning, Speaking],
        Reasoning => &[Listening, Speaking, Navigating, StaffCall],
        Speaking => &[Listening, Speaking, Navigating, StaffCall],
        Navigating => &[Speaking, Navigating, Arrived],
        Arrived => &[Listening, Speaking, Navigating],
        StaffCall => &[],
        Autonomous => &[Listening, Speaking, Navigating, Autonomous],
        Error => &[Speaking],
    }
}
