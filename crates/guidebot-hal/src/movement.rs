//! The drive base and head of the robot.
//!
//! `go_to` and `turn_by` return as soon as the command has been accepted.
//! Progress (`going`, `complete`, `abort`, ...) arrives later on the event
//! bus, and callers that need the outcome wait on a rendezvous armed before
//! issuing the command.

use async_trait::async_trait;
use guidebot_types::GuideError;

/// Saved location the robot returns to between guided tours.
pub const HOME_BASE: &str = "home base";

#[async_trait]
pub trait Movement: Send + Sync {
    /// Start driving to a saved location.
    async fn go_to(&self, location: &str) -> Result<(), GuideError>;

    /// Halt any drive or turn in progress.
    async fn stop_movement(&self);

    /// Rotate in place by `degrees` at `velocity` (0.0–1.0).
    async fn turn_by(&self, degrees: i32, velocity: f32) -> Result<(), GuideError>;

    /// Tilt the head to an absolute angle.
    async fn tilt_head(&self, degrees: i32) -> Result<(), GuideError>;

    /// Names of the saved locations, including the home base.
    fn locations(&self) -> Vec<String>;
}
