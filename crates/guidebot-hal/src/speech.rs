//! Text-to-speech and speech recognition.

use async_trait::async_trait;
use guidebot_types::GuideError;

/// Result of one recognition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    Text(String),
    /// The recogniser heard nothing usable (`"empty_result"`).
    Empty,
}

#[async_trait]
pub trait Speech: Send + Sync {
    /// Speak `text` and wait for playback to finish.
    ///
    /// Returns `false` when playback failed or was interrupted by
    /// [`Speech::stop`].
    async fn speak(&self, text: &str, language: &str) -> bool;

    /// Interrupt any utterance in progress.
    async fn stop(&self);

    /// Open the microphone after speaking `prompt`.
    async fn listen(&self, language: &str, prompt: &str) -> Result<Transcript, GuideError>;
}
