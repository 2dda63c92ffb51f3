//! [`ConsoleSpeech`] – prints the robot's voice to the terminal.

use std::sync::Mutex;

use async_trait::async_trait;
use colored::Colorize;
use guidebot_hal::{Speech, Transcript};
use guidebot_types::GuideError;

/// Speech output for the REPL.  Input arrives as typed lines, so `listen`
/// never hears anything.
#[derive(Default)]
pub struct ConsoleSpeech {
    last: Mutex<Option<String>>,
}

impl ConsoleSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent utterance.
    pub fn last_spoken(&self) -> Option<String> {
        self.last.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Speech for ConsoleSpeech {
    async fn speak(&self, text: &str, language: &str) -> bool {
        println!("\r  {} {} {}", "🤖".bold(), text.green(), format!("[{language}]").dimmed());
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Some(text.to_string());
        true
    }

    async fn stop(&self) {
        println!("\r  {}", "(speech interrupted)".dimmed());
    }

    async fn listen(&self, language: &str, prompt: &str) -> Result<Transcript, GuideError> {
        if !prompt.is_empty() {
            self.speak(prompt, language).await;
        }
        Ok(Transcript::Empty)
    }
}
