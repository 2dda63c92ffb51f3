//! [`ScriptedBackend`] – a [`ModelBackend`] that replays canned replies.
//!
//! Used by tests and by the CLI's offline mode.  Each call pops the next
//! [`Step`]; once the script is empty the optional repeat reply is returned
//! forever, otherwise the call fails.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::llm_driver::{LlmError, ModelBackend, ModelRequest, ModelResponse};

#[derive(Debug, Clone)]
pub enum Step {
    Respond(ModelResponse),
    /// Reply after sleeping, to exercise timeouts.
    Delay(Duration, ModelResponse),
    Fail(String),
}

#[derive(Default)]
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    repeat: Option<ModelResponse>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedBackend {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Reply with `response` on every call.
    pub fn repeating(response: ModelResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::default()
        }
    }

    pub fn push(&self, step: Step) {
        lock(&self.steps).push_back(step);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
        lock(&self.requests).push(request);
        let step = lock(&self.steps).pop_front();
        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Delay(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(Step::Fail(reason)) => Err(LlmError::BadResponse(reason)),
            None => self
                .repeat
                .clone()
                .ok_or_else(|| LlmError::BadResponse("script exhausted".to_string())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
