//! [`LlmDriver`] – OpenAI-compatible model backend with function calling.
//!
//! The reasoning loop talks to the model through the [`ModelBackend`] trait.
//! [`LlmDriver`] implements it over an OpenAI-compatible
//! `/v1/chat/completions` endpoint (OpenAI, Ollama, vLLM, ...), declaring the
//! registered tools in the `tools` field and reading `tool_calls` back.
//!
//! # Example
//!
//! ```rust,no_run
//! use guidebot_runtime::llm_driver::{LlmDriver, ModelBackend, ModelRequest};
//!
//! # async fn demo() -> Result<(), guidebot_runtime::LlmError> {
//! let driver = LlmDriver::new("http://localhost:11434", "qwen2.5");
//! let reply = driver
//!     .generate(ModelRequest::new("靴下売り場はどこですか？"))
//!     .await?;
//! println!("{:?} {:?}", reply.text, reply.tool_calls);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use guidebot_types::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;

use crate::tools::ToolSchema;

// ─────────────────────────────────────────────────────────────────────────────
// Prompts
// ─────────────────────────────────────────────────────────────────────────────

/// System instruction used when the caller supplies none.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
あなたは店舗案内ロボットです。お客様の質問に短く丁寧な日本語で答えてください。
売り場への案内が必要な場合は navigate ツールを使い、分からない地点は get_available_locations で確認してください。";

/// Rules appended to every system instruction.
pub const GUIDE_GUIDELINES: &str = "\
## Guidelines
- Call navigate at most once per customer request.
- If a tool fails, explain the problem to the customer instead of retrying the same call.
- Ask a clarifying question with ask_user when the request is ambiguous.
- Use call_staff for fitting rooms, payment, or anything a robot cannot handle.";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend contract
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the reasoning-loop history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool calls requested in an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
        }
    }
}

/// Everything the model sees on one call.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub prompt: String,
    pub tools: Vec<ToolSchema>,
    pub history: Vec<ChatMessage>,
    pub system_instruction: Option<String>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// The model's reply: free text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }
}

/// A language model that can request tool calls.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, LlmError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireMessage {
    role: Role,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded object, per the OpenAI wire format.
    #[serde(default)]
    arguments: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an OpenAI-compatible chat-completions endpoint.
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LlmDriver {
    /// Point the driver at `base_url` (e.g. `"http://localhost:11434"`) using
    /// `model`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    fn build_body<'a>(&'a self, request: &ModelRequest) -> ChatRequest<'a> {
        let system = format!(
            "{}\n\n{}",
            request
                .system_instruction
                .as_deref()
                .unwrap_or(DEFAULT_SYSTEM_PROMPT),
            GUIDE_GUIDELINES
        );

        let mut messages = vec![WireMessage {
            role: Role::System,
            content: system,
        }];
        messages.extend(request.history.iter().map(|m| WireMessage {
            role: m.role.clone(),
            content: render_history_content(m),
        }));
        messages.push(WireMessage {
            role: Role::User,
            content: request.prompt.clone(),
        });

        ChatRequest {
            model: &self.model,
            messages,
            tools: request.tools.iter().map(function_declaration).collect(),
            stream: false,
        }
    }
}

#[async_trait]
impl ModelBackend for LlmDriver {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_body(&request);
        debug!(model = %self.model, tools = body.tools.len(), "LlmDriver: request");

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response: ChatResponse = http.send().await?.error_for_status()?.json().await?;
        parse_response(response)
    }
}

/// Assistant tool-call turns are replayed as text: no `tool` role messages
/// follow them, and strict servers reject dangling `tool_calls`.
fn render_history_content(message: &ChatMessage) -> String {
    if message.tool_calls.is_empty() {
        return message.content.clone();
    }
    let calls: Vec<String> = message
        .tool_calls
        .iter()
        .map(|c| format!("{}({})", c.name, Value::Object(c.arguments.clone())))
        .collect();
    if message.content.is_empty() {
        format!("Called tools: {}", calls.join(", "))
    } else {
        format!("{}\nCalled tools: {}", message.content, calls.join(", "))
    }
}

/// `{"type":"function","function":{name, description, parameters}}` with a
/// JSON Schema object built from the declared parameter list.
fn function_declaration(schema: &ToolSchema) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for (name, param) in &schema.parameters {
        properties.insert(
            name.clone(),
            json!({ "type": param.kind, "description": param.description }),
        );
        if param.required {
            required.push(Value::String(name.clone()));
        }
    }
    json!({
        "type": "function",
        "function": {
            "name": schema.name,
            "description": schema.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        }
    })
}

fn parse_response(response: ChatResponse) -> Result<ModelResponse, LlmError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))?;

    let mut tool_calls = Vec::with_capacity(message.tool_calls.len());
    for call in message.tool_calls {
        let arguments = if call.function.arguments.trim().is_empty() {
            Map::new()
        } else {
            serde_json::from_str::<Map<String, Value>>(&call.function.arguments).map_err(|e| {
                LlmError::BadResponse(format!(
                    "arguments of {} are not a JSON object: {e}",
                    call.function.name
                ))
            })?
        };
        tool_calls.push(ToolCall {
            name: call.function.name,
            arguments,
        });
    }

    Ok(ModelResponse {
        text: message.content.filter(|t| !t.trim().is_empty()),
        tool_calls,
    })
}
