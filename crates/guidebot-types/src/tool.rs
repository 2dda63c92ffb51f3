//! The tool-calling contract between the language model and the robot.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Build a call from a name and a JSON object literal.  Non-object
    /// values produce a call with no arguments.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// String argument `key`, if present and a string.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Outcome of a tool execution, fed back to the model as an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    /// Pause the reasoning loop until the user speaks again.
    #[serde(default)]
    pub wait_for_user: bool,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            wait_for_user: false,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            wait_for_user: false,
        }
    }

    /// A successful result that hands the turn back to the user.
    pub fn waiting(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            wait_for_user: true,
        }
    }
}
