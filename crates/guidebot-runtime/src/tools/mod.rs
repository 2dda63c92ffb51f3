//! The tool contract and the [`ToolRegistry`].
//!
//! A [`Tool`] is one capability the model may invoke: it declares a name, a
//! description and a parameter list, and executes against a JSON argument
//! map.  Parameter lists are derived from typed argument structs through
//! their `schemars` JSON Schema, so the declaration and the parser can never
//! drift apart.
//!
//! Failures never escape a tool: they come back as a failed [`ToolResult`]
//! whose message becomes the model's observation, giving it a chance to
//! self-correct.

mod motion;
mod session;
mod speech;

pub use motion::{GetLocationsTool, NavigateTool, TiltHeadTool, TurnTool};
pub use session::{CallStaffTool, EndConversationTool, PauseTool, SaveMemoryTool};
pub use speech::{AskUserTool, SpeakTool};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use guidebot_types::{ToolCall, ToolResult};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParam {
    /// JSON type name: `string`, `integer`, `number`, `boolean`, ...
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub required: bool,
}

/// Function-calling declaration handed to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: BTreeMap<String, ToolParam>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> BTreeMap<String, ToolParam>;

    /// Run the tool.  Must tolerate being cancelled at any await point.
    async fn execute(&self, args: &Map<String, Value>) -> ToolResult;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Derive a parameter list from the JSON Schema of `T`.
///
/// Field doc comments become descriptions; `Option` fields are optional.
pub fn params_from_schema<T: JsonSchema>() -> BTreeMap<String, ToolParam> {
    let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
    let required: Vec<&str> = schema["required"]
        .as_array()
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = schema["properties"].as_object() else {
        return BTreeMap::new();
    };

    properties
        .iter()
        .map(|(name, property)| {
            let param = ToolParam {
                kind: json_type(property),
                description: property["description"].as_str().unwrap_or_default().to_string(),
                required: required.contains(&name.as_str()),
            };
            (name.clone(), param)
        })
        .collect()
}

// `Option<T>` renders as `["string", "null"]`.
fn json_type(property: &Value) -> String {
    match &property["type"] {
        Value::String(kind) => kind.clone(),
        Value::Array(kinds) => kinds
            .iter()
            .filter_map(Value::as_str)
            .find(|k| *k != "null")
            .unwrap_or("string")
            .to_string(),
        _ => "string".to_string(),
    }
}

/// Deserialize a tool's typed arguments, or explain what is wrong.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: &Map<String, Value>) -> Result<T, ToolResult> {
    serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| ToolResult::fail(format!("{tool} の引数が不正です: {e}")))
}

/// Name → tool, ordered by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tool`, replacing any tool registered under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "ToolRegistry: replaced existing tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "ToolRegistry: unknown tool");
            return ToolResult::fail(format!("Unknown tool: {}", call.name));
        };
        let args = Value::Object(call.arguments.clone());
        info!(tool = %call.name, args = %args, "ToolRegistry: execute");
        let result = tool.execute(&call.arguments).await;
        if !result.success {
            warn!(tool = %call.name, message = %result.message, "ToolRegistry: tool failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Arguments used to exercise schema derivation.
    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct EchoArgs {
        /// Text to echo back.
        text: String,
        /// Number of repetitions.
        times: Option<u32>,
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text back."
        }

        fn parameters(&self) -> BTreeMap<String, ToolParam> {
            params_from_schema::<EchoArgs>()
        }

        async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
            match parse_args::<EchoArgs>(self.name(), args) {
                Ok(args) => ToolResult::ok(args.text.repeat(args.times.unwrap_or(1) as usize)),
                Err(failure) => failure,
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    #[test]
    fn params_are_derived_from_schema() {
        let params = params_from_schema::<EchoArgs>();
        assert_eq!(params["text"].kind, "string");
        assert!(params["text"].required);
        assert_eq!(params["text"].description, "Text to echo back.");
        assert_eq!(params["times"].kind, "integer");
        assert!(!params["times"].required);
    }

    #[test]
    fn schema_serializes_in_declaration_shape() {
        let schema = serde_json::to_value(registry().schemas()).unwrap();
        assert_eq!(schema[0]["name"], "echo");
        assert_eq!(schema[0]["parameters"]["text"]["type"], "string");
        assert_eq!(schema[0]["parameters"]["text"]["required"], true);
    }

    #[tokio::test]
    async fn execute_dispatches_by_name() {
        let result = registry()
            .execute(&ToolCall::new("echo", json!({ "text": "ya", "times": 2 })))
            .await;
        assert!(result.success);
        assert_eq!(result.message, "yaya");
    }

    #[tokio::test]
    async fn unknown_tool_fails() {
        let result = registry().execute(&ToolCall::new("fly", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.message, "Unknown tool: fly");
    }

    #[tokio::test]
    async fn malformed_arguments_fail_with_explanation() {
        let result = registry()
            .execute(&ToolCall::new("echo", json!({ "times": "many" })))
            .await;
        assert!(!result.success);
        assert!(result.message.starts_with("echo の引数が不正です"));
    }

    #[test]
    fn registry_lists_names_in_order() {
        let mut registry = registry();
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.names(), vec!["echo".to_string()]);
        assert_eq!(registry.all().len(), 1);
        assert!(registry.get("echo").is_some());
    }
}
