//! [`ReActOrchestrator`] – the Reason+Act loop.
//!
//! Each iteration:
//!
//! 1. **Reason** – call the [`ModelBackend`] with the current prompt, the
//!    registered tool schemas and the history of this run, bounded by the
//!    per-call timeout.
//! 2. **Answer** – a reply without tool calls ends the run; the reasoning
//!    trace prefix (`Thought: ...`) is stripped before the text is returned.
//! 3. **Act** – otherwise the requested tools run strictly in order and their
//!    results become the next prompt.
//!
//! The loop is bounded by `max_iterations`.  Every failure inside it, a
//! panicking tool or backend included, is turned into a fixed apology:
//! callers always get a [`ReActOutcome`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use guidebot_types::{ToolCall, ToolResult};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::llm_driver::{ChatMessage, ModelBackend, ModelRequest};
use crate::phrases;
use crate::tools::ToolRegistry;

#[derive(Debug, Clone)]
pub struct ReActConfig {
    pub max_iterations: u32,
    /// Bound on a single model call.  Never retried.
    pub call_timeout: Duration,
}

impl Default for ReActConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            call_timeout: Duration::from_secs(12),
        }
    }
}

/// What a run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReActOutcome {
    /// Text to speak to the customer.
    pub text: String,
    /// A tool asked to hand the turn back to the customer.
    pub waiting_for_user: bool,
    pub iteration_count: u32,
    /// Tool names in execution order, synthesized calls included.
    pub executed_tools: Vec<String>,
    /// Why the run fell back to a fixed phrase, if it did.
    pub error: Option<String>,
}

impl ReActOutcome {
    fn answer(text: String, iteration_count: u32, executed_tools: Vec<String>) -> Self {
        Self {
            text,
            waiting_for_user: false,
            iteration_count,
            executed_tools,
            error: None,
        }
    }

    fn fallback(text: &str, iteration_count: u32, executed_tools: Vec<String>, error: String) -> Self {
        Self {
            text: text.to_string(),
            waiting_for_user: false,
            iteration_count,
            executed_tools,
            error: Some(error),
        }
    }
}

pub struct ReActOrchestrator {
    backend: Arc<dyn ModelBackend>,
    registry: Arc<ToolRegistry>,
    config: ReActConfig,
}

impl ReActOrchestrator {
    pub fn new(backend: Arc<dyn ModelBackend>, registry: Arc<ToolRegistry>, config: ReActConfig) -> Self {
        Self {
            backend,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run the loop for one customer utterance.
    pub async fn run(
        &self,
        user_input: &str,
        system_override: Option<&str>,
        extra_context: Option<&str>,
    ) -> ReActOutcome {
        let mut prompt = match extra_context {
            Some(context) if !context.trim().is_empty() => {
                format!("{context}\n\nユーザーの発言: {user_input}")
            }
            _ => user_input.to_string(),
        };
        let tools = self.registry.schemas();
        let mut history: Vec<ChatMessage> = Vec::new();
        let mut executed: Vec<String> = Vec::new();
        let mut iteration = 0;

        info!(input = %user_input, "ReAct: run started");

        while iteration < self.config.max_iterations {
            iteration += 1;

            // ── Reason ────────────────────────────────────────────────────────
            let request = ModelRequest {
                prompt: prompt.clone(),
                tools: tools.clone(),
                history: history.clone(),
                system_instruction: system_override.map(str::to_string),
            };
            let call = AssertUnwindSafe(self.backend.generate(request)).catch_unwind();
            let response =
                match tokio::time::timeout(self.config.call_timeout, call).await {
                    Err(_) => {
                        warn!(iteration, "ReAct: model call timed out");
                        return ReActOutcome::fallback(
                            phrases::TIMEOUT,
                            iteration,
                            executed,
                            format!("model call timed out after {:?}", self.config.call_timeout),
                        );
                    }
                    Ok(Err(_)) => {
                        error!(iteration, "ReAct: model backend panicked");
                        return ReActOutcome::fallback(
                            phrases::ERROR,
                            iteration,
                            executed,
                            "model backend panicked".to_string(),
                        );
                    }
                    Ok(Ok(Err(e))) => {
                        warn!(iteration, error = %e, "ReAct: model call failed");
                        return ReActOutcome::fallback(phrases::ERROR, iteration, executed, e.to_string());
                    }
                    Ok(Ok(Ok(response))) => response,
                };
            history.push(ChatMessage::user(prompt.clone()));

            // ── Answer ────────────────────────────────────────────────────────
            if response.tool_calls.is_empty() {
                let text = reply_text(response.text.as_deref());
                info!(iteration, reply = %text, "ReAct: answered");
                return ReActOutcome::answer(text, iteration, executed);
            }

            // ── Act ───────────────────────────────────────────────────────────
            debug!(
                iteration,
                calls = ?response.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "ReAct: executing tool batch"
            );
            let mut observations = Vec::with_capacity(response.tool_calls.len());
            let mut wait_for_user = false;
            for call in &response.tool_calls {
                if let Some(speak) = self.announce_before_navigate(call, &executed) {
                    let Some(result) = self.execute(&speak).await else {
                        return ReActOutcome::fallback(phrases::ERROR, iteration, executed, panicked(&speak));
                    };
                    observations.push(observation(&speak.name, &result));
                    executed.push(speak.name);
                }
                let Some(result) = self.execute(call).await else {
                    return ReActOutcome::fallback(phrases::ERROR, iteration, executed, panicked(call));
                };
                wait_for_user |= result.wait_for_user;
                observations.push(observation(&call.name, &result));
                executed.push(call.name.clone());
            }

            if wait_for_user {
                let text = reply_text(response.text.as_deref());
                info!(iteration, "ReAct: waiting for the customer");
                return ReActOutcome {
                    text,
                    waiting_for_user: true,
                    iteration_count: iteration,
                    executed_tools: executed,
                    error: None,
                };
            }

            history.push(ChatMessage::assistant_calls(
                response.text.unwrap_or_default(),
                response.tool_calls,
            ));
            prompt = format!(
                "Tool execution results:\n{}\n\nBased on these results, decide your next action or respond to the customer.",
                observations.join("\n")
            );
        }

        warn!(max = self.config.max_iterations, "ReAct: iteration limit reached");
        ReActOutcome::fallback(
            phrases::PLEASE_WAIT,
            self.config.max_iterations,
            executed,
            "iteration limit reached".to_string(),
        )
    }

    /// Run one tool; `None` when it panicked.
    async fn execute(&self, call: &ToolCall) -> Option<ToolResult> {
        match AssertUnwindSafe(self.registry.execute(call)).catch_unwind().await {
            Ok(result) => Some(result),
            Err(_) => {
                error!(tool = %call.name, "ReAct: tool panicked");
                None
            }
        }
    }

    // A `navigate` nobody announced gets a `speak` in front of it, whatever
    // shape its `location` argument has.
    fn announce_before_navigate(&self, call: &ToolCall, executed: &[String]) -> Option<ToolCall> {
        if call.name != "navigate" || executed.iter().any(|name| name == "speak") {
            return None;
        }
        if self.registry.get("speak").is_none() {
            return None;
        }
        let location = match call.arguments.get("location") {
            Some(Value::String(location)) => location.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Some(ToolCall::new("speak", json!({ "text": phrases::guiding_to(&location) })))
    }
}

fn panicked(call: &ToolCall) -> String {
    format!("tool {} panicked", call.name)
}

fn observation(name: &str, result: &ToolResult) -> String {
    format!("- {name}: {}", result.message)
}

fn reply_text(raw: Option<&str>) -> String {
    let text = strip_trace(raw.unwrap_or_default());
    if text.is_empty() {
        phrases::COMPLETION.to_string()
    } else {
        text
    }
}

/// Drop a leading `Thought:` block up to the first Japanese character.
///
/// Text without a Japanese character after the marker is kept as-is.
pub fn strip_trace(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("Thought:") {
        return trimmed.to_string();
    }
    match trimmed.char_indices().find(|&(_, c)| is_japanese(c)) {
        Some((at, _)) => trimmed[at..].trim().to_string(),
        None => trimmed.to_string(),
    }
}

fn is_japanese(c: char) -> bool {
    matches!(c, '\u{3041}'..='\u{3093}' | '\u{30A1}'..='\u{30F6}' | '\u{4E00}'..='\u{9FA5}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_driver::ModelResponse;
    use crate::scripted::{ScriptedBackend, Step};
    use crate::tools::{Tool, ToolParam};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records invocations and replies with a fixed result.
    struct Recorder {
        name: &'static str,
        result: ToolResult,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Tool for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "records calls"
        }

        fn parameters(&self) -> BTreeMap<String, ToolParam> {
            BTreeMap::new()
        }

        async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
            let detail = args
                .values()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",");
            self.log.lock().unwrap().push(format!("{}({detail})", self.name));
            self.result.clone()
        }
    }

    struct Harness {
        backend: Arc<ScriptedBackend>,
        orchestrator: ReActOrchestrator,
        log: Arc<Mutex<Vec<String>>>,
    }

    fn harness(backend: ScriptedBackend) -> Harness {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        for (name, result) in [
            ("speak", ToolResult::ok("発話完了")),
            ("navigate", ToolResult::ok("目的地 'レジ' に到着しました")),
            ("ask_user", ToolResult::waiting("質問しました")),
        ] {
            registry.register(Arc::new(Recorder {
                name,
                result,
                log: Arc::clone(&log),
            }));
        }
        let backend = Arc::new(backend);
        let orchestrator = ReActOrchestrator::new(backend.clone(), Arc::new(registry), ReActConfig::default());
        Harness {
            backend,
            orchestrator,
            log,
        }
    }

    fn calls(calls: Vec<ToolCall>) -> Step {
        Step::Respond(ModelResponse::calls(calls))
    }

    #[test]
    fn strip_trace_cuts_to_first_japanese_character() {
        assert_eq!(strip_trace("Thought: user wants socks.\n靴下はこちらです"), "靴下はこちらです");
        assert_eq!(strip_trace("  こんにちは  "), "こんにちは");
        assert_eq!(strip_trace("Thought: nothing else"), "Thought: nothing else");
        assert_eq!(strip_trace("Hello Thought: x"), "Hello Thought: x");
    }

    #[tokio::test]
    async fn text_reply_ends_on_first_iteration() {
        let h = harness(ScriptedBackend::new([Step::Respond(ModelResponse::text(
            "Thought: greet.\nいらっしゃいませ",
        ))]));
        let outcome = h.orchestrator.run("こんにちは", None, None).await;
        assert_eq!(outcome.text, "いらっしゃいませ");
        assert_eq!(outcome.iteration_count, 1);
        assert!(!outcome.waiting_for_user);
        assert!(outcome.executed_tools.is_empty());
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn blank_reply_falls_back_to_completion_phrase() {
        let h = harness(ScriptedBackend::new([Step::Respond(ModelResponse::text("   "))]));
        let outcome = h.orchestrator.run("ありがとう", None, None).await;
        assert_eq!(outcome.text, phrases::COMPLETION);
    }

    #[tokio::test]
    async fn context_is_prefixed_to_the_first_prompt() {
        let h = harness(ScriptedBackend::new([Step::Respond(ModelResponse::text("はい"))]));
        h.orchestrator
            .run("靴下は？", Some("system"), Some("覚えていること: 青が好き"))
            .await;
        let request = &h.backend.requests()[0];
        assert_eq!(request.prompt, "覚えていること: 青が好き\n\nユーザーの発言: 靴下は？");
        assert_eq!(request.system_instruction.as_deref(), Some("system"));
        assert_eq!(request.tools.len(), 3);
        assert!(request.history.is_empty());
    }

    #[tokio::test]
    async fn unannounced_navigate_gets_a_synthesized_speak() {
        let h = harness(ScriptedBackend::new([
            calls(vec![ToolCall::new("navigate", json!({ "location": "レジ" }))]),
            Step::Respond(ModelResponse::text("到着しました")),
        ]));
        let outcome = h.orchestrator.run("レジはどこ？", None, None).await;

        assert_eq!(outcome.executed_tools, vec!["speak", "navigate"]);
        assert_eq!(
            *h.log.lock().unwrap(),
            vec![format!("speak({})", phrases::guiding_to("レジ")), "navigate(レジ)".to_string()]
        );
        assert_eq!(outcome.iteration_count, 2);

        let second = &h.backend.requests()[1];
        assert!(second.prompt.starts_with("Tool execution results:\n- speak: 発話完了\n- navigate: "));
        assert_eq!(second.history.len(), 2);
        assert_eq!(second.history[1].tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn announced_navigate_is_left_alone() {
        let h = harness(ScriptedBackend::new([
            calls(vec![
                ToolCall::new("speak", json!({ "text": "ご案内します" })),
                ToolCall::new("navigate", json!({ "location": "レジ" })),
            ]),
            Step::Respond(ModelResponse::text("どうぞ")),
        ]));
        let outcome = h.orchestrator.run("レジ", None, None).await;
        assert_eq!(outcome.executed_tools, vec!["speak", "navigate"]);
        assert_eq!(h.log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn wait_for_user_finishes_the_batch_then_returns() {
        let h = harness(ScriptedBackend::new([Step::Respond(ModelResponse {
            text: Some("Thought: ask.\nサイズは？".to_string()),
            tool_calls: vec![
                ToolCall::new("ask_user", json!({ "question": "サイズは？" })),
                ToolCall::new("speak", json!({ "text": "お待ちしています" })),
            ],
        })]));
        let outcome = h.orchestrator.run("シャツが欲しい", None, None).await;
        assert!(outcome.waiting_for_user);
        assert_eq!(outcome.text, "サイズは？");
        assert_eq!(outcome.executed_tools, vec!["ask_user", "speak"]);
        assert_eq!(h.backend.call_count(), 1);
    }

    #[tokio::test]
    async fn endless_tool_calls_stop_at_the_iteration_limit() {
        let h = harness(ScriptedBackend::repeating(ModelResponse::calls(vec![ToolCall::new(
            "navigate",
            json!({ "location": "レジ" }),
        )])));
        let outcome = h.orchestrator.run("レジ", None, None).await;
        assert_eq!(outcome.text, phrases::PLEASE_WAIT);
        assert_eq!(outcome.iteration_count, 5);
        assert_eq!(h.backend.call_count(), 5);
        let navigations = outcome.executed_tools.iter().filter(|t| *t == "navigate").count();
        assert_eq!(navigations, 5);
        // Only the first navigate needed an announcement.
        assert_eq!(outcome.executed_tools.iter().filter(|t| *t == "speak").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out_on_the_current_iteration() {
        let h = harness(ScriptedBackend::new([
            calls(vec![ToolCall::new("speak", json!({ "text": "少々お待ちください" }))]),
            Step::Delay(Duration::from_secs(13), ModelResponse::text("遅い")),
        ]));
        let outcome = h.orchestrator.run("在庫は？", None, None).await;
        assert_eq!(outcome.text, phrases::TIMEOUT);
        assert_eq!(outcome.iteration_count, 2);
        assert!(!outcome.waiting_for_user);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn model_failure_becomes_generic_apology() {
        let h = harness(ScriptedBackend::new([Step::Fail("500".into())]));
        let outcome = h.orchestrator.run("こんにちは", None, None).await;
        assert_eq!(outcome.text, phrases::ERROR);
        assert!(!outcome.waiting_for_user);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_an_observation() {
        let h = harness(ScriptedBackend::new([
            calls(vec![ToolCall::new("fly", json!({}))]),
            Step::Respond(ModelResponse::text("できません")),
        ]));
        let outcome = h.orchestrator.run("飛んで", None, None).await;
        assert_eq!(outcome.text, "できません");
        assert!(h.backend.requests()[1].prompt.contains("- fly: Unknown tool: fly"));
    }

    #[tokio::test]
    async fn navigate_with_odd_location_is_still_announced() {
        let h = harness(ScriptedBackend::new([
            calls(vec![ToolCall::new("navigate", json!({ "location": 3 }))]),
            Step::Respond(ModelResponse::text("どうぞ")),
        ]));
        let outcome = h.orchestrator.run("3番へ", None, None).await;
        assert_eq!(outcome.executed_tools, vec!["speak", "navigate"]);
        assert_eq!(h.log.lock().unwrap()[0], format!("speak({})", phrases::guiding_to("3")));

        let h = harness(ScriptedBackend::new([
            calls(vec![ToolCall::new("navigate", json!({}))]),
            Step::Respond(ModelResponse::text("どうぞ")),
        ]));
        h.orchestrator.run("どこか", None, None).await;
        assert_eq!(h.log.lock().unwrap()[0], "speak(売り場にご案内しますね。)");
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "tilt_head"
        }

        fn description(&self) -> &str {
            "panics"
        }

        fn parameters(&self) -> BTreeMap<String, ToolParam> {
            BTreeMap::new()
        }

        async fn execute(&self, _args: &Map<String, Value>) -> ToolResult {
            let readings: Vec<i32> = Vec::new();
            ToolResult::ok(format!("{}", readings[0]))
        }
    }

    #[tokio::test]
    async fn panicking_tool_becomes_generic_apology() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Broken));
        registry.register(Arc::new(Recorder {
            name: "speak",
            result: ToolResult::ok("発話完了"),
            log: Arc::clone(&log),
        }));
        let backend = Arc::new(ScriptedBackend::new([calls(vec![
            ToolCall::new("tilt_head", json!({ "degrees": 10 })),
            ToolCall::new("speak", json!({ "text": "上をご覧ください" })),
        ])]));
        let orchestrator = ReActOrchestrator::new(backend, Arc::new(registry), ReActConfig::default());

        let run = tokio::spawn(async move { orchestrator.run("上の棚は？", None, None).await });
        let outcome = run.await.expect("run must not propagate the panic");

        assert_eq!(outcome.text, phrases::ERROR);
        assert_eq!(outcome.iteration_count, 1);
        assert!(outcome.executed_tools.is_empty());
        assert!(outcome.error.as_deref().is_some_and(|e| e.contains("tilt_head")));
        assert!(log.lock().unwrap().is_empty());
    }
}
