use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use guidebot_hal::Speech;
use guidebot_types::ToolResult;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{Tool, ToolParam, params_from_schema, parse_args};

#[derive(Deserialize, JsonSchema)]
struct SpeakArgs {
    /// 発話するテキスト
    text: String,
}

/// Say something to the customer.
pub struct SpeakTool {
    speech: Arc<dyn Speech>,
    language: String,
}

impl SpeakTool {
    pub fn new(speech: Arc<dyn Speech>, language: impl Into<String>) -> Self {
        Self {
            speech,
            language: language.into(),
        }
    }
}

#[async_trait]
impl Tool for SpeakTool {
    fn name(&self) -> &str {
        "speak"
    }

    fn description(&self) -> &str {
        "顧客に話しかける。案内、商品紹介、挨拶など。"
    }

    fn parameters(&self) -> BTreeMap<String, ToolParam> {
        params_from_schema::<SpeakArgs>()
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let args: SpeakArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(failure) => return failure,
        };
        if self.speech.speak(&args.text, &self.language).await {
            ToolResult::ok("発話完了")
        } else {
            ToolResult::fail("発話に失敗しました")
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct AskUserArgs {
    /// 質問するテキスト
    question: String,
}

/// Ask a question and hand the turn back to the customer.
pub struct AskUserTool {
    speech: Arc<dyn Speech>,
    language: String,
}

impl AskUserTool {
    pub fn new(speech: Arc<dyn Speech>, language: impl Into<String>) -> Self {
        Self {
            speech,
            language: language.into(),
        }
    }
}

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "顧客に質問して回答を待つ。好みや要望を確認する時に使用。"
    }

    fn parameters(&self) -> BTreeMap<String, ToolParam> {
        params_from_schema::<AskUserArgs>()
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let args: AskUserArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(failure) => return failure,
        };
        self.speech.speak(&args.question, &self.language).await;
        ToolResult::waiting(format!("質問しました ({}): {}", self.language, args.question))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidebot_hal::SimSpeech;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn speak_reports_completion() {
        let speech = Arc::new(SimSpeech::new());
        let tool = SpeakTool::new(speech.clone(), "ja-JP");
        let result = tool.execute(&args(json!({ "text": "こんにちは" }))).await;
        assert!(result.success);
        assert_eq!(speech.spoken(), vec!["こんにちは".to_string()]);
    }

    #[tokio::test]
    async fn speak_failure_is_reported() {
        let speech = Arc::new(SimSpeech::new());
        speech.set_failing(true);
        let tool = SpeakTool::new(speech, "ja-JP");
        let result = tool.execute(&args(json!({ "text": "x" }))).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn speak_requires_text() {
        let tool = SpeakTool::new(Arc::new(SimSpeech::new()), "ja-JP");
        assert!(!tool.execute(&Map::new()).await.success);
        assert!(tool.parameters()["text"].required);
    }

    #[tokio::test]
    async fn ask_user_waits_for_answer() {
        let speech = Arc::new(SimSpeech::new());
        let tool = AskUserTool::new(speech.clone(), "ja-JP");
        let result = tool
            .execute(&args(json!({ "question": "サイズはいかがですか？" })))
            .await;
        assert!(result.wait_for_user);
        assert_eq!(speech.spoken(), vec!["サイズはいかがですか？".to_string()]);
    }
}
