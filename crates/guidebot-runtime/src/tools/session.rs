use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use guidebot_hal::{Movement, Speech};
use guidebot_memory::MemoryStore;
use guidebot_middleware::EventBus;
use guidebot_types::{EventPayload, RobotEvent, ToolResult};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{Tool, ToolParam, params_from_schema, parse_args};
use crate::flags::SessionFlags;
use crate::phrases;

#[derive(Deserialize, JsonSchema)]
struct CallStaffArgs {
    /// 店員を呼ぶ理由
    reason: Option<String>,
}

/// Request a human member of staff.
///
/// The robot only enters `StaffCall` after the reply has been spoken; the
/// tool raises a flag and alerts staff on the bus.
pub struct CallStaffTool {
    flags: Arc<SessionFlags>,
    bus: EventBus,
}

impl CallStaffTool {
    pub fn new(flags: Arc<SessionFlags>, bus: EventBus) -> Self {
        Self { flags, bus }
    }
}

#[async_trait]
impl Tool for CallStaffTool {
    fn name(&self) -> &str {
        "call_staff"
    }

    fn description(&self) -> &str {
        "店員を呼ぶ。試着室、会計、在庫確認などロボットでは対応できない時に使用。"
    }

    fn parameters(&self) -> BTreeMap<String, ToolParam> {
        params_from_schema::<CallStaffArgs>()
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let args: CallStaffArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(failure) => return failure,
        };
        let reason = args
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "お客様対応".to_string());

        self.flags.request_staff(reason.clone());
        let alert = RobotEvent::new(
            "guidebot-runtime::call_staff",
            EventPayload::StaffAlert {
                reason: reason.clone(),
            },
        );
        if let Err(e) = self.bus.publish(alert) {
            debug!(error = %e, "CallStaffTool: nobody listening for staff alerts");
        }
        info!(%reason, "CallStaffTool: staff requested");
        ToolResult::ok(format!("店員を呼びました。理由: {reason}"))
    }
}

#[derive(Deserialize, JsonSchema)]
struct SaveMemoryArgs {
    /// 覚える項目の名前（例: 好きな色）
    key: String,
    /// 覚える内容
    value: String,
}

/// Persist a fact about the customer.
pub struct SaveMemoryTool {
    memory: Arc<Mutex<MemoryStore>>,
}

impl SaveMemoryTool {
    pub fn new(memory: Arc<Mutex<MemoryStore>>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for SaveMemoryTool {
    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        "お客様の好みや要望を記憶する。"
    }

    fn parameters(&self) -> BTreeMap<String, ToolParam> {
        params_from_schema::<SaveMemoryArgs>()
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let args: SaveMemoryArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(failure) => return failure,
        };
        let saved = self
            .memory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remember(&args.key, &args.value);
        match saved {
            Ok(()) => ToolResult::ok(format!("記憶しました: {} = {}", args.key, args.value)),
            Err(e) => {
                warn!(error = %e, "SaveMemoryTool: write failed");
                ToolResult::fail(format!("記憶できませんでした: {e}"))
            }
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct EndConversationArgs {
    /// 最後に伝える言葉
    reply: Option<String>,
}

/// Close the conversation; the robot heads home after its reply.
pub struct EndConversationTool {
    flags: Arc<SessionFlags>,
}

impl EndConversationTool {
    pub fn new(flags: Arc<SessionFlags>) -> Self {
        Self { flags }
    }
}

#[async_trait]
impl Tool for EndConversationTool {
    fn name(&self) -> &str {
        "end_conversation"
    }

    fn description(&self) -> &str {
        "会話を終了してホームに戻る。お客様が用事を終えた時に使用。"
    }

    fn parameters(&self) -> BTreeMap<String, ToolParam> {
        params_from_schema::<EndConversationArgs>()
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let args: EndConversationArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(failure) => return failure,
        };
        self.flags.request_end();
        match args.reply {
            Some(reply) if !reply.trim().is_empty() => {
                ToolResult::ok(format!("会話を終了します。最後の言葉: {reply}"))
            }
            _ => ToolResult::ok("会話を終了します"),
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct PauseArgs {
    /// 一時停止する時に話すテキスト
    message: Option<String>,
}

/// Stop moving and talking, then wait for the customer.
pub struct PauseTool {
    movement: Arc<dyn Movement>,
    speech: Arc<dyn Speech>,
    language: String,
}

impl PauseTool {
    pub fn new(movement: Arc<dyn Movement>, speech: Arc<dyn Speech>, language: impl Into<String>) -> Self {
        Self {
            movement,
            speech,
            language: language.into(),
        }
    }
}

#[async_trait]
impl Tool for PauseTool {
    fn name(&self) -> &str {
        "pause"
    }

    fn description(&self) -> &str {
        "移動と発話を止めてお客様の指示を待つ。「待って」「止まって」と言われた時に使用。"
    }

    fn parameters(&self) -> BTreeMap<String, ToolParam> {
        params_from_schema::<PauseArgs>()
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let args: PauseArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(failure) => return failure,
        };
        self.movement.stop_movement().await;
        self.speech.stop().await;
        let message = args
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| phrases::PAUSED.to_string());
        self.speech.speak(&message, &self.language).await;
        ToolResult::waiting("一時停止しました")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidebot_hal::{SimCommand, SimRobot, SimSpeech};
    use guidebot_middleware::Topic;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn call_staff_raises_flag_and_alerts() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let flags = Arc::new(SessionFlags::new());
        let tool = CallStaffTool::new(Arc::clone(&flags), bus);

        let result = tool.execute(&args(json!({ "reason": "試着室" }))).await;

        assert_eq!(result.message, "店員を呼びました。理由: 試着室");
        assert_eq!(flags.take_staff_call().as_deref(), Some("試着室"));
        let event = alerts.next().await.unwrap();
        assert!(matches!(event.payload, EventPayload::StaffAlert { reason } if reason == "試着室"));
    }

    #[tokio::test]
    async fn call_staff_without_listeners_still_succeeds() {
        let flags = Arc::new(SessionFlags::new());
        let tool = CallStaffTool::new(Arc::clone(&flags), EventBus::default());
        let result = tool.execute(&Map::new()).await;
        assert!(result.success);
        assert_eq!(flags.take_staff_call().as_deref(), Some("お客様対応"));
    }

    #[tokio::test]
    async fn save_memory_persists_fact() {
        let memory = Arc::new(Mutex::new(MemoryStore::open_in_memory().unwrap()));
        let tool = SaveMemoryTool::new(Arc::clone(&memory));
        let result = tool
            .execute(&args(json!({ "key": "好きな色", "value": "青" })))
            .await;
        assert!(result.success);
        let recalled = memory.lock().unwrap().recall("好きな色").unwrap();
        assert_eq!(recalled.as_deref(), Some("青"));
    }

    #[tokio::test]
    async fn end_conversation_requests_end() {
        let flags = Arc::new(SessionFlags::new());
        let tool = EndConversationTool::new(Arc::clone(&flags));
        assert!(tool.execute(&Map::new()).await.success);
        assert!(flags.user_ended());
        assert!(flags.take_end_request());
    }

    #[tokio::test]
    async fn pause_stops_everything_and_waits() {
        let robot = Arc::new(SimRobot::new(EventBus::default(), ["レジ"]));
        let speech = Arc::new(SimSpeech::new());
        let tool = PauseTool::new(robot.clone(), speech.clone(), "ja-JP");

        let result = tool.execute(&Map::new()).await;

        assert!(result.wait_for_user);
        assert_eq!(robot.commands(), vec![SimCommand::Stop]);
        assert_eq!(speech.stop_count(), 1);
        assert_eq!(speech.spoken(), vec![phrases::PAUSED.to_string()]);
    }
}
