use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use guidebot_hal::Movement;
use guidebot_middleware::TurnAwaiter;
use guidebot_types::ToolResult;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::{Tool, ToolParam, params_from_schema, parse_args};
use crate::navigation::NavigationOrchestrator;

/// Head tilt limits of the hardware, in degrees.
const TILT_RANGE: std::ops::RangeInclusive<i32> = -25..=55;

#[derive(Deserialize, JsonSchema)]
struct NavigateArgs {
    /// 移動先の地点名
    location: String,
    /// 到着時に話すテキスト
    announcement: Option<String>,
}

/// Guide the customer to a saved location.
pub struct NavigateTool {
    navigation: Arc<NavigationOrchestrator>,
}

impl NavigateTool {
    pub fn new(navigation: Arc<NavigationOrchestrator>) -> Self {
        Self { navigation }
    }
}

#[async_trait]
impl Tool for NavigateTool {
    fn name(&self) -> &str {
        "navigate"
    }

    fn description(&self) -> &str {
        "指定した売り場や地点までお客様をご案内する。到着まで待ってから結果を返す。"
    }

    fn parameters(&self) -> BTreeMap<String, ToolParam> {
        params_from_schema::<NavigateArgs>()
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let args: NavigateArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(failure) => return failure,
        };
        self.navigation.navigate(&args.location, args.announcement).await
    }
}

#[derive(Deserialize, JsonSchema)]
struct TurnArgs {
    /// 回転する角度（正は左回り）
    degrees: i32,
}

/// Rotate in place and wait for the turn to finish.
pub struct TurnTool {
    movement: Arc<dyn Movement>,
    turns: Arc<TurnAwaiter>,
    timeout: Duration,
}

impl TurnTool {
    pub fn new(movement: Arc<dyn Movement>, turns: Arc<TurnAwaiter>, timeout: Duration) -> Self {
        Self {
            movement,
            turns,
            timeout,
        }
    }
}

#[async_trait]
impl Tool for TurnTool {
    fn name(&self) -> &str {
        "turn"
    }

    fn description(&self) -> &str {
        "その場で指定した角度だけ回転する。"
    }

    fn parameters(&self) -> BTreeMap<String, ToolParam> {
        params_from_schema::<TurnArgs>()
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let args: TurnArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(failure) => return failure,
        };
        let ticket = self.turns.arm();
        if let Err(e) = self.movement.turn_by(args.degrees, 1.0).await {
            return ToolResult::fail(format!("回転できませんでした: {e}"));
        }
        if let Err(e) = ticket.wait(self.timeout).await {
            warn!(degrees = args.degrees, ?e, "TurnTool: no completion event");
        }
        ToolResult::ok(format!("{}度回転しました", args.degrees))
    }
}

#[derive(Deserialize, JsonSchema)]
struct TiltHeadArgs {
    /// 頭の角度（-25〜55）
    degrees: i32,
}

pub struct TiltHeadTool {
    movement: Arc<dyn Movement>,
}

impl TiltHeadTool {
    pub fn new(movement: Arc<dyn Movement>) -> Self {
        Self { movement }
    }
}

#[async_trait]
impl Tool for TiltHeadTool {
    fn name(&self) -> &str {
        "tilt_head"
    }

    fn description(&self) -> &str {
        "頭を上下に傾ける。商品棚を見上げる時などに使用。"
    }

    fn parameters(&self) -> BTreeMap<String, ToolParam> {
        params_from_schema::<TiltHeadArgs>()
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let args: TiltHeadArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(failure) => return failure,
        };
        let degrees = args.degrees.clamp(*TILT_RANGE.start(), *TILT_RANGE.end());
        match self.movement.tilt_head(degrees).await {
            Ok(()) => ToolResult::ok(format!("頭を{degrees}度に傾けました")),
            Err(e) => ToolResult::fail(format!("頭を傾けられませんでした: {e}")),
        }
    }
}

/// List the saved locations.
pub struct GetLocationsTool {
    movement: Arc<dyn Movement>,
}

impl GetLocationsTool {
    pub fn new(movement: Arc<dyn Movement>) -> Self {
        Self { movement }
    }
}

#[async_trait]
impl Tool for GetLocationsTool {
    fn name(&self) -> &str {
        "get_available_locations"
    }

    fn description(&self) -> &str {
        "案内可能な地点の一覧を取得する。"
    }

    fn parameters(&self) -> BTreeMap<String, ToolParam> {
        BTreeMap::new()
    }

    async fn execute(&self, _args: &Map<String, Value>) -> ToolResult {
        let locations = self.movement.locations();
        if locations.is_empty() {
            return ToolResult::fail("保存された地点がありません");
        }
        ToolResult::ok(format!("利用可能な地点: {}", locations.join(", ")))
    }
}
