use crate::domain::device_session::Platform;
use crate::domain::error::{AppError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static COORDINATE_LIST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*-?\d+(?:\s*,\s*-?\d+)*\s*$").unwrap());

/// Locator used by steps that act on coordinates rather than an element.
pub const ROOT_SELECTOR_TYPE: &str = "xpath";
pub const ROOT_SELECTOR_VALUE: &str = "//body";

/// Named operation of a step.
///
/// Built-in actions are matched case-insensitively. Anything else is either a
/// project action confirmed by the action catalog (`Custom`) or an unknown
/// name kept verbatim (`Legacy`) so that old scripts round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepAction {
    Blank,
    Click,
    Tap,
    Swipe,
    SendKeys,
    Navigate,
    Find,
    Wait,
    AppStart,
    AppClose,
    Custom(String),
    Legacy(String),
}

impl StepAction {
    pub const BUILT_IN: [StepAction; 9] = [
        StepAction::Click,
        StepAction::Tap,
        StepAction::Swipe,
        StepAction::SendKeys,
        StepAction::Navigate,
        StepAction::Find,
        StepAction::Wait,
        StepAction::AppStart,
        StepAction::AppClose,
    ];

    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_lowercase().as_str() {
            "" => StepAction::Blank,
            "click" => StepAction::Click,
            "tap" => StepAction::Tap,
            "swipe" => StepAction::Swipe,
            "send_keys" => StepAction::SendKeys,
            "navigate" => StepAction::Navigate,
            "find" => StepAction::Find,
            "wait" => StepAction::Wait,
            "app_start" => StepAction::AppStart,
            "app_close" => StepAction::AppClose,
            _ => StepAction::Legacy(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StepAction::Blank => "",
            StepAction::Click => "click",
            StepAction::Tap => "tap",
            StepAction::Swipe => "swipe",
            StepAction::SendKeys => "send_keys",
            StepAction::Navigate => "navigate",
            StepAction::Find => "find",
            StepAction::Wait => "wait",
            StepAction::AppStart => "app_start",
            StepAction::AppClose => "app_close",
            StepAction::Custom(name) | StepAction::Legacy(name) => name,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, StepAction::Blank)
    }

    pub fn is_built_in(&self) -> bool {
        !matches!(
            self,
            StepAction::Blank | StepAction::Custom(_) | StepAction::Legacy(_)
        )
    }
}

impl Default for StepAction {
    fn default() -> Self {
        StepAction::Blank
    }
}

impl From<String> for StepAction {
    fn from(value: String) -> Self {
        StepAction::parse(&value)
    }
}

impl From<StepAction> for String {
    fn from(value: StepAction) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted unit of automation, in the shape the editor works with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    pub id: u32,
    #[serde(default)]
    pub action: StepAction,
    #[serde(default)]
    pub selector_type: String,
    #[serde(default)]
    pub selector_value: String,
    #[serde(default)]
    pub option: String,
    #[serde(default)]
    pub step_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub skip_on_error: bool,
    #[serde(default)]
    pub screenshot: bool,
    #[serde(default, rename = "sleep")]
    pub sleep_seconds: f64,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default, rename = "visible_if_type")]
    pub visible_if_type: Option<String>,
    #[serde(default, rename = "visible_if")]
    pub visible_if: Option<String>,
    #[serde(default, rename = "true_jump_no")]
    pub true_jump_no: Option<u32>,
    #[serde(default, rename = "false_jump_no")]
    pub false_jump_no: Option<u32>,
}

impl TestStep {
    /// An empty editor row.
    pub fn blank(id: u32) -> Self {
        Self {
            id,
            action: StepAction::Blank,
            selector_type: "id".to_string(),
            selector_value: String::new(),
            option: String::new(),
            step_name: None,
            description: None,
            mandatory: false,
            skip_on_error: false,
            screenshot: false,
            sleep_seconds: 0.0,
            platform: None,
            visible_if_type: None,
            visible_if: None,
            true_jump_no: None,
            false_jump_no: None,
        }
    }

    /// A row nobody has filled in yet. Actions such as `wait` or `back` take
    /// no selector, so only a missing action counts.
    pub fn is_placeholder(&self) -> bool {
        self.action.is_blank()
            && self.selector_value.trim().is_empty()
            && self.option.trim().is_empty()
    }

    pub fn has_jumps(&self) -> bool {
        self.true_jump_no.is_some() || self.false_jump_no.is_some()
    }
}

/// Flags applied to every step the recorder synthesizes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefaults {
    pub mandatory: bool,
    pub screenshot: bool,
    pub sleep_seconds: f64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            mandatory: true,
            screenshot: true,
            sleep_seconds: 1.0,
        }
    }
}

impl StepDefaults {
    pub fn apply(&self, step: &mut TestStep) {
        step.mandatory = self.mandatory;
        step.screenshot = self.screenshot;
        step.sleep_seconds = self.sleep_seconds;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePoint {
    pub x: i64,
    pub y: i64,
}

impl DevicePoint {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for DevicePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Parses the comma separated integer payloads used by `tap` and `swipe`.
fn parse_coordinate_list(option: &str, expected: usize, what: &str) -> Result<Vec<i64>> {
    if !COORDINATE_LIST_PATTERN.is_match(option) {
        return Err(AppError::ParseError(format!(
            "Invalid {} option: '{}'",
            what, option
        )));
    }
    let values = option
        .split(',')
        .map(|part| part.trim().parse::<i64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AppError::ParseError(format!("Invalid {} option: {}", what, e)))?;
    if values.len() != expected {
        return Err(AppError::ParseError(format!(
            "{} option expects {} values, got {}",
            what,
            expected,
            values.len()
        )));
    }
    Ok(values)
}

/// `tap` payload: `"x,y"`.
pub fn tap_option(point: DevicePoint) -> String {
    format!("{},{}", point.x, point.y)
}

pub fn parse_tap_option(option: &str) -> Result<DevicePoint> {
    let values = parse_coordinate_list(option, 2, "tap")?;
    Ok(DevicePoint::new(values[0], values[1]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeGesture {
    pub start: DevicePoint,
    pub end: DevicePoint,
    pub duration_ms: u64,
}

impl SwipeGesture {
    /// `swipe` payload: `"x1,y1,x2,y2,durationMs"`.
    pub fn to_option(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.start.x, self.start.y, self.end.x, self.end.y, self.duration_ms
        )
    }

    pub fn parse(option: &str) -> Result<Self> {
        let values = parse_coordinate_list(option, 5, "swipe")?;
        if values[4] < 0 {
            return Err(AppError::ParseError(
                "swipe duration must not be negative".to_string(),
            ));
        }
        Ok(Self {
            start: DevicePoint::new(values[0], values[1]),
            end: DevicePoint::new(values[2], values[3]),
            duration_ms: values[4] as u64,
        })
    }
}

/// Flat snake_case record used by script save payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStepRecord {
    pub step_number: u32,
    pub action: String,
    pub selector_type: String,
    pub selector_value: String,
    pub option: String,
    pub step_name: Option<String>,
    pub description: Option<String>,
    pub mandatory: bool,
    pub skip_on_error: bool,
    pub screenshot: bool,
    pub sleep: f64,
    pub visible_if_type: Option<String>,
    pub visible_if: Option<String>,
    pub true_jump_no: Option<u32>,
    pub false_jump_no: Option<u32>,
}

impl ScriptStepRecord {
    pub fn from_step(position: usize, step: &TestStep) -> Self {
        Self {
            step_number: (position + 1) as u32,
            action: step.action.as_str().to_string(),
            selector_type: step.selector_type.clone(),
            selector_value: step.selector_value.clone(),
            option: step.option.clone(),
            step_name: step.step_name.clone(),
            description: step.description.clone(),
            mandatory: step.mandatory,
            skip_on_error: step.skip_on_error,
            screenshot: step.screenshot,
            sleep: step.sleep_seconds,
            visible_if_type: step.visible_if_type.clone(),
            visible_if: step.visible_if.clone(),
            true_jump_no: step.true_jump_no,
            false_jump_no: step.false_jump_no,
        }
    }

    pub fn into_step(self) -> TestStep {
        TestStep {
            id: self.step_number,
            action: StepAction::parse(&self.action),
            selector_type: self.selector_type,
            selector_value: self.selector_value,
            option: self.option,
            step_name: self.step_name,
            description: self.description,
            mandatory: self.mandatory,
            skip_on_error: self.skip_on_error,
            screenshot: self.screenshot,
            sleep_seconds: self.sleep,
            platform: None,
            visible_if_type: self.visible_if_type,
            visible_if: self.visible_if,
            true_jump_no: self.true_jump_no,
            false_jump_no: self.false_jump_no,
        }
    }
}
