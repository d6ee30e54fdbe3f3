use crate::domain::test_step::{DevicePoint, TestStep};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a RECORD (or NAVIGATE) click turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RecordSubMode {
    Click,
    Tap,
    /// Two-click gesture; the first click is remembered here.
    Swipe {
        pending_start: Option<DevicePoint>,
    },
    Input,
}

impl RecordSubMode {
    pub fn swipe() -> Self {
        RecordSubMode::Swipe {
            pending_start: None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecordSubMode::Click => "CLICK",
            RecordSubMode::Tap => "TAP",
            RecordSubMode::Swipe { .. } => "SWIPE",
            RecordSubMode::Input => "INPUT",
        }
    }

    pub fn swipe_start(&self) -> Option<DevicePoint> {
        match self {
            RecordSubMode::Swipe { pending_start } => *pending_start,
            _ => None,
        }
    }
}

impl Default for RecordSubMode {
    fn default() -> Self {
        RecordSubMode::Click
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum RecordingMode {
    /// Clicks drive the target directly, nothing is staged.
    Navigate { sub: RecordSubMode },
    Record { sub: RecordSubMode },
    /// Clicks only identify elements and offer registration.
    Inspect,
}

impl RecordingMode {
    pub fn sub_mode(&self) -> Option<RecordSubMode> {
        match self {
            RecordingMode::Navigate { sub } | RecordingMode::Record { sub } => Some(*sub),
            RecordingMode::Inspect => None,
        }
    }

    pub fn sub_mode_mut(&mut self) -> Option<&mut RecordSubMode> {
        match self {
            RecordingMode::Navigate { sub } | RecordingMode::Record { sub } => Some(sub),
            RecordingMode::Inspect => None,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingMode::Record { .. })
    }

    pub fn swipe_start(&self) -> Option<DevicePoint> {
        self.sub_mode().and_then(|sub| sub.swipe_start())
    }

    /// Drops a half-finished swipe without touching anything else.
    pub fn clear_swipe_start(&mut self) {
        if let Some(RecordSubMode::Swipe { pending_start }) = self.sub_mode_mut() {
            *pending_start = None;
        }
    }
}

impl Default for RecordingMode {
    fn default() -> Self {
        RecordingMode::Navigate {
            sub: RecordSubMode::Click,
        }
    }
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingMode::Navigate { sub } => write!(f, "NAVIGATE/{}", sub.label()),
            RecordingMode::Record { sub } => write!(f, "RECORD/{}", sub.label()),
            RecordingMode::Inspect => f.write_str("INSPECT"),
        }
    }
}

/// Synthesized step awaiting operator review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStep {
    pub step: TestStep,
    pub last_error: Option<String>,
}

impl PendingStep {
    pub fn new(step: TestStep) -> Self {
        Self {
            step,
            last_error: None,
        }
    }
}

/// Where an INPUT click is waiting for text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputIntent {
    /// Text gets staged as a pending `send_keys` step.
    Record,
    /// Text is sent to the target right away.
    Navigate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPrompt {
    pub intent: InputIntent,
    pub element_name: String,
    pub selector_type: String,
    pub selector_value: String,
}

/// Element the operator chose to register in the object repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRegistration {
    pub name: String,
    pub selector_type: String,
    pub selector_value: String,
}

impl ObjectRegistration {
    /// Registration keys are the element name lower-cased with whitespace runs
    /// collapsed to `_`.
    pub fn suggested_name(element_name: &str) -> String {
        element_name
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
    }
}
