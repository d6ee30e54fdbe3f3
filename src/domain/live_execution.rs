use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal result reported by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Error,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => f.write_str("success"),
            RunOutcome::Error => f.write_str("error"),
        }
    }
}

/// One inbound frame on the run socket: `{"type": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum TelemetryMessage {
    Log(String),
    /// Base64 JPEG of the current screen.
    Screen(String),
    Status(RunOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "outcome", rename_all = "camelCase")]
pub enum ExecutionStatus {
    Connecting,
    Streaming,
    Completed(RunOutcome),
    /// Socket went away before any status arrived.
    Closed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed(_) | ExecutionStatus::Closed)
    }
}

/// Handed to the completion subscriber exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub log_snapshot: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveExecutionSession {
    pub run_id: String,
    pub status: ExecutionStatus,
    pub log_text: String,
    pub latest_frame: Option<String>,
    pub frames_received: u64,
}

impl LiveExecutionSession {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: ExecutionStatus::Connecting,
            log_text: String::new(),
            latest_frame: None,
            frames_received: 0,
        }
    }

    pub fn mark_streaming(&mut self) {
        if self.status == ExecutionStatus::Connecting {
            self.status = ExecutionStatus::Streaming;
        }
    }

    /// Folds one frame into the session. Returns the completion record the
    /// first time a status frame is seen; later status frames are ignored.
    pub fn apply(&mut self, message: TelemetryMessage) -> Option<CompletionRecord> {
        match message {
            TelemetryMessage::Log(chunk) => {
                self.log_text.push_str(&chunk);
                None
            }
            TelemetryMessage::Screen(frame) => {
                self.latest_frame = Some(frame);
                self.frames_received += 1;
                None
            }
            TelemetryMessage::Status(outcome) => {
                if self.status.is_terminal() {
                    return None;
                }
                self.status = ExecutionStatus::Completed(outcome);
                Some(CompletionRecord {
                    run_id: self.run_id.clone(),
                    outcome,
                    log_snapshot: self.log_text.clone(),
                })
            }
        }
    }

    /// Socket ended. Only moves to `Closed` if no status was received.
    pub fn mark_closed(&mut self) {
        if !self.status.is_terminal() {
            self.status = ExecutionStatus::Closed;
        }
    }
}
