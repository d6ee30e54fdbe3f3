use chrono::Local;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

pub const INSPECTOR_LOG_EMIT: &str = "inspector-log";
pub const RUN_STREAM_EMIT: &str = "run-stream";
pub const RUN_COMPLETED_EMIT: &str = "run-completed";

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub time: String,
    pub level: String,
    pub source: String,
    pub message: String,
}

/// Bounded operator log; oldest entries fall off first.
pub struct LogBuffer {
    entries: Mutex<Vec<LogEntry>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn push(&self, entry: LogEntry) {
        let mut entries = self.lock();
        entries.push(entry);
        let overflow = entries.len().saturating_sub(self.capacity);
        if overflow > 0 {
            entries.drain(..overflow);
        }
    }
}

pub fn add_log_entry(logs: &LogBuffer, level: &str, source: &str, message: &str) -> LogEntry {
    let entry = LogEntry {
        time: Local::now().format("%H:%M:%S").to_string(),
        level: level.to_string(),
        source: source.to_string(),
        message: message.to_string(),
    };
    logs.push(entry.clone());
    entry
}

pub fn add_log(logs: &LogBuffer, level: &str, source: &str, message: &str) {
    add_log_entry(logs, level, source, message);
}

/// Delivers named events to whatever hosts the panel (a webview, a TUI, ...).
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), String>;
}

/// Host-less emitter: events only reach the tracing output.
pub struct TracingEmitter;

impl EventEmitter for TracingEmitter {
    fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), String> {
        debug!(event = %event, payload = %payload, "event");
        Ok(())
    }
}

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InspectorLogContext {
    pub platform: Option<String>,
    pub target: Option<String>,
    pub mode: Option<String>,
    pub run_id: Option<String>,
    pub step_name: Option<String>,
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct InspectorLogEvent {
    time: String,
    level: String,
    source: String,
    message: String,
    status: String,
    error: Option<String>,
    context: Option<InspectorLogContext>,
}

#[allow(clippy::too_many_arguments)]
pub fn emit_status_log(
    emitter: &dyn EventEmitter,
    logs: &LogBuffer,
    level: &str,
    source: &str,
    message: &str,
    status: &str,
    error: Option<&str>,
    context: Option<InspectorLogContext>,
) {
    let entry = add_log_entry(logs, level, source, message);
    let payload = InspectorLogEvent {
        time: entry.time,
        level: entry.level,
        source: entry.source,
        message: entry.message,
        status: status.to_string(),
        error: error.map(|value| value.to_string()),
        context,
    };
    let payload = match serde_json::to_value(payload) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "Failed to serialize inspector log event");
            return;
        }
    };
    if let Err(err) = emitter.emit(INSPECTOR_LOG_EMIT, payload) {
        add_log(
            logs,
            "ERROR",
            "Inspector",
            &format!("Failed to emit inspector log event: {}", err),
        );
    }
}
