use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppError {
    Internal(String),
    NotFound(String),
    ValidationError(String),
    ParseError(String),
    IoError(String),
    /// No device or session, bridge unreachable, or request timed out.
    ConnectionError(String),
    /// The bridge found no element at the queried point.
    IdentifyError(String),
    /// The bridge rejected a performed action.
    ActionExecutionError(String),
    /// The live execution socket failed or closed before a terminal status.
    ChannelError(String),
}

impl AppError {
    /// Short category label used by operator notifications and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal",
            AppError::NotFound(_) => "not_found",
            AppError::ValidationError(_) => "validation",
            AppError::ParseError(_) => "parse",
            AppError::IoError(_) => "io",
            AppError::ConnectionError(_) => "connection",
            AppError::IdentifyError(_) => "identify",
            AppError::ActionExecutionError(_) => "action",
            AppError::ChannelError(_) => "channel",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AppError::IoError(msg) => write!(f, "IO error: {}", msg),
            AppError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            AppError::IdentifyError(msg) => write!(f, "Identify error: {}", msg),
            AppError::ActionExecutionError(msg) => write!(f, "Action failed: {}", msg),
            AppError::ChannelError(msg) => write!(f, "Channel error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
