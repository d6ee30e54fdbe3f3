pub mod app;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;

pub use app::{init_tracing, run};
pub use domain::error::{AppError, Result};
pub use infrastructure::config::{ConfigService, InspectorConfig};
pub use interfaces::logging::{EventEmitter, TracingEmitter};
pub use interfaces::AppState;
