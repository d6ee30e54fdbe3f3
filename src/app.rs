use crate::domain::error::Result;
use crate::infrastructure::config::ConfigService;
use crate::interfaces::logging::{add_log, EventEmitter};
use crate::interfaces::state::AppState;
use std::sync::Arc;
use tracing::error;

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_tracing(filter: &str) {
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Loads configuration (`.env`, `qa-inspector.toml`, `QA_INSPECTOR_*`) and
/// builds the state the panel host drives. `emitter` receives panel events.
pub fn run(emitter: Arc<dyn EventEmitter>) -> Result<Arc<AppState>> {
    let config = match ConfigService::new().load() {
        Ok(config) => config,
        Err(err) => {
            init_tracing("info");
            error!(error = %err, "Failed to load inspector config");
            return Err(err);
        }
    };
    init_tracing(&config.log_filter);
    let state = AppState::bootstrap(config, emitter)?;
    add_log(&state.logs, "INFO", "App", "Inspector ready");
    Ok(state)
}
