pub mod inspector_panel;
pub mod logging;
pub mod notifications;
pub mod run_monitor;
pub mod state;

pub use state::AppState;
