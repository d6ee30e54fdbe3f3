pub mod bridge;
#[path = "config/mod.rs"]
pub mod config_mod;
pub use config_mod as config;
pub mod spreadsheet;
pub mod telemetry;
