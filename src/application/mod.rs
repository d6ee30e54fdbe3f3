pub mod use_cases;

pub use use_cases::action_catalog::CatalogService;
pub use use_cases::device_session::DeviceSessionController;
pub use use_cases::live_execution::RunMonitor;
