pub mod device_session;
pub mod error;
pub mod live_execution;
pub mod notification;
pub mod recording;
pub mod test_step;
