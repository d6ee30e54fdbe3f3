pub mod action_catalog;
pub mod coordinate_mapper;
pub mod device_session;
pub mod inspector_state;
pub mod live_execution;
pub mod step_import;
pub mod step_sequence;

#[cfg(test)]
pub(crate) mod test_support;
