pub mod http_client;

use crate::domain::device_session::{DeviceInfo, IdentifiedElement, Platform, WindowSize};
use crate::domain::error::Result;
use crate::domain::test_step::TestStep;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http_client::HttpInspectorClient;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOutcome {
    pub window_size: Option<WindowSize>,
}

/// Point query against the last rendered frame, in display pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdentifyQuery {
    pub x: f64,
    pub y: f64,
    pub display_width: f64,
    pub display_height: f64,
    pub platform: Platform,
}

/// Request/response side of the remote automation bridge.
#[async_trait]
pub trait InspectorBridge: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>>;
    /// `os` is the device operating system name, e.g. "Android".
    async fn connect_device(&self, device_id: &str, project_id: &str, os: &str) -> Result<ConnectOutcome>;
    async fn connect_web(&self, url: &str) -> Result<ConnectOutcome>;
    async fn disconnect(&self) -> Result<()>;
    /// Base64 screenshot.
    async fn screenshot(&self, platform: Platform) -> Result<String>;
    async fn source(&self, platform: Platform) -> Result<String>;
    async fn contexts(&self) -> Result<Vec<String>>;
    async fn switch_context(&self, name: &str) -> Result<()>;
    async fn identify(&self, query: IdentifyQuery) -> Result<IdentifiedElement>;
    async fn perform_action(&self, step: &TestStep) -> Result<()>;
    /// Starts a run and returns its id.
    async fn start_run(&self, steps: &[TestStep], project_id: &str, platform: Platform) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogAction {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

/// Object-repository entry; `value` is the locator value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogObject {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub selector_type: String,
    pub value: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Project-scoped asset catalog (custom actions and the object repository).
#[async_trait]
pub trait ProjectCatalogApi: Send + Sync {
    async fn list_actions(&self, project_id: &str) -> Result<Vec<CatalogAction>>;
    async fn list_objects(&self, project_id: &str) -> Result<Vec<CatalogObject>>;
    async fn register_object(&self, project_id: &str, object: &CatalogObject) -> Result<CatalogObject>;
}
