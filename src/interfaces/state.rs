use crate::application::use_cases::action_catalog::CatalogService;
use crate::application::use_cases::device_session::DeviceSessionController;
use crate::domain::error::Result;
use crate::infrastructure::bridge::http_client::HttpInspectorClient;
use crate::infrastructure::bridge::{InspectorBridge, ProjectCatalogApi};
use crate::infrastructure::config::InspectorConfig;
use crate::interfaces::logging::{EventEmitter, LogBuffer};
use crate::interfaces::notifications::NotificationCenter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::info;

pub struct AppState {
    pub config: InspectorConfig,
    pub logs: LogBuffer,
    pub notifications: Arc<NotificationCenter>,
    pub catalog: Arc<CatalogService>,
    pub inspector: Arc<DeviceSessionController>,
    pub emitter: Arc<dyn EventEmitter>,
    /// Stop handles of the runs currently followed, by run id.
    followed_runs: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl AppState {
    pub fn new(
        config: InspectorConfig,
        bridge: Arc<dyn InspectorBridge>,
        catalog_api: Arc<dyn ProjectCatalogApi>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Arc<Self> {
        let notifications = Arc::new(NotificationCenter::new());
        let catalog = Arc::new(CatalogService::new(catalog_api));
        let inspector = DeviceSessionController::new(
            bridge,
            catalog.clone(),
            notifications.clone(),
            &config,
        );
        Arc::new(Self {
            logs: LogBuffer::new(config.log_capacity),
            config,
            notifications,
            catalog,
            inspector,
            emitter,
            followed_runs: Mutex::new(HashMap::new()),
        })
    }

    /// Wires the HTTP bridge client from a loaded config.
    pub fn bootstrap(config: InspectorConfig, emitter: Arc<dyn EventEmitter>) -> Result<Arc<Self>> {
        config.validate()?;
        let client = Arc::new(HttpInspectorClient::new(&config)?);
        info!(api = %config.api_base_url, "Inspector state ready");
        Ok(Self::new(config, client.clone(), client, emitter))
    }

    pub(crate) fn followed_runs(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<()>>> {
        self.followed_runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
