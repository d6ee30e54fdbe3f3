use crate::domain::device_session::Platform;
use crate::domain::error::{AppError, Result};
use crate::domain::recording::ObjectRegistration;
use crate::domain::test_step::StepAction;
use crate::infrastructure::bridge::{CatalogAction, CatalogObject, ProjectCatalogApi};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Custom actions a project defines on top of the built-ins.
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    names: HashSet<String>,
    actions: Vec<CatalogAction>,
}

impl ActionCatalog {
    pub fn new(actions: Vec<CatalogAction>) -> Self {
        let names = actions
            .iter()
            .map(|action| action.name.trim().to_lowercase())
            .collect();
        Self { names, actions }
    }

    pub fn actions(&self) -> &[CatalogAction] {
        &self.actions
    }

    /// Built-ins win; known project actions become `Custom`; the rest stay
    /// `Legacy` with their original spelling.
    pub fn resolve(&self, raw: &str) -> StepAction {
        match StepAction::parse(raw) {
            StepAction::Legacy(name) if self.names.contains(&name.trim().to_lowercase()) => {
                StepAction::Custom(name.trim().to_string())
            }
            action => action,
        }
    }

    /// Action names offered in the step editor.
    pub fn choices(&self) -> Vec<String> {
        let mut out: Vec<String> = StepAction::BUILT_IN
            .iter()
            .map(|action| action.as_str().to_string())
            .collect();
        for action in &self.actions {
            if !out.iter().any(|name| name.eq_ignore_ascii_case(&action.name)) {
                out.push(action.name.clone());
            }
        }
        out
    }
}

/// Object repository keyed by locator value, used by INSPECT. A value
/// registered under any selector type counts as known.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocatorCatalog {
    by_value: HashMap<String, CatalogObject>,
}

impl LocatorCatalog {
    pub fn new(objects: Vec<CatalogObject>) -> Self {
        let mut catalog = Self::default();
        for object in objects {
            catalog.insert(object);
        }
        catalog
    }

    pub fn insert(&mut self, object: CatalogObject) {
        self.by_value.insert(object.value.trim().to_string(), object);
    }

    pub fn find(&self, selector_value: &str) -> Option<&CatalogObject> {
        self.by_value.get(selector_value.trim())
    }

    pub fn contains(&self, selector_value: &str) -> bool {
        self.find(selector_value).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }
}

struct CachedProject {
    project_id: String,
    actions: ActionCatalog,
    locators: LocatorCatalog,
}

/// Loads both catalogs once per project and keeps them until the project changes.
pub struct CatalogService {
    api: Arc<dyn ProjectCatalogApi>,
    cache: RwLock<Option<CachedProject>>,
}

impl CatalogService {
    pub fn new(api: Arc<dyn ProjectCatalogApi>) -> Self {
        Self {
            api,
            cache: RwLock::new(None),
        }
    }

    async fn ensure_loaded(&self, project_id: &str) -> Result<()> {
        {
            let cache = self.cache.read().await;
            if cache.as_ref().map(|c| c.project_id.as_str()) == Some(project_id) {
                return Ok(());
            }
        }
        let mut cache = self.cache.write().await;
        if cache.as_ref().map(|c| c.project_id.as_str()) == Some(project_id) {
            return Ok(());
        }
        let (actions, objects) = tokio::join!(
            self.api.list_actions(project_id),
            self.api.list_objects(project_id)
        );
        let actions = actions.unwrap_or_else(|err| {
            warn!(project_id = %project_id, error = %err, "Action catalog unavailable");
            Vec::new()
        });
        let objects = objects?;
        info!(
            project_id = %project_id,
            actions = actions.len(),
            objects = objects.len(),
            "Loaded project catalogs"
        );
        *cache = Some(CachedProject {
            project_id: project_id.to_string(),
            actions: ActionCatalog::new(actions),
            locators: LocatorCatalog::new(objects),
        });
        Ok(())
    }

    pub async fn action_catalog(&self, project_id: &str) -> Result<ActionCatalog> {
        self.ensure_loaded(project_id).await?;
        let cache = self.cache.read().await;
        Ok(cache
            .as_ref()
            .map(|c| c.actions.clone())
            .unwrap_or_default())
    }

    pub async fn locator_catalog(&self, project_id: &str) -> Result<LocatorCatalog> {
        self.ensure_loaded(project_id).await?;
        let cache = self.cache.read().await;
        Ok(cache
            .as_ref()
            .map(|c| c.locators.clone())
            .unwrap_or_default())
    }

    pub async fn register(
        &self,
        project_id: &str,
        platform: Platform,
        registration: &ObjectRegistration,
    ) -> Result<CatalogObject> {
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(AppError::ValidationError("Object name is required.".to_string()));
        }
        let object = CatalogObject {
            id: None,
            name: name.to_string(),
            selector_type: registration.selector_type.clone(),
            value: registration.selector_value.clone(),
            platform: Some(platform.as_str().to_string()),
            description: None,
        };
        let saved = self.api.register_object(project_id, &object).await?;
        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_mut().filter(|c| c.project_id == project_id) {
            cached.locators.insert(saved.clone());
        }
        info!(project_id = %project_id, name = %saved.name, "Registered object");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeCatalogApi {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ProjectCatalogApi for FakeCatalogApi {
        async fn list_actions(&self, _project_id: &str) -> Result<Vec<CatalogAction>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![CatalogAction {
                id: "a1".to_string(),
                name: "verify_toast".to_string(),
                description: None,
                category: Some("assert".to_string()),
                platform: Some("APP".to_string()),
            }])
        }

        async fn list_objects(&self, _project_id: &str) -> Result<Vec<CatalogObject>> {
            Ok(vec![CatalogObject {
                id: Some("o1".to_string()),
                name: "login_button".to_string(),
                selector_type: "ID".to_string(),
                value: "btn_login".to_string(),
                platform: Some("APP".to_string()),
                description: None,
            }])
        }

        async fn register_object(&self, _project_id: &str, object: &CatalogObject) -> Result<CatalogObject> {
            let mut saved = object.clone();
            saved.id = Some("o2".to_string());
            Ok(saved)
        }
    }

    #[test]
    fn test_resolve_action_names() {
        let catalog = ActionCatalog::new(vec![CatalogAction {
            id: "1".to_string(),
            name: "Verify_Toast".to_string(),
            description: None,
            category: None,
            platform: None,
        }]);
        assert_eq!(catalog.resolve("CLICK"), StepAction::Click);
        assert_eq!(
            catalog.resolve("verify_toast"),
            StepAction::Custom("verify_toast".to_string())
        );
        assert_eq!(
            catalog.resolve("old_thing"),
            StepAction::Legacy("old_thing".to_string())
        );
        assert!(catalog.choices().contains(&"Verify_Toast".to_string()));
    }

    #[tokio::test]
    async fn test_catalogs_load_once_per_project_and_learn_registrations() {
        let api = Arc::new(FakeCatalogApi {
            loads: AtomicUsize::new(0),
        });
        let service = CatalogService::new(api.clone());

        let locators = service.locator_catalog("p1").await.unwrap();
        assert!(locators.contains("btn_login"));
        service.action_catalog("p1").await.unwrap();
        assert_eq!(api.loads.load(Ordering::SeqCst), 1);

        let registration = ObjectRegistration {
            name: "ok_button".to_string(),
            selector_type: "ID".to_string(),
            selector_value: "btn_ok".to_string(),
        };
        service.register("p1", Platform::App, &registration).await.unwrap();
        assert!(service.locator_catalog("p1").await.unwrap().contains("btn_ok"));

        service.action_catalog("p2").await.unwrap();
        assert_eq!(api.loads.load(Ordering::SeqCst), 2);
    }
}
