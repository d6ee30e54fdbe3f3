//! Scripted in-memory bridge for controller tests.

use crate::domain::device_session::{
    DeviceInfo, ElementBounds, IdentifiedElement, Platform, WindowSize,
};
use crate::domain::error::{AppError, Result};
use crate::domain::test_step::TestStep;
use crate::infrastructure::bridge::{
    CatalogAction, CatalogObject, ConnectOutcome, IdentifyQuery, InspectorBridge,
    ProjectCatalogApi,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

pub(crate) struct FakeBridge {
    pub devices: Mutex<Vec<DeviceInfo>>,
    pub window_size: Option<WindowSize>,
    pub screenshot: Mutex<String>,
    pub identify_result: Mutex<Option<IdentifiedElement>>,
    pub fail_connect: AtomicBool,
    pub fail_actions: AtomicBool,
    pub fail_disconnect: AtomicBool,
    pub reject_context: AtomicBool,
    pub gate_screenshots: AtomicBool,
    pub gate_connect: AtomicBool,
    /// Signalled when a gated screenshot or connect call starts waiting.
    pub entered: Notify,
    pub gate: Notify,
    pub screenshot_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub connected_device: Mutex<Option<String>>,
    pub connected_os: Mutex<Option<String>>,
    pub identify_queries: Mutex<Vec<IdentifyQuery>>,
    pub actions: Mutex<Vec<TestStep>>,
    pub runs: Mutex<Vec<(Vec<TestStep>, String, Platform)>>,
    pub objects: Mutex<Vec<CatalogObject>>,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(vec![
                DeviceInfo {
                    id: "emulator-5554".to_string(),
                    alias: Some("Pixel".to_string()),
                    os: None,
                },
                DeviceInfo {
                    id: "R58M".to_string(),
                    alias: None,
                    os: Some("Android".to_string()),
                },
            ]),
            window_size: Some(WindowSize::new(1080, 1920)),
            screenshot: Mutex::new("aW1hZ2U=".to_string()),
            identify_result: Mutex::new(Some(sample_element())),
            fail_connect: AtomicBool::new(false),
            fail_actions: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
            reject_context: AtomicBool::new(false),
            gate_screenshots: AtomicBool::new(false),
            gate_connect: AtomicBool::new(false),
            entered: Notify::new(),
            gate: Notify::new(),
            screenshot_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            connected_device: Mutex::new(None),
            connected_os: Mutex::new(None),
            identify_queries: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
            objects: Mutex::new(Vec::new()),
        }
    }

    pub fn screenshot_calls(&self) -> usize {
        self.screenshot_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn sample_element() -> IdentifiedElement {
    IdentifiedElement {
        name: "Login".to_string(),
        selector_type: "id".to_string(),
        selector_value: "btn_login".to_string(),
        bounds: ElementBounds {
            x1: 500.0,
            y1: 900.0,
            x2: 600.0,
            y2: 1000.0,
        },
        source_line: Some(3),
        window_size: None,
    }
}

#[async_trait]
impl InspectorBridge for FakeBridge {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn connect_device(&self, device_id: &str, _project_id: &str, os: &str) -> Result<ConnectOutcome> {
        if self.gate_connect.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AppError::ConnectionError("device offline".to_string()));
        }
        *self.connected_device.lock().unwrap() = Some(device_id.to_string());
        *self.connected_os.lock().unwrap() = Some(os.to_string());
        Ok(ConnectOutcome {
            window_size: self.window_size,
        })
    }

    async fn connect_web(&self, url: &str) -> Result<ConnectOutcome> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AppError::ConnectionError("browser unavailable".to_string()));
        }
        *self.connected_device.lock().unwrap() = Some(url.to_string());
        Ok(ConnectOutcome { window_size: None })
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(AppError::ConnectionError("session already gone".to_string()));
        }
        Ok(())
    }

    async fn screenshot(&self, _platform: Platform) -> Result<String> {
        self.screenshot_calls.fetch_add(1, Ordering::SeqCst);
        if self.gate_screenshots.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        Ok(self.screenshot.lock().unwrap().clone())
    }

    async fn source(&self, _platform: Platform) -> Result<String> {
        Ok("<hierarchy>\n  <node text=\"Login\"/>\n  <node id=\"btn_login\"/>\n</hierarchy>".to_string())
    }

    async fn contexts(&self) -> Result<Vec<String>> {
        Ok(vec!["NATIVE_APP".to_string(), "WEBVIEW_shop".to_string()])
    }

    async fn switch_context(&self, name: &str) -> Result<()> {
        if self.reject_context.load(Ordering::SeqCst) {
            return Err(AppError::ConnectionError(format!("No such context: {}", name)));
        }
        Ok(())
    }

    async fn identify(&self, query: IdentifyQuery) -> Result<IdentifiedElement> {
        self.identify_queries.lock().unwrap().push(query);
        self.identify_result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AppError::IdentifyError("No element at point".to_string()))
    }

    async fn perform_action(&self, step: &TestStep) -> Result<()> {
        self.actions.lock().unwrap().push(step.clone());
        if self.fail_actions.load(Ordering::SeqCst) {
            return Err(AppError::ActionExecutionError("element not interactable".to_string()));
        }
        Ok(())
    }

    async fn start_run(&self, steps: &[TestStep], project_id: &str, platform: Platform) -> Result<String> {
        self.runs
            .lock()
            .unwrap()
            .push((steps.to_vec(), project_id.to_string(), platform));
        Ok("run-123".to_string())
    }
}

#[async_trait]
impl ProjectCatalogApi for FakeBridge {
    async fn list_actions(&self, _project_id: &str) -> Result<Vec<CatalogAction>> {
        Ok(Vec::new())
    }

    async fn list_objects(&self, _project_id: &str) -> Result<Vec<CatalogObject>> {
        Ok(self.objects.lock().unwrap().clone())
    }

    async fn register_object(&self, _project_id: &str, object: &CatalogObject) -> Result<CatalogObject> {
        let mut saved = object.clone();
        saved.id = Some(format!("obj-{}", self.objects.lock().unwrap().len() + 1));
        self.objects.lock().unwrap().push(saved.clone());
        Ok(saved)
    }
}
