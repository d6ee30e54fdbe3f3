use crate::application::use_cases::action_catalog::CatalogService;
use crate::application::use_cases::coordinate_mapper::{display_offset, to_device_space, DisplayRect};
use crate::application::use_cases::inspector_state::{
    Effect, InspectorEvent, InspectorState, RecorderTimings,
};
use crate::domain::device_session::{
    CaptureFrame, ConnectionState, DeviceInfo, DeviceSession, OverlayReference, Platform,
    SessionTarget, WindowSize, DEFAULT_DEVICE_OS, NATIVE_CONTEXT,
};
use crate::domain::error::{AppError, Result};
use crate::domain::notification::{Notification, Notifier};
use crate::domain::recording::{ObjectRegistration, RecordingMode};
use crate::domain::test_step::TestStep;
use crate::infrastructure::bridge::{CatalogObject, IdentifyQuery, InspectorBridge};
use crate::infrastructure::config::InspectorConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Resets the single-flight flag however the refresh ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How a confirm request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOutcome {
    /// The action ran and the step was staged.
    Executed,
    /// The action failed; the step stays pending with the error.
    Failed(String),
    /// Nothing was pending, or its action is already running.
    Skipped,
}

/// Owns one inspector panel's remote session.
///
/// All bridge traffic goes through here; the recording rules themselves live
/// in [`InspectorState::apply`].
pub struct DeviceSessionController {
    bridge: Arc<dyn InspectorBridge>,
    catalog: Arc<CatalogService>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<InspectorState>,
    project_id: Mutex<Option<String>>,
    refreshing: AtomicBool,
    /// Bumped by every connect and disconnect; a connect that resumes under
    /// another generation was cancelled.
    generation: AtomicU64,
    poller: Mutex<Option<JoinHandle<()>>>,
    refresh_interval: Duration,
}

impl DeviceSessionController {
    pub fn new(
        bridge: Arc<dyn InspectorBridge>,
        catalog: Arc<CatalogService>,
        notifier: Arc<dyn Notifier>,
        config: &InspectorConfig,
    ) -> Arc<Self> {
        let timings = RecorderTimings {
            navigate_refresh_delay: config.navigate_refresh_delay(),
            input_refresh_delay: config.input_refresh_delay(),
            swipe_duration_ms: config.swipe_duration_ms,
        };
        let state = InspectorState::new(Platform::App).with_settings(config.step_defaults(), timings);
        Arc::new(Self {
            bridge,
            catalog,
            notifier,
            state: Mutex::new(state),
            project_id: Mutex::new(config.project_id.clone()),
            refreshing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            poller: Mutex::new(None),
            refresh_interval: config.refresh_interval(),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, InspectorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read access to the panel state.
    pub fn with_state<R>(&self, f: impl FnOnce(&InspectorState) -> R) -> R {
        f(&self.lock_state())
    }

    /// Direct edits of the step list and other state not tied to the bridge.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut InspectorState) -> R) -> R {
        f(&mut self.lock_state())
    }

    pub fn snapshot(&self) -> InspectorState {
        self.lock_state().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock_state().session.connection_state
    }

    pub fn project_id(&self) -> Option<String> {
        self.project_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Project used for the object repository and run launches. Connecting a
    /// device overrides it.
    pub fn set_project_id(&self, project_id: Option<String>) {
        *self
            .project_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) =
            project_id.filter(|id| !id.trim().is_empty());
    }

    fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    fn notify_error(&self, err: &AppError) {
        self.notify(Notification::from(err));
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.bridge.list_devices().await
    }

    pub async fn connect(self: &Arc<Self>, target: SessionTarget) -> Result<()> {
        let platform = target.platform();
        let generation = {
            let mut state = self.lock_state();
            if state.session.connection_state != ConnectionState::Disconnected {
                return Err(AppError::ValidationError(
                    "A session is already open; disconnect first.".to_string(),
                ));
            }
            state.session = DeviceSession::new(platform);
            state.session.connection_state = ConnectionState::Connecting;
            state.target = Some(target.clone());
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        match self.open_remote(&target).await {
            Ok((target_ref, window_size)) => {
                let cancelled = {
                    let mut state = self.lock_state();
                    let current = self.generation.load(Ordering::SeqCst) == generation
                        && state.session.connection_state == ConnectionState::Connecting;
                    if current {
                        let session = &mut state.session;
                        session.connection_state = ConnectionState::Connected;
                        session.target_ref = Some(target_ref.clone());
                        session.hardware_resolution = window_size.unwrap_or_default();
                        session.overlay_reference = OverlayReference::for_platform(platform);
                        session.current_context = NATIVE_CONTEXT.to_string();
                    }
                    !current
                };
                if cancelled {
                    info!(platform = %platform, target = %target_ref, "Connect cancelled, closing remote session");
                    if let Err(err) = self.bridge.disconnect().await {
                        warn!(error = %err, "Bridge disconnect after cancelled connect failed");
                    }
                    return Err(AppError::ConnectionError("Connection cancelled".to_string()));
                }
                info!(platform = %platform, target = %target_ref, "Inspector session connected");
                self.notify(Notification::success(format!("Connected to {}", target_ref)));

                self.load_locators().await;
                if let Err(err) = self.refresh_frame(true).await {
                    debug!(error = %err, "Initial refresh failed");
                }
                if platform == Platform::App {
                    self.start_polling(self.refresh_interval);
                }
                Ok(())
            }
            Err(err) => {
                {
                    let mut state = self.lock_state();
                    if self.generation.load(Ordering::SeqCst) == generation {
                        state.session.connection_state = ConnectionState::Disconnected;
                        state.target = None;
                    }
                }
                error!(platform = %platform, error = %err, "Inspector connect failed");
                let err = match err {
                    AppError::ConnectionError(_) | AppError::ValidationError(_) => err,
                    other => AppError::ConnectionError(other.to_string()),
                };
                self.notify_error(&err);
                Err(err)
            }
        }
    }

    async fn open_remote(&self, target: &SessionTarget) -> Result<(String, Option<WindowSize>)> {
        match target {
            SessionTarget::Device {
                device_id,
                project_id,
                os,
            } => {
                let project_id = project_id.trim();
                if project_id.is_empty() {
                    return Err(AppError::ValidationError("project_id is required".to_string()));
                }
                let requested_os = os.as_deref().map(str::trim).filter(|os| !os.is_empty());
                let (device_id, os) = match device_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
                    Some(id) => (id.to_string(), requested_os.unwrap_or(DEFAULT_DEVICE_OS).to_string()),
                    None => {
                        let device = self
                            .bridge
                            .list_devices()
                            .await?
                            .into_iter()
                            .next()
                            .ok_or_else(|| AppError::ConnectionError("No devices found".to_string()))?;
                        let os = requested_os
                            .map(str::to_string)
                            .or_else(|| device.os.filter(|os| !os.trim().is_empty()))
                            .unwrap_or_else(|| DEFAULT_DEVICE_OS.to_string());
                        (device.id, os)
                    }
                };
                *self
                    .project_id
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(project_id.to_string());
                debug!(device = %device_id, os = %os, "Connecting device");
                let outcome = self.bridge.connect_device(&device_id, project_id, &os).await?;
                Ok((device_id, outcome.window_size))
            }
            SessionTarget::Url { url } => {
                let parsed = url::Url::parse(url.trim())
                    .map_err(|e| AppError::ValidationError(format!("Invalid URL {}: {}", url, e)))?;
                let outcome = self.bridge.connect_web(parsed.as_str()).await?;
                Ok((url.trim().to_string(), outcome.window_size))
            }
        }
    }

    async fn load_locators(&self) {
        let Some(project_id) = self.project_id() else {
            return;
        };
        match self.catalog.locator_catalog(&project_id).await {
            Ok(catalog) => {
                self.lock_state()
                    .apply(InspectorEvent::LocatorsLoaded(catalog));
            }
            Err(err) => warn!(project_id = %project_id, error = %err, "Object repository unavailable"),
        }
    }

    /// Ends the session. Safe to call any number of times.
    pub async fn disconnect(&self) {
        self.stop_polling();
        let was_open = {
            let mut state = self.lock_state();
            self.generation.fetch_add(1, Ordering::SeqCst);
            let was_open = state.session.connection_state != ConnectionState::Disconnected;
            state.apply(InspectorEvent::Disconnected);
            was_open
        };
        if !was_open {
            return;
        }
        if let Err(err) = self.bridge.disconnect().await {
            warn!(error = %err, "Bridge disconnect failed");
        }
        info!("Inspector session disconnected");
    }

    /// Fire-and-forget disconnect for page unload.
    pub fn disconnect_on_unload(self: &Arc<Self>) {
        self.stop_polling();
        let this = Arc::clone(self);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { this.disconnect().await });
            }
            Err(_) => warn!("No runtime available for unload disconnect"),
        }
    }

    /// Fetches a new frame. Returns `Ok(false)` when skipped because another
    /// refresh is in flight or no session is open.
    pub async fn refresh_frame(&self, notify_on_error: bool) -> Result<bool> {
        let platform = {
            let state = self.lock_state();
            if !state.session.is_connected() {
                return Ok(false);
            }
            state.platform()
        };
        if self.refreshing.swap(true, Ordering::SeqCst) {
            debug!("Refresh already in flight, skipping");
            return Ok(false);
        }
        let _guard = RefreshGuard(&self.refreshing);

        let contexts = async {
            match platform {
                Platform::App => Some(self.bridge.contexts().await),
                Platform::Web => None,
            }
        };
        let (image, source, contexts) = tokio::join!(
            self.bridge.screenshot(platform),
            self.bridge.source(platform),
            contexts
        );

        let outcome = match (image, source) {
            (Ok(image), Ok(source_tree)) => Ok((image, source_tree)),
            (Err(err), _) | (_, Err(err)) => Err(err),
        };
        let contexts = match contexts {
            Some(Ok(contexts)) => Some(contexts),
            Some(Err(err)) => {
                warn!(error = %err, "Context listing failed");
                None
            }
            None => None,
        };

        let effects = {
            let mut state = self.lock_state();
            if !state.session.is_connected() {
                return Ok(false);
            }
            match outcome {
                Ok((image, source_tree)) => {
                    let natural_size = decode_natural_size(&image);
                    let frame = CaptureFrame {
                        image,
                        source_tree,
                        natural_size,
                        captured_at: chrono::Utc::now().timestamp_millis(),
                    };
                    state.apply(InspectorEvent::FrameRefreshed { frame, contexts })
                }
                Err(err) => {
                    warn!(error = %err, "Frame refresh failed");
                    let effects = state.apply(InspectorEvent::RefreshFailed {
                        message: err.to_string(),
                        notify: notify_on_error,
                    });
                    drop(state);
                    self.emit_notices(effects);
                    return Err(err);
                }
            }
        };
        self.emit_notices(effects);
        Ok(true)
    }

    pub async fn switch_context(&self, name: &str) -> Result<()> {
        {
            let state = self.lock_state();
            if !state.session.is_connected() || state.platform() != Platform::App {
                return Err(AppError::ValidationError(
                    "Context switching needs a connected native session".to_string(),
                ));
            }
        }
        if let Err(err) = self.bridge.switch_context(name).await {
            warn!(context = %name, error = %err, "Context switch rejected");
            self.notify_error(&err);
            return Err(err);
        }
        self.lock_state().session.current_context = name.to_string();
        info!(context = %name, "Switched context");
        if let Err(err) = self.refresh_frame(true).await {
            debug!(error = %err, "Refresh after context switch failed");
        }
        Ok(())
    }

    pub fn start_polling(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                if !controller.lock_state().session.is_connected() {
                    break;
                }
                if let Err(err) = controller.refresh_frame(false).await {
                    debug!(error = %err, "Polling refresh failed");
                }
            }
        });
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn stop_polling(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Operator clicked the rendered screenshot at (`click_x`, `click_y`).
    /// Returns the effects the panel has to render (prompts, offers, scroll).
    pub async fn handle_click(
        self: &Arc<Self>,
        click_x: f64,
        click_y: f64,
        display: DisplayRect,
    ) -> Result<Vec<Effect>> {
        let (platform, hardware) = {
            let state = self.lock_state();
            if !state.session.is_connected() {
                return Err(AppError::ConnectionError("No active session".to_string()));
            }
            (state.platform(), state.session.hardware_resolution)
        };
        let (device_point, offset) = match (
            to_device_space(click_x, click_y, display, hardware),
            display_offset(click_x, click_y, display),
        ) {
            (Some(point), Some(offset)) => (point, offset),
            _ => {
                return Err(AppError::ValidationError(
                    "Screenshot is not rendered yet".to_string(),
                ))
            }
        };

        let query = IdentifyQuery {
            x: offset.x,
            y: offset.y,
            display_width: offset.display_width,
            display_height: offset.display_height,
            platform,
        };
        let event = match self.bridge.identify(query).await {
            Ok(element) => {
                debug!(name = %element.name, x = device_point.x, y = device_point.y, "Identified element");
                InspectorEvent::ElementIdentified {
                    element,
                    device_point,
                }
            }
            Err(err) => {
                let message = match &err {
                    AppError::IdentifyError(msg) | AppError::ConnectionError(msg) => msg.clone(),
                    other => other.to_string(),
                };
                let effects = self.lock_state().apply(InspectorEvent::IdentifyFailed { message });
                self.emit_notices(effects);
                return Err(match err {
                    AppError::IdentifyError(_) => err,
                    other => AppError::IdentifyError(other.to_string()),
                });
            }
        };
        self.dispatch(event).await
    }

    /// Applies an event and carries out the bridge side effects it asks for.
    pub async fn dispatch(self: &Arc<Self>, event: InspectorEvent) -> Result<Vec<Effect>> {
        let (remaining, _) = self.dispatch_tracked(event).await;
        Ok(remaining)
    }

    /// Like [`Self::dispatch`], also reporting how a pending step execution ended.
    async fn dispatch_tracked(
        self: &Arc<Self>,
        event: InspectorEvent,
    ) -> (Vec<Effect>, Option<PendingOutcome>) {
        let effects = self.lock_state().apply(event);
        let mut remaining = Vec::new();
        let mut outcome = None;
        for effect in effects {
            match effect {
                Effect::Notify(notification) => self.notify(notification),
                Effect::ExecuteNow {
                    step,
                    refresh_after,
                } => self.execute_now(step, refresh_after).await,
                Effect::ExecutePending(step) => {
                    outcome = Some(self.execute_pending(step).await);
                }
                other => remaining.push(other),
            }
        }
        (remaining, outcome)
    }

    async fn execute_pending(&self, step: TestStep) -> PendingOutcome {
        let (follow_up, outcome) = match self.bridge.perform_action(&step).await {
            Ok(()) => {
                info!(action = %step.action, "Pending step executed");
                (InspectorEvent::PendingExecuted, PendingOutcome::Executed)
            }
            Err(err) => {
                warn!(action = %step.action, error = %err, "Pending step failed");
                let message = error_message(&err);
                (
                    InspectorEvent::PendingFailed {
                        message: message.clone(),
                    },
                    PendingOutcome::Failed(message),
                )
            }
        };
        let effects = self.lock_state().apply(follow_up);
        self.emit_notices(effects);
        outcome
    }

    async fn execute_now(self: &Arc<Self>, step: TestStep, refresh_after: Duration) {
        match self.bridge.perform_action(&step).await {
            Ok(()) => {
                debug!(action = %step.action, "Executed navigate action");
                self.schedule_refresh(refresh_after);
            }
            Err(err) => {
                warn!(action = %step.action, error = %err, "Navigate action failed");
                let err = match err {
                    AppError::ActionExecutionError(_) => err,
                    other => AppError::ActionExecutionError(other.to_string()),
                };
                self.notify_error(&err);
            }
        }
    }

    fn schedule_refresh(self: &Arc<Self>, delay: Duration) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(controller) = weak.upgrade() {
                if let Err(err) = controller.refresh_frame(false).await {
                    debug!(error = %err, "Delayed refresh failed");
                }
            }
        });
    }

    fn emit_notices(&self, effects: Vec<Effect>) {
        for effect in effects {
            if let Effect::Notify(notification) = effect {
                self.notify(notification);
            }
        }
    }

    pub async fn set_mode(self: &Arc<Self>, mode: RecordingMode) -> Result<Vec<Effect>> {
        self.dispatch(InspectorEvent::SetMode(mode)).await
    }

    pub async fn submit_input(self: &Arc<Self>, text: String) -> Result<Vec<Effect>> {
        self.dispatch(InspectorEvent::InputSubmitted { text }).await
    }

    pub async fn cancel_input(self: &Arc<Self>) -> Result<Vec<Effect>> {
        self.dispatch(InspectorEvent::InputCancelled).await
    }

    pub async fn confirm_pending(self: &Arc<Self>) -> Result<(PendingOutcome, Vec<Effect>)> {
        let (remaining, outcome) = self.dispatch_tracked(InspectorEvent::ConfirmPending).await;
        Ok((outcome.unwrap_or(PendingOutcome::Skipped), remaining))
    }

    pub async fn cancel_pending(self: &Arc<Self>) -> Result<Vec<Effect>> {
        self.dispatch(InspectorEvent::CancelPending).await
    }

    pub async fn rename_pending(self: &Arc<Self>, name: String) -> Result<Vec<Effect>> {
        self.dispatch(InspectorEvent::RenamePending { name }).await
    }

    pub async fn cancel_swipe(self: &Arc<Self>) -> Result<Vec<Effect>> {
        self.dispatch(InspectorEvent::CancelSwipe).await
    }

    pub async fn remove_staged(self: &Arc<Self>, index: usize) -> Result<Vec<Effect>> {
        self.dispatch(InspectorEvent::RemoveStaged { index }).await
    }

    pub async fn apply_staged(self: &Arc<Self>) -> Result<Vec<Effect>> {
        self.dispatch(InspectorEvent::ApplyStaged).await
    }

    pub async fn set_inspection_target(self: &Arc<Self>, step_id: Option<u32>) -> Result<Vec<Effect>> {
        self.dispatch(InspectorEvent::SetInspectionTarget(step_id)).await
    }

    pub async fn register_object(&self, registration: ObjectRegistration) -> Result<CatalogObject> {
        let project_id = self
            .project_id()
            .ok_or_else(|| AppError::ValidationError("project_id is required".to_string()))?;
        let platform = self.lock_state().platform();
        match self.catalog.register(&project_id, platform, &registration).await {
            Ok(saved) => {
                let effects = self
                    .lock_state()
                    .apply(InspectorEvent::ObjectRegistered(saved.clone()));
                self.emit_notices(effects);
                Ok(saved)
            }
            Err(err) => {
                self.notify_error(&err);
                Err(err)
            }
        }
    }

    /// Starts a run of `steps`, skipping rows without an action.
    pub async fn launch_run(&self, steps: &[TestStep], project_id: &str, platform: Platform) -> Result<String> {
        let runnable: Vec<TestStep> = steps
            .iter()
            .filter(|step| !step.action.is_blank())
            .cloned()
            .collect();
        if runnable.is_empty() {
            return Err(AppError::ValidationError("No steps with an action to run".to_string()));
        }
        if project_id.trim().is_empty() {
            return Err(AppError::ValidationError("project_id is required".to_string()));
        }
        let run_id = self.bridge.start_run(&runnable, project_id, platform).await?;
        info!(run_id = %run_id, steps = runnable.len(), "Run started");
        Ok(run_id)
    }

    /// Runs the panel's own step list.
    pub async fn launch_current_script(&self) -> Result<String> {
        let (steps, platform) = {
            let state = self.lock_state();
            (state.steps.steps().to_vec(), state.platform())
        };
        let project_id = self
            .project_id()
            .ok_or_else(|| AppError::ValidationError("project_id is required".to_string()))?;
        self.launch_run(&steps, &project_id, platform).await
    }
}

impl Drop for DeviceSessionController {
    fn drop(&mut self) {
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(handle) = poller.take() {
                handle.abort();
            }
        }
    }
}

fn error_message(err: &AppError) -> String {
    match err {
        AppError::ActionExecutionError(msg) | AppError::ConnectionError(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// Intrinsic size of a base64 screenshot (bare or `data:` URL). `None` when
/// the payload cannot be decoded.
pub fn decode_natural_size(image: &str) -> Option<WindowSize> {
    let payload = image
        .split_once("base64,")
        .map(|(_, data)| data)
        .unwrap_or(image)
        .trim();
    let bytes = match STANDARD.decode(payload) {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(error = %err, "Screenshot is not valid base64");
            return None;
        }
    };
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    match reader.into_dimensions() {
        Ok((width, height)) => Some(WindowSize::new(width, height)),
        Err(err) => {
            debug!(error = %err, "Screenshot dimensions unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::test_support::FakeBridge;
    use crate::domain::device_session::{ElementBounds, IdentifiedElement};
    use crate::domain::recording::RecordSubMode;
    use crate::domain::test_step::StepAction;
    use crate::interfaces::notifications::NotificationCenter;

    fn controller_with(bridge: Arc<FakeBridge>) -> (Arc<DeviceSessionController>, Arc<NotificationCenter>) {
        let notifications = Arc::new(NotificationCenter::new());
        let catalog = Arc::new(CatalogService::new(bridge.clone()));
        let mut config = InspectorConfig::default();
        config.refresh_interval_ms = 60_000;
        let controller =
            DeviceSessionController::new(bridge, catalog, notifications.clone(), &config);
        (controller, notifications)
    }

    fn device(project: &str) -> SessionTarget {
        SessionTarget::Device {
            device_id: None,
            project_id: project.to_string(),
            os: None,
        }
    }

    fn png_base64(width: u32, height: u32) -> String {
        let img = image::RgbImage::new(width, height);
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        STANDARD.encode(bytes.into_inner())
    }

    #[tokio::test]
    async fn test_connect_selects_first_device_and_refreshes() {
        let bridge = Arc::new(FakeBridge::new());
        let (controller, _) = controller_with(bridge.clone());

        controller.connect(device("p1")).await.unwrap();

        assert_eq!(
            bridge.connected_device.lock().unwrap().as_deref(),
            Some("emulator-5554")
        );
        controller.with_state(|state| {
            assert!(state.session.is_connected());
            assert_eq!(state.session.hardware_resolution, WindowSize::new(1080, 1920));
            assert_eq!(state.session.available_contexts.len(), 2);
            assert!(state.frame.is_some());
        });
        assert!(controller.is_polling());
        assert_eq!(bridge.screenshot_calls(), 1);
        controller.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_failure_reverts_to_disconnected() {
        let bridge = Arc::new(FakeBridge::new());
        bridge.fail_connect.store(true, Ordering::SeqCst);
        let (controller, notifications) = controller_with(bridge);

        let err = controller.connect(device("p1")).await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionError(_)));
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
        assert_eq!(notifications.list().len(), 1);
        assert!(!controller.is_polling());
    }

    #[tokio::test]
    async fn test_connect_sends_device_os() {
        let bridge = Arc::new(FakeBridge::new());
        let (controller, _) = controller_with(bridge.clone());
        controller.connect(device("p1")).await.unwrap();
        assert_eq!(bridge.connected_os.lock().unwrap().as_deref(), Some("Android"));
        controller.disconnect().await;

        bridge.devices.lock().unwrap()[0].os = Some("iOS".to_string());
        controller.connect(device("p1")).await.unwrap();
        assert_eq!(bridge.connected_os.lock().unwrap().as_deref(), Some("iOS"));
        controller.disconnect().await;

        let explicit = SessionTarget::Device {
            device_id: Some("R58M".to_string()),
            project_id: "p1".to_string(),
            os: None,
        };
        controller.connect(explicit).await.unwrap();
        assert_eq!(bridge.connected_device.lock().unwrap().as_deref(), Some("R58M"));
        assert_eq!(bridge.connected_os.lock().unwrap().as_deref(), Some(DEFAULT_DEVICE_OS));
        controller.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_while_connecting_cancels_session() {
        let bridge = Arc::new(FakeBridge::new());
        bridge.gate_connect.store(true, Ordering::SeqCst);
        let (controller, notifications) = controller_with(bridge.clone());

        let cancel = async {
            bridge.entered.notified().await;
            assert_eq!(controller.connection_state(), ConnectionState::Connecting);
            controller.disconnect().await;
            bridge.gate.notify_one();
        };
        let (connected, _) = tokio::join!(controller.connect(device("p1")), cancel);

        assert_eq!(
            connected.unwrap_err(),
            AppError::ConnectionError("Connection cancelled".to_string())
        );
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
        assert!(!controller.is_polling());
        assert_eq!(bridge.screenshot_calls(), 0);
        // once for the operator's disconnect, once for the late remote session
        assert_eq!(bridge.disconnect_calls(), 2);
        assert!(notifications
            .list()
            .iter()
            .all(|n| !n.message.starts_with("Connected to")));

        bridge.gate_connect.store(false, Ordering::SeqCst);
        controller.connect(device("p1")).await.unwrap();
        assert!(controller.is_polling());
        controller.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_without_devices_is_a_connection_error() {
        let bridge = Arc::new(FakeBridge::new());
        bridge.devices.lock().unwrap().clear();
        let (controller, _) = controller_with(bridge);
        let err = controller.connect(device("p1")).await.unwrap_err();
        assert_eq!(err, AppError::ConnectionError("No devices found".to_string()));
    }

    #[tokio::test]
    async fn test_only_one_refresh_in_flight() {
        let bridge = Arc::new(FakeBridge::new());
        let (controller, _) = controller_with(bridge.clone());
        controller.connect(device("p1")).await.unwrap();
        controller.stop_polling();
        let before = bridge.screenshot_calls();
        bridge.gate_screenshots.store(true, Ordering::SeqCst);

        let release = async {
            bridge.entered.notified().await;
            bridge.gate.notify_one();
        };
        let (first, second, _) = tokio::join!(
            controller.refresh_frame(false),
            controller.refresh_frame(false),
            release
        );

        let ran = [first.unwrap(), second.unwrap()];
        assert_eq!(ran.iter().filter(|ran| **ran).count(), 1);
        assert_eq!(bridge.screenshot_calls() - before, 1);
        controller.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_clears_artifacts() {
        let bridge = Arc::new(FakeBridge::new());
        bridge.fail_disconnect.store(true, Ordering::SeqCst);
        let (controller, _) = controller_with(bridge.clone());
        controller.connect(device("p1")).await.unwrap();
        controller
            .set_mode(RecordingMode::Record {
                sub: RecordSubMode::Click,
            })
            .await
            .unwrap();
        controller
            .handle_click(180.0, 320.0, DisplayRect::new(0.0, 0.0, 360.0, 640.0))
            .await
            .unwrap();
        assert!(controller.with_state(|s| s.pending.is_some()));

        controller.disconnect().await;
        controller.disconnect().await;

        assert_eq!(bridge.disconnect_calls(), 1);
        assert!(!controller.is_polling());
        controller.with_state(|state| {
            assert_eq!(state.session.connection_state, ConnectionState::Disconnected);
            assert!(state.frame.is_none());
            assert!(state.pending.is_none());
            assert!(state.identified.is_none());
        });
    }

    #[tokio::test]
    async fn test_click_to_highlight_end_to_end() {
        let bridge = Arc::new(FakeBridge::new());
        let (controller, _) = controller_with(bridge.clone());
        controller.connect(device("p1")).await.unwrap();
        controller
            .set_mode(RecordingMode::Record {
                sub: RecordSubMode::Tap,
            })
            .await
            .unwrap();

        controller
            .handle_click(180.0, 320.0, DisplayRect::new(0.0, 0.0, 360.0, 640.0))
            .await
            .unwrap();

        let query = bridge.identify_queries.lock().unwrap()[0];
        assert_eq!((query.x, query.y), (180.0, 320.0));
        assert_eq!(query.display_width, 360.0);
        controller.with_state(|state| {
            let step = &state.pending.as_ref().unwrap().step;
            assert_eq!(step.option, "540,960");
            let rect = state.highlight().unwrap();
            assert!((rect.left_pct - 46.296).abs() < 0.001);
            assert!((rect.top_pct - 46.875).abs() < 0.001);
            assert!((rect.width_pct - 9.259).abs() < 0.001);
            assert!((rect.height_pct - 5.208).abs() < 0.001);
        });
        controller.disconnect().await;
    }

    #[tokio::test]
    async fn test_identify_failure_leaves_state_untouched() {
        let bridge = Arc::new(FakeBridge::new());
        *bridge.identify_result.lock().unwrap() = None;
        let (controller, notifications) = controller_with(bridge.clone());
        controller.connect(device("p1")).await.unwrap();
        controller
            .set_mode(RecordingMode::Record {
                sub: RecordSubMode::swipe(),
            })
            .await
            .unwrap();
        let before = notifications.list().len();

        let err = controller
            .handle_click(10.0, 10.0, DisplayRect::new(0.0, 0.0, 360.0, 640.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IdentifyError(_)));
        assert_eq!(notifications.list().len(), before + 1);
        controller.with_state(|state| {
            assert_eq!(state.mode.swipe_start(), None);
            assert!(state.pending.is_none());
        });
        controller.disconnect().await;
    }

    #[tokio::test]
    async fn test_confirm_pending_executes_then_stages() {
        let bridge = Arc::new(FakeBridge::new());
        let (controller, _) = controller_with(bridge.clone());
        controller.connect(device("p1")).await.unwrap();
        controller
            .set_mode(RecordingMode::Record {
                sub: RecordSubMode::Click,
            })
            .await
            .unwrap();
        let display = DisplayRect::new(0.0, 0.0, 360.0, 640.0);

        let (outcome, _) = controller.confirm_pending().await.unwrap();
        assert_eq!(outcome, PendingOutcome::Skipped);

        bridge.fail_actions.store(true, Ordering::SeqCst);
        controller.handle_click(100.0, 100.0, display).await.unwrap();
        let (outcome, _) = controller.confirm_pending().await.unwrap();
        assert_eq!(
            outcome,
            PendingOutcome::Failed("element not interactable".to_string())
        );
        controller.with_state(|state| {
            assert!(state.staged.is_empty());
            assert!(state.pending.as_ref().unwrap().last_error.is_some());
        });

        bridge.fail_actions.store(false, Ordering::SeqCst);
        let (outcome, _) = controller.confirm_pending().await.unwrap();
        assert_eq!(outcome, PendingOutcome::Executed);
        controller.with_state(|state| {
            assert!(state.pending.is_none());
            assert_eq!(state.staged.len(), 1);
            assert_eq!(state.staged[0].action, StepAction::Click);
        });
        assert_eq!(bridge.actions.lock().unwrap().len(), 2);
        controller.disconnect().await;
    }

    #[tokio::test]
    async fn test_navigate_click_executes_without_staging() {
        let bridge = Arc::new(FakeBridge::new());
        let (controller, _) = controller_with(bridge.clone());
        controller.connect(device("p1")).await.unwrap();

        controller
            .handle_click(100.0, 100.0, DisplayRect::new(0.0, 0.0, 360.0, 640.0))
            .await
            .unwrap();
        assert_eq!(bridge.actions.lock().unwrap().len(), 1);
        assert!(controller.with_state(|s| s.staged.is_empty() && s.pending.is_none()));
        controller.disconnect().await;
    }

    #[tokio::test]
    async fn test_switch_context_rules() {
        let bridge = Arc::new(FakeBridge::new());
        let (controller, _) = controller_with(bridge.clone());
        assert!(controller.switch_context("WEBVIEW_shop").await.is_err());

        controller.connect(device("p1")).await.unwrap();
        controller.switch_context("WEBVIEW_shop").await.unwrap();
        assert_eq!(
            controller.with_state(|s| s.session.current_context.clone()),
            "WEBVIEW_shop"
        );

        bridge.reject_context.store(true, Ordering::SeqCst);
        assert!(controller.switch_context("WEBVIEW_gone").await.is_err());
        assert_eq!(
            controller.with_state(|s| s.session.current_context.clone()),
            "WEBVIEW_shop"
        );
        controller.disconnect().await;
    }

    #[tokio::test]
    async fn test_web_session_uses_natural_image_size() {
        let bridge = Arc::new(FakeBridge::new());
        *bridge.screenshot.lock().unwrap() = png_base64(64, 40);
        let (controller, _) = controller_with(bridge.clone());

        controller
            .connect(SessionTarget::Url {
                url: "https://shop.test/login".to_string(),
            })
            .await
            .unwrap();
        assert!(!controller.is_polling());

        controller.update_state(|state| {
            state.identified = Some(web_element(16.0, 10.0, 32.0, 20.0));
        });
        let rect = controller.with_state(|s| s.highlight()).unwrap();
        assert!((rect.left_pct - 25.0).abs() < 1e-9);
        assert!((rect.height_pct - 25.0).abs() < 1e-9);
        controller.disconnect().await;
    }

    #[tokio::test]
    async fn test_polling_refreshes_until_disconnect() {
        let bridge = Arc::new(FakeBridge::new());
        let (controller, _) = controller_with(bridge.clone());
        controller.connect(device("p1")).await.unwrap();
        controller.start_polling(Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(bridge.screenshot_calls() >= 3);

        controller.disconnect().await;
        let after = bridge.screenshot_calls();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(bridge.screenshot_calls(), after);
    }

    #[tokio::test]
    async fn test_launch_run_skips_blank_steps() {
        let bridge = Arc::new(FakeBridge::new());
        let (controller, _) = controller_with(bridge.clone());
        let mut click = TestStep::blank(1);
        click.action = StepAction::Click;
        click.selector_value = "btn".to_string();
        let steps = vec![click, TestStep::blank(2)];

        let run_id = controller.launch_run(&steps, "p1", Platform::App).await.unwrap();
        assert_eq!(run_id, "run-123");
        let runs = bridge.runs.lock().unwrap();
        assert_eq!(runs[0].0.len(), 1);

        drop(runs);
        let err = controller
            .launch_run(&[TestStep::blank(1)], "p1", Platform::App)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn test_decode_natural_size() {
        assert_eq!(decode_natural_size(&png_base64(3, 7)), Some(WindowSize::new(3, 7)));
        let data_url = format!("data:image/png;base64,{}", png_base64(5, 2));
        assert_eq!(decode_natural_size(&data_url), Some(WindowSize::new(5, 2)));
        assert_eq!(decode_natural_size("not-base64!"), None);
    }

    fn web_element(x1: f64, y1: f64, x2: f64, y2: f64) -> IdentifiedElement {
        IdentifiedElement {
            name: "field".to_string(),
            selector_type: "css".to_string(),
            selector_value: "#q".to_string(),
            bounds: ElementBounds { x1, y1, x2, y2 },
            source_line: None,
            window_size: None,
        }
    }
}
