//! Commands the panel host calls. Each one logs to the operator log and
//! returns a serializable view the host can render as-is.

use crate::application::use_cases::action_catalog::ActionCatalog;
use crate::application::use_cases::coordinate_mapper::{DisplayRect, OverlayRect};
use crate::application::use_cases::device_session::PendingOutcome;
use crate::application::use_cases::inspector_state::{Effect, InspectorState};
use crate::application::use_cases::step_import::{self, ImportReport};
use crate::application::use_cases::step_sequence::JumpIssue;
use crate::domain::device_session::{
    DeviceInfo, DeviceSession, IdentifiedElement, SessionTarget,
};
use crate::domain::error::Result;
use crate::domain::notification::Notification;
use crate::domain::recording::{InputPrompt, ObjectRegistration, PendingStep, RecordingMode};
use crate::domain::test_step::{DevicePoint, ScriptStepRecord, TestStep};
use crate::infrastructure::bridge::CatalogObject;
use crate::interfaces::logging::{add_log, emit_status_log, InspectorLogContext, LogEntry};
use crate::interfaces::run_monitor::follow_run;
use crate::interfaces::state::AppState;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelView {
    pub session: DeviceSession,
    pub target: Option<SessionTarget>,
    pub mode: RecordingMode,
    pub mode_label: String,
    pub screenshot: Option<String>,
    pub source_tree: Option<String>,
    pub identified: Option<IdentifiedElement>,
    pub highlight: Option<OverlayRect>,
    pub source_scroll_target: Option<usize>,
    pub inspection_target: Option<u32>,
    pub swipe_start: Option<DevicePoint>,
    pub pending: Option<PendingStep>,
    pub pending_in_flight: bool,
    pub input_prompt: Option<InputPrompt>,
    pub staged: Vec<TestStep>,
    pub steps: Vec<TestStep>,
    pub notifications: Vec<Notification>,
}

impl PanelView {
    fn build(state: &InspectorState, notifications: Vec<Notification>) -> Self {
        Self {
            session: state.session.clone(),
            target: state.target.clone(),
            mode: state.mode,
            mode_label: state.mode.to_string(),
            screenshot: state.frame.as_ref().map(|f| f.image.clone()),
            source_tree: state.frame.as_ref().map(|f| f.source_tree.clone()),
            identified: state.identified.clone(),
            highlight: state.highlight(),
            source_scroll_target: state.source_scroll_target(),
            inspection_target: state.inspection_target,
            swipe_start: state.mode.swipe_start(),
            pending: state.pending.clone(),
            pending_in_flight: state.pending_in_flight,
            input_prompt: state.input_prompt.clone(),
            staged: state.staged.clone(),
            steps: state.steps.steps().to_vec(),
            notifications,
        }
    }
}

/// Effects the host has to act on after a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PanelEffect {
    OpenInputPrompt { prompt: InputPrompt },
    OfferRegistration { registration: ObjectRegistration },
    ScrollSourceTo { line: usize },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelUpdate {
    pub effects: Vec<PanelEffect>,
    pub view: PanelView,
}

fn panel_effects(effects: Vec<Effect>) -> Vec<PanelEffect> {
    effects
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::OpenInputPrompt(prompt) => Some(PanelEffect::OpenInputPrompt { prompt }),
            Effect::OfferRegistration(registration) => {
                Some(PanelEffect::OfferRegistration { registration })
            }
            Effect::ScrollSourceTo(line) => Some(PanelEffect::ScrollSourceTo { line }),
            _ => None,
        })
        .collect()
}

pub fn inspector_view(state: &Arc<AppState>) -> PanelView {
    let notifications = state.notifications.list();
    state
        .inspector
        .with_state(|inspector| PanelView::build(inspector, notifications))
}

fn update(state: &Arc<AppState>, effects: Vec<Effect>) -> PanelUpdate {
    PanelUpdate {
        effects: panel_effects(effects),
        view: inspector_view(state),
    }
}

fn log_context(state: &Arc<AppState>) -> InspectorLogContext {
    state.inspector.with_state(|inspector| InspectorLogContext {
        platform: Some(inspector.platform().to_string()),
        target: inspector.session.target_ref.clone(),
        mode: Some(inspector.mode.to_string()),
        ..Default::default()
    })
}

pub async fn inspector_list_devices(state: &Arc<AppState>) -> Result<Vec<DeviceInfo>> {
    state.inspector.list_devices().await
}

pub async fn inspector_connect(state: &Arc<AppState>, target: SessionTarget) -> Result<PanelView> {
    let platform = target.platform();
    add_log(
        &state.logs,
        "INFO",
        "Inspector",
        &format!("Inspector connect requested (platform={})", platform),
    );
    let started = std::time::Instant::now();
    if let Err(err) = state.inspector.connect(target).await {
        emit_status_log(
            state.emitter.as_ref(),
            &state.logs,
            "ERROR",
            "Inspector",
            "Failed to connect inspector session",
            "failed",
            Some(&err.to_string()),
            Some(InspectorLogContext {
                platform: Some(platform.to_string()),
                ..Default::default()
            }),
        );
        return Err(err);
    }
    let mut context = log_context(state);
    context.latency_ms = Some(started.elapsed().as_millis() as i64);
    emit_status_log(
        state.emitter.as_ref(),
        &state.logs,
        "INFO",
        "Inspector",
        "Inspector session connected",
        "connected",
        None,
        Some(context),
    );
    Ok(inspector_view(state))
}

pub async fn inspector_disconnect(state: &Arc<AppState>) -> Result<PanelView> {
    let context = log_context(state);
    state.inspector.disconnect().await;
    emit_status_log(
        state.emitter.as_ref(),
        &state.logs,
        "INFO",
        "Inspector",
        "Inspector session closed",
        "disconnected",
        None,
        Some(context),
    );
    Ok(inspector_view(state))
}

/// Page unload: no response is awaited.
pub fn inspector_unload(state: &Arc<AppState>) {
    add_log(&state.logs, "INFO", "Inspector", "Panel unloading, closing session");
    state.inspector.disconnect_on_unload();
}

pub async fn inspector_refresh(state: &Arc<AppState>) -> Result<PanelView> {
    state.inspector.refresh_frame(true).await?;
    Ok(inspector_view(state))
}

pub async fn inspector_switch_context(state: &Arc<AppState>, context_name: String) -> Result<PanelView> {
    add_log(
        &state.logs,
        "INFO",
        "Inspector",
        &format!("Switching context to {}", context_name),
    );
    state.inspector.switch_context(&context_name).await?;
    Ok(inspector_view(state))
}

pub async fn inspector_click(
    state: &Arc<AppState>,
    x: f64,
    y: f64,
    display: DisplayRect,
) -> Result<PanelUpdate> {
    let effects = state.inspector.handle_click(x, y, display).await?;
    Ok(update(state, effects))
}

pub async fn inspector_set_mode(state: &Arc<AppState>, mode: RecordingMode) -> Result<PanelUpdate> {
    add_log(&state.logs, "INFO", "Inspector", &format!("Mode set to {}", mode));
    let effects = state.inspector.set_mode(mode).await?;
    Ok(update(state, effects))
}

pub async fn inspector_set_inspection_target(
    state: &Arc<AppState>,
    step_id: Option<u32>,
) -> Result<PanelUpdate> {
    let effects = state.inspector.set_inspection_target(step_id).await?;
    Ok(update(state, effects))
}

pub async fn inspector_submit_input(state: &Arc<AppState>, text: String) -> Result<PanelUpdate> {
    let effects = state.inspector.submit_input(text).await?;
    Ok(update(state, effects))
}

pub async fn inspector_cancel_input(state: &Arc<AppState>) -> Result<PanelUpdate> {
    let effects = state.inspector.cancel_input().await?;
    Ok(update(state, effects))
}

pub async fn inspector_rename_pending(state: &Arc<AppState>, name: String) -> Result<PanelUpdate> {
    let effects = state.inspector.rename_pending(name).await?;
    Ok(update(state, effects))
}

pub async fn inspector_confirm_pending(state: &Arc<AppState>) -> Result<PanelUpdate> {
    let step_name = state.inspector.with_state(|inspector| {
        inspector
            .pending
            .as_ref()
            .and_then(|pending| pending.step.step_name.clone())
    });
    let result = state.inspector.confirm_pending().await;
    let (level, message, status, error) = match &result {
        Ok((PendingOutcome::Executed, _)) => ("INFO", "Pending step executed", "staged", None),
        Ok((PendingOutcome::Failed(reason), _)) => {
            ("ERROR", "Pending step failed", "failed", Some(reason.clone()))
        }
        Ok((PendingOutcome::Skipped, _)) => ("WARN", "No pending step to execute", "skipped", None),
        Err(err) => ("ERROR", "Pending step failed", "failed", Some(err.to_string())),
    };
    let mut context = log_context(state);
    context.step_name = step_name;
    emit_status_log(
        state.emitter.as_ref(),
        &state.logs,
        level,
        "Recorder",
        message,
        status,
        error.as_deref(),
        Some(context),
    );
    let (_, effects) = result?;
    Ok(update(state, effects))
}

pub async fn inspector_cancel_pending(state: &Arc<AppState>) -> Result<PanelUpdate> {
    let effects = state.inspector.cancel_pending().await?;
    Ok(update(state, effects))
}

pub async fn inspector_cancel_swipe(state: &Arc<AppState>) -> Result<PanelUpdate> {
    let effects = state.inspector.cancel_swipe().await?;
    Ok(update(state, effects))
}

pub async fn inspector_remove_staged(state: &Arc<AppState>, index: usize) -> Result<PanelUpdate> {
    let effects = state.inspector.remove_staged(index).await?;
    Ok(update(state, effects))
}

pub async fn inspector_apply_staged(state: &Arc<AppState>) -> Result<PanelUpdate> {
    let effects = state.inspector.apply_staged().await?;
    add_log(&state.logs, "INFO", "Recorder", "Staged steps applied to the script");
    Ok(update(state, effects))
}

pub async fn inspector_register_object(
    state: &Arc<AppState>,
    registration: ObjectRegistration,
) -> Result<CatalogObject> {
    let saved = state.inspector.register_object(registration).await?;
    add_log(
        &state.logs,
        "INFO",
        "Inspector",
        &format!("Registered object {} ({}={})", saved.name, saved.selector_type, saved.value),
    );
    Ok(saved)
}

pub fn inspector_set_project(state: &Arc<AppState>, project_id: Option<String>) {
    state.inspector.set_project_id(project_id);
}

pub fn steps_add_blank(state: &Arc<AppState>) -> PanelView {
    state.inspector.update_state(|inspector| inspector.steps.add_blank());
    inspector_view(state)
}

pub fn steps_insert(state: &Arc<AppState>, at: u32, step: TestStep) -> Result<PanelView> {
    state
        .inspector
        .update_state(|inspector| inspector.steps.insert(at, step))?;
    Ok(inspector_view(state))
}

/// Returns jumps that pointed at the removed step; they have been cleared.
pub fn steps_remove(state: &Arc<AppState>, id: u32) -> Result<Vec<JumpIssue>> {
    let issues = state
        .inspector
        .update_state(|inspector| inspector.steps.remove(id))?;
    if !issues.is_empty() {
        add_log(
            &state.logs,
            "WARN",
            "Steps",
            &format!("Removing step {} cleared {} jump(s)", id, issues.len()),
        );
    }
    Ok(issues)
}

pub fn steps_move_up(state: &Arc<AppState>, id: u32) -> Result<PanelView> {
    state
        .inspector
        .update_state(|inspector| inspector.steps.move_up(id))?;
    Ok(inspector_view(state))
}

pub fn steps_move_down(state: &Arc<AppState>, id: u32) -> Result<PanelView> {
    state
        .inspector
        .update_state(|inspector| inspector.steps.move_down(id))?;
    Ok(inspector_view(state))
}

pub fn steps_update(state: &Arc<AppState>, id: u32, step: TestStep) -> Result<PanelView> {
    state
        .inspector
        .update_state(|inspector| inspector.steps.update(id, step))?;
    Ok(inspector_view(state))
}

pub fn steps_validate_jumps(state: &Arc<AppState>) -> Vec<JumpIssue> {
    state
        .inspector
        .with_state(|inspector| inspector.steps.validate_jumps())
}

/// Save payload for the script endpoints.
pub fn steps_records(state: &Arc<AppState>) -> Vec<ScriptStepRecord> {
    state.inspector.with_state(|inspector| inspector.steps.to_records())
}

/// Replaces the step list with the sheet's contents.
pub async fn steps_import(state: &Arc<AppState>, path: &Path) -> Result<ImportReport> {
    let catalog = match state.inspector.project_id() {
        Some(project_id) => state.catalog.action_catalog(&project_id).await?,
        None => ActionCatalog::default(),
    };
    let platform = state.inspector.with_state(|inspector| inspector.platform());
    let report = match step_import::import_file(path, &catalog, Some(platform)) {
        Ok(report) => report,
        Err(err) => {
            emit_status_log(
                state.emitter.as_ref(),
                &state.logs,
                "ERROR",
                "Steps",
                "Failed to import steps",
                "failed",
                Some(&err.to_string()),
                None,
            );
            return Err(err);
        }
    };
    state
        .inspector
        .update_state(|inspector| inspector.steps = report.sequence.clone());
    add_log(
        &state.logs,
        "INFO",
        "Steps",
        &format!(
            "Imported {} step(s) from {} ({} jump issue(s))",
            report.sequence.len(),
            path.display(),
            report.jump_issues.len()
        ),
    );
    Ok(report)
}

pub fn steps_export(state: &Arc<AppState>, path: &Path) -> Result<()> {
    let sequence = state.inspector.with_state(|inspector| inspector.steps.clone());
    step_import::export_csv(&sequence, path)?;
    add_log(
        &state.logs,
        "INFO",
        "Steps",
        &format!("Exported {} step(s) to {}", sequence.len(), path.display()),
    );
    Ok(())
}

/// Launches the panel's script and starts following its telemetry.
pub async fn inspector_launch_run(state: &Arc<AppState>) -> Result<String> {
    let run_id = match state.inspector.launch_current_script().await {
        Ok(run_id) => run_id,
        Err(err) => {
            emit_status_log(
                state.emitter.as_ref(),
                &state.logs,
                "ERROR",
                "Run",
                "Failed to start run",
                "failed",
                Some(&err.to_string()),
                Some(log_context(state)),
            );
            state.notifications.push(Notification::from(&err));
            return Err(err);
        }
    };
    let mut context = log_context(state);
    context.run_id = Some(run_id.clone());
    emit_status_log(
        state.emitter.as_ref(),
        &state.logs,
        "INFO",
        "Run",
        "Run started",
        "running",
        None,
        Some(context),
    );
    follow_run(state, &run_id)?;
    Ok(run_id)
}

pub fn get_logs(state: &Arc<AppState>) -> Vec<LogEntry> {
    state.logs.snapshot()
}

pub fn clear_logs(state: &Arc<AppState>) {
    state.logs.clear();
}

pub fn list_notifications(state: &Arc<AppState>) -> Vec<Notification> {
    state.notifications.list()
}

pub fn dismiss_notification(state: &Arc<AppState>, id: &str) -> bool {
    state.notifications.dismiss(id)
}
