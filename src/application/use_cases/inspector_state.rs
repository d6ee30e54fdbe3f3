//! Inspector panel state and the reducer that drives it.
//!
//! Everything the panel shows lives in [`InspectorState`]. Bridge results and
//! operator gestures arrive as [`InspectorEvent`]s; `apply` mutates the state
//! and returns the side effects the controller has to carry out.

use crate::application::use_cases::action_catalog::LocatorCatalog;
use crate::application::use_cases::coordinate_mapper::{to_overlay_rect, OverlayRect};
use crate::application::use_cases::step_sequence::StepSequence;
use crate::domain::device_session::{
    CaptureFrame, ConnectionState, DeviceSession, IdentifiedElement, Platform, SessionTarget,
};
use crate::domain::notification::Notification;
use crate::domain::recording::{
    InputIntent, InputPrompt, ObjectRegistration, PendingStep, RecordSubMode, RecordingMode,
};
use crate::domain::test_step::{
    tap_option, DevicePoint, StepAction, StepDefaults, SwipeGesture, TestStep,
    ROOT_SELECTOR_TYPE, ROOT_SELECTOR_VALUE,
};
use crate::infrastructure::bridge::CatalogObject;
use std::time::Duration;
use tracing::debug;

pub const OBJECT_ALREADY_KNOWN: &str = "Element already exists in Object Repository.";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecorderTimings {
    pub navigate_refresh_delay: Duration,
    pub input_refresh_delay: Duration,
    pub swipe_duration_ms: u64,
}

impl Default for RecorderTimings {
    fn default() -> Self {
        Self {
            navigate_refresh_delay: Duration::from_millis(1_000),
            input_refresh_delay: Duration::from_millis(1_500),
            swipe_duration_ms: 800,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InspectorEvent {
    /// A click was mapped and identified by the bridge.
    ElementIdentified {
        element: IdentifiedElement,
        device_point: DevicePoint,
    },
    IdentifyFailed {
        message: String,
    },
    SetMode(RecordingMode),
    SetInspectionTarget(Option<u32>),
    InputSubmitted {
        text: String,
    },
    InputCancelled,
    RenamePending {
        name: String,
    },
    ConfirmPending,
    PendingExecuted,
    PendingFailed {
        message: String,
    },
    CancelPending,
    CancelSwipe,
    RemoveStaged {
        index: usize,
    },
    ApplyStaged,
    FrameRefreshed {
        frame: CaptureFrame,
        contexts: Option<Vec<String>>,
    },
    RefreshFailed {
        message: String,
        notify: bool,
    },
    ObjectRegistered(CatalogObject),
    LocatorsLoaded(LocatorCatalog),
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Notify(Notification),
    /// NAVIGATE: run the step right away and refresh after the delay.
    ExecuteNow {
        step: TestStep,
        refresh_after: Duration,
    },
    /// Run the confirmed pending step; report back with
    /// `PendingExecuted` / `PendingFailed`.
    ExecutePending(TestStep),
    OpenInputPrompt(InputPrompt),
    OfferRegistration(ObjectRegistration),
    ScrollSourceTo(usize),
}

#[derive(Debug, Clone)]
pub struct InspectorState {
    pub session: DeviceSession,
    pub target: Option<SessionTarget>,
    pub frame: Option<CaptureFrame>,
    pub identified: Option<IdentifiedElement>,
    pub mode: RecordingMode,
    pub inspection_target: Option<u32>,
    pub pending: Option<PendingStep>,
    pub pending_in_flight: bool,
    pub input_prompt: Option<InputPrompt>,
    pub staged: Vec<TestStep>,
    pub steps: StepSequence,
    pub locators: LocatorCatalog,
    pub defaults: StepDefaults,
    pub timings: RecorderTimings,
}

impl InspectorState {
    pub fn new(platform: Platform) -> Self {
        Self {
            session: DeviceSession::new(platform),
            target: None,
            frame: None,
            identified: None,
            mode: RecordingMode::default(),
            inspection_target: None,
            pending: None,
            pending_in_flight: false,
            input_prompt: None,
            staged: Vec::new(),
            steps: StepSequence::new(),
            locators: LocatorCatalog::default(),
            defaults: StepDefaults::default(),
            timings: RecorderTimings::default(),
        }
    }

    pub fn with_settings(mut self, defaults: StepDefaults, timings: RecorderTimings) -> Self {
        self.defaults = defaults;
        self.timings = timings;
        self
    }

    pub fn platform(&self) -> Platform {
        self.session.platform
    }

    /// Highlight for the identified element, in percent of the rendered image.
    pub fn highlight(&self) -> Option<OverlayRect> {
        let element = self.identified.as_ref()?;
        let reference = self
            .session
            .overlay_reference_size(self.frame.as_ref(), Some(element));
        to_overlay_rect(&element.bounds, reference)
    }

    pub fn source_scroll_target(&self) -> Option<usize> {
        self.identified.as_ref().and_then(|el| el.source_line)
    }

    pub fn web_url(&self) -> Option<&str> {
        match &self.target {
            Some(SessionTarget::Url { url }) => Some(url.as_str()),
            _ => None,
        }
    }

    /// Clears everything tied to the remote session. Steps stay.
    pub fn reset_session_artifacts(&mut self) {
        self.session.connection_state = ConnectionState::Disconnected;
        self.session.available_contexts.clear();
        self.session.last_refresh_error = None;
        self.frame = None;
        self.identified = None;
        self.pending = None;
        self.pending_in_flight = false;
        self.input_prompt = None;
        self.staged.clear();
        self.inspection_target = None;
        self.mode.clear_swipe_start();
    }

    pub fn apply(&mut self, event: InspectorEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            InspectorEvent::ElementIdentified {
                element,
                device_point,
            } => self.on_identified(element, device_point, &mut effects),
            InspectorEvent::IdentifyFailed { message } => {
                effects.push(Effect::Notify(Notification::error(format!(
                    "Could not identify element: {}",
                    message
                ))));
            }
            InspectorEvent::SetMode(mode) => {
                debug!(from = %self.mode, to = %mode, "Recording mode changed");
                self.mode = mode;
                self.mode.clear_swipe_start();
            }
            InspectorEvent::SetInspectionTarget(target) => match target {
                Some(id) if self.steps.get(id).is_none() => {
                    effects.push(Effect::Notify(Notification::error(format!(
                        "Step {} does not exist",
                        id
                    ))));
                }
                _ => self.inspection_target = target,
            },
            InspectorEvent::InputSubmitted { text } => self.on_input(text, &mut effects),
            InspectorEvent::InputCancelled => self.input_prompt = None,
            InspectorEvent::RenamePending { name } => {
                if let Some(pending) = self.pending.as_mut() {
                    let name = name.trim();
                    pending.step.step_name = if name.is_empty() {
                        None
                    } else {
                        Some(name.to_string())
                    };
                }
            }
            InspectorEvent::ConfirmPending => match &self.pending {
                Some(_) if self.pending_in_flight => {}
                Some(pending) => {
                    self.pending_in_flight = true;
                    effects.push(Effect::ExecutePending(pending.step.clone()));
                }
                None => effects.push(Effect::Notify(Notification::info(
                    "There is no pending step to confirm.",
                ))),
            },
            InspectorEvent::PendingExecuted => {
                self.pending_in_flight = false;
                if let Some(pending) = self.pending.take() {
                    let mut step = pending.step;
                    step.id = (self.staged.len() + 1) as u32;
                    let label = step.step_name.clone().unwrap_or_else(|| step.action.to_string());
                    self.staged.push(step);
                    self.identified = None;
                    effects.push(Effect::Notify(Notification::success(format!(
                        "Recorded: {}",
                        label
                    ))));
                }
            }
            InspectorEvent::PendingFailed { message } => {
                self.pending_in_flight = false;
                if let Some(pending) = self.pending.as_mut() {
                    pending.last_error = Some(message.clone());
                }
                effects.push(Effect::Notify(Notification::error(format!(
                    "Action failed: {}",
                    message
                ))));
            }
            InspectorEvent::CancelPending => {
                if self.pending_in_flight {
                    effects.push(Effect::Notify(Notification::info(
                        "The pending step is still executing.",
                    )));
                } else {
                    self.pending = None;
                    self.identified = None;
                }
            }
            InspectorEvent::CancelSwipe => self.mode.clear_swipe_start(),
            InspectorEvent::RemoveStaged { index } => {
                if index < self.staged.len() {
                    self.staged.remove(index);
                    for (pos, step) in self.staged.iter_mut().enumerate() {
                        step.id = (pos + 1) as u32;
                    }
                } else {
                    effects.push(Effect::Notify(Notification::error(format!(
                        "No staged step at position {}",
                        index + 1
                    ))));
                }
            }
            InspectorEvent::ApplyStaged => {
                if self.staged.is_empty() {
                    effects.push(Effect::Notify(Notification::info("No recorded steps to apply.")));
                } else {
                    let staged = std::mem::take(&mut self.staged);
                    let platform = self.platform();
                    let url = self.web_url().map(str::to_string);
                    let added =
                        self.steps
                            .merge_staged(staged, platform, url.as_deref(), &self.defaults);
                    effects.push(Effect::Notify(Notification::success(format!(
                        "Applied {} steps",
                        added
                    ))));
                }
            }
            InspectorEvent::FrameRefreshed { frame, contexts } => {
                self.session.last_refresh_at = Some(frame.captured_at);
                self.session.last_refresh_error = None;
                if let Some(contexts) = contexts {
                    self.session.available_contexts = contexts;
                }
                self.frame = Some(frame);
                self.identified = None;
            }
            InspectorEvent::RefreshFailed { message, notify } => {
                if notify {
                    effects.push(Effect::Notify(Notification::error(format!(
                        "Refresh failed: {}",
                        message
                    ))));
                }
                self.session.last_refresh_error = Some(message);
            }
            InspectorEvent::ObjectRegistered(object) => {
                let name = object.name.clone();
                self.locators.insert(object);
                effects.push(Effect::Notify(Notification::success(format!(
                    "Saved {} to Object Repository",
                    name
                ))));
            }
            InspectorEvent::LocatorsLoaded(catalog) => self.locators = catalog,
            InspectorEvent::Disconnected => self.reset_session_artifacts(),
        }
        effects
    }

    /// A step-synthesizing click must wait for the operator to deal with the
    /// open pending step or input prompt.
    fn click_blocked(&self) -> Option<&'static str> {
        if self.input_prompt.is_some() {
            return Some("Finish or cancel the text input first.");
        }
        if self.mode.is_recording() && self.pending.is_some() {
            return Some("Confirm or cancel the pending step first.");
        }
        None
    }

    fn on_identified(
        &mut self,
        element: IdentifiedElement,
        point: DevicePoint,
        effects: &mut Vec<Effect>,
    ) {
        if let Some(step_id) = self.inspection_target {
            let platform = self.platform();
            let selector_type = platform.normalize_selector_type(&element.selector_type);
            match self
                .steps
                .update_selector(step_id, selector_type, element.selector_value.clone())
            {
                Ok(()) => effects.push(Effect::Notify(Notification::success(format!(
                    "Step {} locator updated",
                    step_id
                )))),
                Err(err) => effects.push(Effect::Notify(Notification::from(&err))),
            }
            self.inspection_target = None;
            self.show(element, effects);
            return;
        }

        if self.mode == RecordingMode::Inspect {
            let selector_type = self.platform().normalize_selector_type(&element.selector_type);
            if self.locators.contains(&element.selector_value) {
                effects.push(Effect::Notify(Notification::info(OBJECT_ALREADY_KNOWN)));
            } else {
                effects.push(Effect::OfferRegistration(ObjectRegistration {
                    name: ObjectRegistration::suggested_name(&element.name),
                    selector_type,
                    selector_value: element.selector_value.clone(),
                }));
            }
            self.show(element, effects);
            return;
        }

        if let Some(reason) = self.click_blocked() {
            effects.push(Effect::Notify(Notification::info(reason)));
            return;
        }

        let recording = self.mode.is_recording();
        let sub = self.mode.sub_mode().unwrap_or_default();
        let step = match sub {
            RecordSubMode::Click => Some(self.click_step(&element)),
            RecordSubMode::Tap => Some(self.tap_step(point)),
            RecordSubMode::Swipe { pending_start } => match pending_start {
                None => {
                    if let Some(RecordSubMode::Swipe { pending_start }) = self.mode.sub_mode_mut() {
                        *pending_start = Some(point);
                    }
                    effects.push(Effect::Notify(Notification::info(
                        "Swipe start set, click the end point.",
                    )));
                    None
                }
                Some(start) => {
                    self.mode.clear_swipe_start();
                    Some(self.swipe_step(start, point))
                }
            },
            RecordSubMode::Input => {
                let prompt = InputPrompt {
                    intent: if recording {
                        InputIntent::Record
                    } else {
                        InputIntent::Navigate
                    },
                    element_name: element.name.clone(),
                    selector_type: self.platform().normalize_selector_type(&element.selector_type),
                    selector_value: element.selector_value.clone(),
                };
                self.input_prompt = Some(prompt.clone());
                effects.push(Effect::OpenInputPrompt(prompt));
                None
            }
        };

        if let Some(step) = step {
            if recording {
                self.pending = Some(PendingStep::new(step));
            } else {
                effects.push(Effect::ExecuteNow {
                    step,
                    refresh_after: self.timings.navigate_refresh_delay,
                });
            }
        }
        self.show(element, effects);
    }

    fn on_input(&mut self, text: String, effects: &mut Vec<Effect>) {
        let prompt = match self.input_prompt.as_ref() {
            Some(prompt) => prompt.clone(),
            None => return,
        };
        if text.is_empty() {
            effects.push(Effect::Notify(Notification::info("Enter the text to type.")));
            return;
        }
        self.input_prompt = None;
        let step = self.input_step(&prompt, &text);
        match prompt.intent {
            InputIntent::Record => self.pending = Some(PendingStep::new(step)),
            InputIntent::Navigate => effects.push(Effect::ExecuteNow {
                step,
                refresh_after: self.timings.input_refresh_delay,
            }),
        }
    }

    fn show(&mut self, element: IdentifiedElement, effects: &mut Vec<Effect>) {
        if let Some(line) = element.source_line {
            effects.push(Effect::ScrollSourceTo(line));
        }
        self.identified = Some(element);
    }

    fn base_step(&self) -> TestStep {
        let mut step = TestStep::blank((self.staged.len() + 1) as u32);
        step.platform = Some(self.platform());
        self.defaults.apply(&mut step);
        step
    }

    fn click_step(&self, element: &IdentifiedElement) -> TestStep {
        let mut step = self.base_step();
        step.action = StepAction::Click;
        step.selector_type = self.platform().normalize_selector_type(&element.selector_type);
        step.selector_value = element.selector_value.clone();
        step.step_name = Some(format!("Click: {}", element.name));
        step.description = Some(format!("Recorded click on {}", element.name));
        step
    }

    fn tap_step(&self, point: DevicePoint) -> TestStep {
        let mut step = self.base_step();
        step.action = StepAction::Tap;
        step.selector_type = ROOT_SELECTOR_TYPE.to_string();
        step.selector_value = ROOT_SELECTOR_VALUE.to_string();
        step.option = tap_option(point);
        step.step_name = Some(format!("Tap: {}", point));
        step.description = Some(format!("Recorded tap at {}", point));
        step
    }

    fn swipe_step(&self, start: DevicePoint, end: DevicePoint) -> TestStep {
        let gesture = SwipeGesture {
            start,
            end,
            duration_ms: self.timings.swipe_duration_ms,
        };
        let mut step = self.base_step();
        step.action = StepAction::Swipe;
        step.selector_type = ROOT_SELECTOR_TYPE.to_string();
        step.selector_value = ROOT_SELECTOR_VALUE.to_string();
        step.option = gesture.to_option();
        step.step_name = Some("Swipe Action".to_string());
        step.description = Some(format!("Recorded swipe from {} to {}", start, end));
        step
    }

    fn input_step(&self, prompt: &InputPrompt, text: &str) -> TestStep {
        let mut step = self.base_step();
        step.action = StepAction::SendKeys;
        step.selector_type = prompt.selector_type.clone();
        step.selector_value = prompt.selector_value.clone();
        step.option = text.to_string();
        step.step_name = Some(format!("Input: {}", text));
        step.description = Some(format!("Recorded input on {}", prompt.element_name));
        step
    }
}
