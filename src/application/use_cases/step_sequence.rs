use crate::domain::device_session::Platform;
use crate::domain::error::{AppError, Result};
use crate::domain::test_step::{ScriptStepRecord, StepAction, StepDefaults, TestStep};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JumpField {
    True,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JumpIssueReason {
    /// Target step was deleted; the jump has been cleared.
    TargetDeleted,
    /// Target is outside 1..N.
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JumpIssue {
    pub step_id: u32,
    pub field: JumpField,
    pub target: u32,
    pub reason: JumpIssueReason,
}

/// Editable, ordered list of steps with contiguous 1-based ids.
///
/// Structural edits keep jump targets pointing at the same logical step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSequence {
    steps: Vec<TestStep>,
}

impl StepSequence {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Builds a sequence from steps whose ids may be sparse or out of order
    /// (e.g. an imported sheet). Ids are renumbered by position and jumps
    /// follow the step they referenced; unknown targets are left for
    /// `validate_jumps` to report.
    pub fn from_steps(steps: Vec<TestStep>) -> Self {
        let mapping: HashMap<u32, u32> = steps
            .iter()
            .enumerate()
            .map(|(index, step)| (step.id, (index + 1) as u32))
            .collect();
        let mut sequence = Self { steps };
        for step in sequence.steps.iter_mut() {
            step.true_jump_no = step.true_jump_no.map(|t| *mapping.get(&t).unwrap_or(&t));
            step.false_jump_no = step.false_jump_no.map(|t| *mapping.get(&t).unwrap_or(&t));
        }
        sequence.reindex();
        sequence
    }

    pub fn steps(&self) -> &[TestStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&TestStep> {
        self.position(id).map(|index| &self.steps[index])
    }

    /// True unless the sequence is empty or a single untouched placeholder row.
    pub fn has_real_steps(&self) -> bool {
        match self.steps.as_slice() {
            [] => false,
            [only] => !only.is_placeholder(),
            _ => true,
        }
    }

    pub fn add_blank(&mut self) -> u32 {
        let id = (self.steps.len() + 1) as u32;
        self.steps.push(TestStep::blank(id));
        id
    }

    /// Inserts before the 1-based `at` position (`len + 1` appends).
    pub fn insert(&mut self, at: u32, step: TestStep) -> Result<u32> {
        let len = self.steps.len() as u32;
        if at == 0 || at > len + 1 {
            return Err(AppError::ValidationError(format!(
                "Insert position {} is outside 1..={}",
                at,
                len + 1
            )));
        }
        self.remap_jumps(|target| Some(if target >= at { target + 1 } else { target }));
        self.steps.insert((at - 1) as usize, step);
        self.reindex();
        Ok(at)
    }

    /// Removes a step. Jumps that pointed at it are cleared and returned.
    pub fn remove(&mut self, id: u32) -> Result<Vec<JumpIssue>> {
        let index = self.require(id)?;
        self.steps.remove(index);

        let mut issues = Vec::new();
        for (pos, step) in self.steps.iter_mut().enumerate() {
            let owner = (if pos < index { pos + 1 } else { pos + 2 }) as u32;
            for field in [JumpField::True, JumpField::False] {
                let slot = jump_slot(step, field);
                match *slot {
                    Some(target) if target == id => {
                        issues.push(JumpIssue {
                            step_id: owner,
                            field,
                            target,
                            reason: JumpIssueReason::TargetDeleted,
                        });
                        *slot = None;
                    }
                    Some(target) if target > id => *slot = Some(target - 1),
                    _ => {}
                }
            }
        }
        self.reindex();
        // Report against the surviving steps' new ids.
        for issue in issues.iter_mut() {
            if issue.step_id > id {
                issue.step_id -= 1;
            }
        }
        if !issues.is_empty() {
            debug!(removed = id, cleared = issues.len(), "Cleared jumps to removed step");
        }
        Ok(issues)
    }

    pub fn move_up(&mut self, id: u32) -> Result<()> {
        let index = self.require(id)?;
        if index == 0 {
            return Ok(());
        }
        self.swap_positions(index - 1, index);
        Ok(())
    }

    pub fn move_down(&mut self, id: u32) -> Result<()> {
        let index = self.require(id)?;
        if index + 1 >= self.steps.len() {
            return Ok(());
        }
        self.swap_positions(index, index + 1);
        Ok(())
    }

    /// Replaces the contents of step `id`; the id itself is kept.
    pub fn update(&mut self, id: u32, mut step: TestStep) -> Result<()> {
        let index = self.require(id)?;
        step.id = id;
        self.steps[index] = step;
        Ok(())
    }

    pub fn update_selector(&mut self, id: u32, selector_type: String, selector_value: String) -> Result<()> {
        let index = self.require(id)?;
        self.steps[index].selector_type = selector_type;
        self.steps[index].selector_value = selector_value;
        Ok(())
    }

    /// Appends staged steps. A sequence without real steps is replaced; on WEB
    /// an `Open <url>` navigate step is put in front when a URL is known.
    pub fn merge_staged(
        &mut self,
        staged: Vec<TestStep>,
        platform: Platform,
        web_url: Option<&str>,
        defaults: &StepDefaults,
    ) -> usize {
        if staged.is_empty() {
            return 0;
        }
        if !self.has_real_steps() {
            self.steps.clear();
            if platform == Platform::Web {
                if let Some(url) = web_url.map(str::trim).filter(|u| !u.is_empty()) {
                    self.steps.push(navigate_step(url, defaults));
                }
            }
        }
        let added = staged.len();
        self.steps.extend(staged);
        self.reindex();
        added
    }

    /// Every jump whose target is not a valid id.
    pub fn validate_jumps(&self) -> Vec<JumpIssue> {
        let len = self.steps.len() as u32;
        let mut issues = Vec::new();
        for step in &self.steps {
            for (field, target) in [
                (JumpField::True, step.true_jump_no),
                (JumpField::False, step.false_jump_no),
            ] {
                if let Some(target) = target {
                    if target == 0 || target > len {
                        issues.push(JumpIssue {
                            step_id: step.id,
                            field,
                            target,
                            reason: JumpIssueReason::OutOfRange,
                        });
                    }
                }
            }
        }
        issues
    }

    /// Steps that would actually run: blank actions are skipped.
    pub fn runnable_steps(&self) -> Vec<TestStep> {
        self.steps
            .iter()
            .filter(|step| !step.action.is_blank())
            .cloned()
            .collect()
    }

    pub fn to_records(&self) -> Vec<ScriptStepRecord> {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, step)| ScriptStepRecord::from_step(index, step))
            .collect()
    }

    fn position(&self, id: u32) -> Option<usize> {
        self.steps.iter().position(|step| step.id == id)
    }

    fn require(&self, id: u32) -> Result<usize> {
        self.position(id)
            .ok_or_else(|| AppError::NotFound(format!("Step {} not found", id)))
    }

    fn swap_positions(&mut self, a: usize, b: usize) {
        let id_a = (a + 1) as u32;
        let id_b = (b + 1) as u32;
        self.remap_jumps(|target| {
            Some(if target == id_a {
                id_b
            } else if target == id_b {
                id_a
            } else {
                target
            })
        });
        self.steps.swap(a, b);
        self.reindex();
    }

    fn remap_jumps<F>(&mut self, f: F)
    where
        F: Fn(u32) -> Option<u32>,
    {
        for step in self.steps.iter_mut() {
            step.true_jump_no = step.true_jump_no.and_then(&f);
            step.false_jump_no = step.false_jump_no.and_then(&f);
        }
    }

    fn reindex(&mut self) {
        for (index, step) in self.steps.iter_mut().enumerate() {
            step.id = (index + 1) as u32;
        }
    }
}

fn jump_slot(step: &mut TestStep, field: JumpField) -> &mut Option<u32> {
    match field {
        JumpField::True => &mut step.true_jump_no,
        JumpField::False => &mut step.false_jump_no,
    }
}

fn navigate_step(url: &str, defaults: &StepDefaults) -> TestStep {
    let mut step = TestStep::blank(1);
    step.action = StepAction::Navigate;
    step.selector_type = "URL".to_string();
    step.selector_value = url.to_string();
    step.option = url.to_string();
    step.step_name = Some(format!("Open {}", url));
    step.platform = Some(Platform::Web);
    defaults.apply(&mut step);
    step
}
