use crate::application::use_cases::action_catalog::ActionCatalog;
use crate::application::use_cases::step_sequence::{JumpIssue, StepSequence};
use crate::domain::device_session::Platform;
use crate::domain::error::{AppError, Result};
use crate::domain::test_step::TestStep;
use crate::infrastructure::spreadsheet::{self, Grid};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

const HEADER_MARKERS: [&str; 3] = ["Step Name", "Step ID", "Action"];

const ID_KEYS: &[&str] = &["No.", "no", "id"];
const STEP_NAME_KEYS: &[&str] = &["Step Name", "StepName", "step_name"];
const DESCRIPTION_KEYS: &[&str] = &["Step Description", "StepDescription", "step_description", "Description"];
const ACTION_KEYS: &[&str] = &["action", "Action"];
const SELECTOR_TYPE_KEYS: &[&str] = &["Locator_by", "LocatorBy", "locator_by", "locator type"];
const SELECTOR_VALUE_KEYS: &[&str] = &["Locator_value", "LocatorValue", "locator_value", "locator"];
const OPTION_KEYS: &[&str] = &["input_text", "Input", "option"];
const MANDATORY_KEYS: &[&str] = &["mandatory", "Mandatory"];
const SKIP_KEYS: &[&str] = &["skip_on_error", "SkipOnError", "skip_error"];
const SCREENSHOT_KEYS: &[&str] = &["screenshot", "Screenshot"];
const SLEEP_KEYS: &[&str] = &["sleep", "Sleep"];
const VISIBLE_IF_TYPE_KEYS: &[&str] = &["visible_if_type", "VisibleIfType"];
const VISIBLE_IF_KEYS: &[&str] = &["visible_if", "VisibleIf"];
const TRUE_JUMP_KEYS: &[&str] = &["true_jump_no", "trueJumpNo", "T-Jump", "true_jump"];
const FALSE_JUMP_KEYS: &[&str] = &["false_jump_no", "falseJumpNo", "F-Jump", "false_jump"];

pub const EXPORT_HEADER: [&str; 15] = [
    "No.",
    "Step Name",
    "Step Description",
    "Action",
    "Locator_by",
    "Locator_value",
    "input_text",
    "mandatory",
    "skip_on_error",
    "screenshot",
    "sleep",
    "visible_if_type",
    "visible_if",
    "true_jump_no",
    "false_jump_no",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub sequence: StepSequence,
    pub header_row: usize,
    pub jump_issues: Vec<JumpIssue>,
}

/// One data row addressed by header name.
struct SheetRow<'a> {
    headers: &'a [String],
    cells: &'a [String],
}

impl<'a> SheetRow<'a> {
    fn cell(&self, index: usize) -> Option<&'a str> {
        self.cells
            .get(index)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Exact header, then case-insensitive, then ignoring `_` and whitespace.
    fn value(&self, keys: &[&str]) -> Option<&'a str> {
        for key in keys {
            if let Some(i) = self.headers.iter().position(|h| h.as_str() == *key) {
                if let Some(v) = self.cell(i) {
                    return Some(v);
                }
            }
        }
        for key in keys {
            let wanted = key.trim().to_lowercase();
            if let Some(i) = self
                .headers
                .iter()
                .position(|h| h.trim().to_lowercase() == wanted)
            {
                if let Some(v) = self.cell(i) {
                    return Some(v);
                }
            }
        }
        for key in keys {
            let wanted = squash(key);
            if let Some(i) = self.headers.iter().position(|h| squash(h) == wanted) {
                if let Some(v) = self.cell(i) {
                    return Some(v);
                }
            }
        }
        None
    }

    fn text(&self, keys: &[&str]) -> Option<String> {
        self.value(keys).map(str::to_string)
    }

    fn flag(&self, keys: &[&str]) -> bool {
        self.value(keys) == Some("Y")
    }

    fn number(&self, keys: &[&str]) -> Option<f64> {
        self.value(keys)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    fn step_number(&self, keys: &[&str]) -> Option<u32> {
        self.number(keys)
            .filter(|v| *v >= 1.0 && v.fract() == 0.0 && *v <= u32::MAX as f64)
            .map(|v| v as u32)
    }
}

fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '_' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// First row with a cell containing a header marker, e.g. "Step Name (optional)".
fn find_header_row(grid: &Grid) -> Result<usize> {
    grid.iter()
        .position(|row| {
            row.iter().any(|cell| {
                let cell = cell.to_lowercase();
                HEADER_MARKERS
                    .iter()
                    .any(|marker| cell.contains(&marker.to_lowercase()))
            })
        })
        .ok_or_else(|| {
            AppError::ValidationError(
                "Could not find a valid header row containing 'Step Name' or 'Step ID'".to_string(),
            )
        })
}

/// Turns a raw grid into a step sequence. `No.` values may be sparse; steps
/// are renumbered by row order and jumps follow the renumbering.
pub fn import_grid(grid: &Grid, catalog: &ActionCatalog, platform: Option<Platform>) -> Result<ImportReport> {
    let grid: Grid = grid.iter().filter(|row| !is_blank_row(row)).cloned().collect();
    if grid.is_empty() {
        return Err(AppError::ValidationError("The sheet is empty".to_string()));
    }
    let header_row = find_header_row(&grid)?;
    let headers: Vec<String> = grid[header_row].iter().map(|h| h.trim().to_string()).collect();

    let mut steps = Vec::new();
    for (offset, cells) in grid.iter().skip(header_row + 1).enumerate() {
        let row = SheetRow {
            headers: &headers,
            cells,
        };
        let action = row.value(ACTION_KEYS).unwrap_or("find");
        let mut step = TestStep::blank(row.step_number(ID_KEYS).unwrap_or((offset + 1) as u32));
        step.action = catalog.resolve(action);
        step.step_name = row.text(STEP_NAME_KEYS);
        step.description = row.text(DESCRIPTION_KEYS);
        step.selector_type = row.text(SELECTOR_TYPE_KEYS).unwrap_or_default();
        step.selector_value = row.text(SELECTOR_VALUE_KEYS).unwrap_or_default();
        step.option = row.text(OPTION_KEYS).unwrap_or_default();
        step.mandatory = row.flag(MANDATORY_KEYS);
        step.skip_on_error = row.flag(SKIP_KEYS);
        step.screenshot = row.flag(SCREENSHOT_KEYS);
        step.sleep_seconds = row.number(SLEEP_KEYS).unwrap_or(0.0);
        step.visible_if_type = row.text(VISIBLE_IF_TYPE_KEYS);
        step.visible_if = row.text(VISIBLE_IF_KEYS);
        step.true_jump_no = row.step_number(TRUE_JUMP_KEYS);
        step.false_jump_no = row.step_number(FALSE_JUMP_KEYS);
        step.platform = platform;
        steps.push(step);
    }

    let sequence = StepSequence::from_steps(steps);
    let jump_issues = sequence.validate_jumps();
    if !jump_issues.is_empty() {
        warn!(count = jump_issues.len(), "Imported sheet has jumps outside the step range");
    }
    info!(steps = sequence.len(), header_row, "Imported steps");
    Ok(ImportReport {
        sequence,
        header_row,
        jump_issues,
    })
}

pub fn import_file(path: &Path, catalog: &ActionCatalog, platform: Option<Platform>) -> Result<ImportReport> {
    let grid = spreadsheet::read_grid(path)?;
    import_grid(&grid, catalog, platform)
}

fn yes_no(value: bool) -> String {
    let flag = if value { "Y" } else { "N" };
    flag.to_string()
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

pub fn export_rows(sequence: &StepSequence) -> Vec<Vec<String>> {
    sequence
        .steps()
        .iter()
        .map(|step| {
            vec![
                step.id.to_string(),
                step.step_name.clone().unwrap_or_default(),
                step.description.clone().unwrap_or_default(),
                step.action.to_string(),
                step.selector_type.clone(),
                step.selector_value.clone(),
                step.option.clone(),
                yes_no(step.mandatory),
                yes_no(step.skip_on_error),
                yes_no(step.screenshot),
                format_number(step.sleep_seconds),
                step.visible_if_type.clone().unwrap_or_default(),
                step.visible_if.clone().unwrap_or_default(),
                step.true_jump_no.map(|n| n.to_string()).unwrap_or_default(),
                step.false_jump_no.map(|n| n.to_string()).unwrap_or_default(),
            ]
        })
        .collect()
}

pub fn export_csv(sequence: &StepSequence, path: &Path) -> Result<()> {
    spreadsheet::write_csv(path, &EXPORT_HEADER, &export_rows(sequence))?;
    info!(path = %path.display(), steps = sequence.len(), "Exported steps");
    Ok(())
}
