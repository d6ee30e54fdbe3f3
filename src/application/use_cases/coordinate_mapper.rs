//! Coordinate conversion between the rendered screenshot and the remote target.
//!
//! Three spaces are involved:
//! - display space: CSS/pixel position of the screenshot as the operator sees it,
//! - image space: intrinsic pixels of the decoded screenshot,
//! - device space: logical pixels the automation bridge acts in.
//!
//! All functions return `None` on degenerate input instead of panicking.

use crate::domain::device_session::{ElementBounds, WindowSize};
use crate::domain::test_step::DevicePoint;
use serde::{Deserialize, Serialize};

/// Rendered position of the screenshot on the operator's screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl DisplayRect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    fn is_usable(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }
}

/// Display-relative click, as sent to the bridge identify call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayOffset {
    pub x: f64,
    pub y: f64,
    pub display_width: f64,
    pub display_height: f64,
}

/// Highlight box in percent of the rendered screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayRect {
    pub left_pct: f64,
    pub top_pct: f64,
    pub width_pct: f64,
    pub height_pct: f64,
}

pub fn to_device_space(
    click_x: f64,
    click_y: f64,
    display: DisplayRect,
    hardware: WindowSize,
) -> Option<DevicePoint> {
    if !display.is_usable() || hardware.is_empty() || !click_x.is_finite() || !click_y.is_finite()
    {
        return None;
    }
    let x = ((click_x - display.left) / display.width * hardware.width as f64).round();
    let y = ((click_y - display.top) / display.height * hardware.height as f64).round();
    Some(DevicePoint::new(x as i64, y as i64))
}

pub fn display_offset(click_x: f64, click_y: f64, display: DisplayRect) -> Option<DisplayOffset> {
    if !display.is_usable() || !click_x.is_finite() || !click_y.is_finite() {
        return None;
    }
    Some(DisplayOffset {
        x: click_x - display.left,
        y: click_y - display.top,
        display_width: display.width,
        display_height: display.height,
    })
}

/// Projects element bounds (in `reference` space) into percentages. Inverted
/// or non-finite bounds and an empty reference give no highlight.
pub fn to_overlay_rect(bounds: &ElementBounds, reference: WindowSize) -> Option<OverlayRect> {
    if reference.is_empty() {
        return None;
    }
    let coords = [bounds.x1, bounds.y1, bounds.x2, bounds.y2];
    if coords.iter().any(|v| !v.is_finite()) {
        return None;
    }
    if bounds.x2 < bounds.x1 || bounds.y2 < bounds.y1 {
        return None;
    }
    let w = reference.width as f64;
    let h = reference.height as f64;
    Some(OverlayRect {
        left_pct: bounds.x1 / w * 100.0,
        top_pct: bounds.y1 / h * 100.0,
        width_pct: bounds.width() / w * 100.0,
        height_pct: bounds.height() / h * 100.0,
    })
}
