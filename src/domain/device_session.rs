use serde::{Deserialize, Serialize};
use std::fmt;

/// Context name the native automation bridge reports for the app itself.
pub const NATIVE_CONTEXT: &str = "NATIVE_APP";

/// OS sent on connect when neither the operator nor discovery names one.
pub const DEFAULT_DEVICE_OS: &str = "Android";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "WEB")]
    Web,
    #[serde(rename = "APP")]
    App,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Web => "WEB",
            Platform::App => "APP",
        }
    }

    /// Web locators are stored lower-case (`xpath`, `css`), native ones upper-case (`ID`, `XPATH`).
    pub fn normalize_selector_type(&self, raw: &str) -> String {
        match self {
            Platform::Web => raw.trim().to_lowercase(),
            Platform::App => raw.trim().to_uppercase(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "WEB" => Ok(Self::Web),
            "APP" => Ok(Self::App),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Width/height pair in whole pixels. Used both for the device-logical
/// resolution and for the decoded size of a screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl WindowSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
        }
    }
}

/// What the operator asked to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionTarget {
    /// A native device. `device_id = None` picks the first discovered device.
    /// `os` falls back to the discovered record, then [`DEFAULT_DEVICE_OS`].
    Device {
        device_id: Option<String>,
        project_id: String,
        #[serde(default)]
        os: Option<String>,
    },
    Url { url: String },
}

impl SessionTarget {
    pub fn platform(&self) -> Platform {
        match self {
            SessionTarget::Device { .. } => Platform::App,
            SessionTarget::Url { .. } => Platform::Web,
        }
    }
}

/// Which space highlight bounds are expressed in, fixed when the session connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlayReference {
    HardwareResolution,
    NaturalImage,
}

impl OverlayReference {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::App => OverlayReference::HardwareResolution,
            Platform::Web => OverlayReference::NaturalImage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSession {
    pub platform: Platform,
    pub connection_state: ConnectionState,
    pub target_ref: Option<String>,
    pub hardware_resolution: WindowSize,
    pub overlay_reference: OverlayReference,
    pub current_context: String,
    pub available_contexts: Vec<String>,
    pub last_refresh_at: Option<i64>,
    pub last_refresh_error: Option<String>,
}

impl DeviceSession {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            connection_state: ConnectionState::Disconnected,
            target_ref: None,
            hardware_resolution: WindowSize::default(),
            overlay_reference: OverlayReference::for_platform(platform),
            current_context: NATIVE_CONTEXT.to_string(),
            available_contexts: Vec::new(),
            last_refresh_at: None,
            last_refresh_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    /// The size highlight bounds must be divided by. An element that reports
    /// its own window size wins, since that is the space its bounds came from.
    pub fn overlay_reference_size(
        &self,
        frame: Option<&CaptureFrame>,
        element: Option<&IdentifiedElement>,
    ) -> WindowSize {
        if let Some(size) = element.and_then(|el| el.window_size) {
            if !size.is_empty() {
                return size;
            }
        }
        match self.overlay_reference {
            OverlayReference::HardwareResolution => self.hardware_resolution,
            OverlayReference::NaturalImage => frame
                .and_then(|f| f.natural_size)
                .filter(|size| !size.is_empty())
                .unwrap_or(self.hardware_resolution),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureFrame {
    /// Base64 screenshot exactly as the bridge delivered it.
    pub image: String,
    pub source_tree: String,
    pub natural_size: Option<WindowSize>,
    pub captured_at: i64,
}

impl CaptureFrame {
    /// 1-based line lookup into the hierarchy dump.
    pub fn source_line(&self, line_no: usize) -> Option<&str> {
        if line_no == 0 {
            return None;
        }
        self.source_tree.lines().nth(line_no - 1)
    }

    pub fn line_count(&self) -> usize {
        self.source_tree.lines().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementBounds {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl ElementBounds {
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedElement {
    pub name: String,
    pub selector_type: String,
    pub selector_value: String,
    pub bounds: ElementBounds,
    pub source_line: Option<usize>,
    pub window_size: Option<WindowSize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default)]
    pub alias: Option<String>,
    /// Operating system name the automation backend expects ("Android", "iOS").
    #[serde(default)]
    pub os: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element_with(window_size: Option<WindowSize>) -> IdentifiedElement {
        IdentifiedElement {
            name: "Login".to_string(),
            selector_type: "ID".to_string(),
            selector_value: "btn_login".to_string(),
            bounds: ElementBounds {
                x1: 0.0,
                y1: 0.0,
                x2: 10.0,
                y2: 10.0,
            },
            source_line: None,
            window_size,
        }
    }

    #[test]
    fn test_selector_type_casing_per_platform() {
        assert_eq!(Platform::Web.normalize_selector_type("XPATH"), "xpath");
        assert_eq!(Platform::App.normalize_selector_type("id"), "ID");
    }

    #[test]
    fn test_overlay_reference_for_app_uses_hardware() {
        let mut session = DeviceSession::new(Platform::App);
        session.hardware_resolution = WindowSize::new(720, 1280);
        let frame = CaptureFrame {
            image: String::new(),
            source_tree: String::new(),
            natural_size: Some(WindowSize::new(360, 640)),
            captured_at: 0,
        };
        assert_eq!(
            session.overlay_reference_size(Some(&frame), None),
            WindowSize::new(720, 1280)
        );
    }

    #[test]
    fn test_overlay_reference_for_web_uses_natural_size() {
        let session = DeviceSession::new(Platform::Web);
        let frame = CaptureFrame {
            image: String::new(),
            source_tree: String::new(),
            natural_size: Some(WindowSize::new(1280, 800)),
            captured_at: 0,
        };
        assert_eq!(
            session.overlay_reference_size(Some(&frame), None),
            WindowSize::new(1280, 800)
        );
        assert_eq!(
            session.overlay_reference_size(None, None),
            WindowSize::default()
        );
    }

    #[test]
    fn test_element_window_size_overrides_policy() {
        let session = DeviceSession::new(Platform::App);
        let element = element_with(Some(WindowSize::new(1440, 3040)));
        assert_eq!(
            session.overlay_reference_size(None, Some(&element)),
            WindowSize::new(1440, 3040)
        );
    }

    #[test]
    fn test_source_line_is_one_based() {
        let frame = CaptureFrame {
            image: String::new(),
            source_tree: "<hierarchy>\n  <node/>\n</hierarchy>".to_string(),
            natural_size: None,
            captured_at: 0,
        };
        assert_eq!(frame.source_line(2), Some("  <node/>"));
        assert_eq!(frame.source_line(0), None);
        assert_eq!(frame.source_line(4), None);
        assert_eq!(frame.line_count(), 3);
    }
}
