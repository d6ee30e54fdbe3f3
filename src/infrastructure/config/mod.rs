use crate::domain::error::{AppError, Result};
use crate::domain::test_step::StepDefaults;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const ENV_PREFIX: &str = "QA_INSPECTOR_";
pub const DEFAULT_CONFIG_FILE: &str = "qa-inspector.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorConfig {
    pub api_base_url: String,
    /// Derived from `api_base_url` when unset (`http` -> `ws`, `https` -> `wss`).
    pub ws_base_url: Option<String>,
    pub auth_token: Option<String>,
    pub project_id: Option<String>,
    pub request_timeout_ms: u64,
    pub refresh_interval_ms: u64,
    pub navigate_refresh_delay_ms: u64,
    pub input_refresh_delay_ms: u64,
    pub swipe_duration_ms: u64,
    pub default_sleep_seconds: f64,
    pub log_capacity: usize,
    pub log_filter: String,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8001/api/v1".to_string(),
            ws_base_url: None,
            auth_token: None,
            project_id: None,
            request_timeout_ms: 30_000,
            refresh_interval_ms: 5_000,
            navigate_refresh_delay_ms: 1_000,
            input_refresh_delay_ms: 1_500,
            swipe_duration_ms: 800,
            default_sleep_seconds: 1.0,
            log_capacity: 500,
            log_filter: "info".to_string(),
        }
    }
}

impl InspectorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn navigate_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.navigate_refresh_delay_ms)
    }

    pub fn input_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.input_refresh_delay_ms)
    }

    pub fn step_defaults(&self) -> StepDefaults {
        StepDefaults {
            sleep_seconds: self.default_sleep_seconds,
            ..StepDefaults::default()
        }
    }

    /// Socket base, e.g. `ws://localhost:8001/api/v1`.
    pub fn resolved_ws_base(&self) -> Result<String> {
        if let Some(ws) = self.ws_base_url.as_deref().filter(|v| !v.trim().is_empty()) {
            return Ok(ws.trim_end_matches('/').to_string());
        }
        let mut url = Url::parse(&self.api_base_url)
            .map_err(|e| AppError::ValidationError(format!("Invalid api_base_url: {}", e)))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| AppError::ValidationError("Cannot derive websocket url".to_string()))?;
        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    pub fn validate(&self) -> Result<()> {
        let api = Url::parse(&self.api_base_url)
            .map_err(|e| AppError::ValidationError(format!("Invalid api_base_url: {}", e)))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(AppError::ValidationError(format!(
                "api_base_url must be http(s), got {}",
                api.scheme()
            )));
        }
        if let Some(ws) = self.ws_base_url.as_deref().filter(|v| !v.trim().is_empty()) {
            let parsed = Url::parse(ws)
                .map_err(|e| AppError::ValidationError(format!("Invalid ws_base_url: {}", e)))?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(AppError::ValidationError(format!(
                    "ws_base_url must be ws(s), got {}",
                    parsed.scheme()
                )));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(AppError::ValidationError(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.refresh_interval_ms == 0 {
            return Err(AppError::ValidationError(
                "refresh_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(AppError::ValidationError(
                "log_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct ConfigService {
    path: Option<PathBuf>,
}

impl ConfigService {
    pub fn new() -> Self {
        Self {
            path: Some(PathBuf::from(DEFAULT_CONFIG_FILE)),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Defaults only, plus environment.
    pub fn without_file() -> Self {
        Self { path: None }
    }

    /// `.env` -> defaults -> TOML file -> `QA_INSPECTOR_*` env.
    pub fn load(&self) -> Result<InspectorConfig> {
        if let Err(err) = dotenvy::dotenv() {
            debug!(error = %err, "No .env file loaded");
        }
        let figment = self.file_layer(Figment::from(Serialized::defaults(
            InspectorConfig::default(),
        )));
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Same layering without the process environment.
    pub fn load_file_only(&self) -> Result<InspectorConfig> {
        let figment = self.file_layer(Figment::from(Serialized::defaults(
            InspectorConfig::default(),
        )));
        Self::extract(figment)
    }

    fn file_layer(&self, figment: Figment) -> Figment {
        match self.path.as_deref() {
            Some(path) if path.exists() => figment.merge(Toml::file(path)),
            Some(path) => {
                if path != Path::new(DEFAULT_CONFIG_FILE) {
                    warn!(path = %path.display(), "Config file not found, using defaults");
                }
                figment
            }
            None => figment,
        }
    }

    fn extract(figment: Figment) -> Result<InspectorConfig> {
        let config: InspectorConfig = figment
            .extract()
            .map_err(|e| AppError::ParseError(format!("Failed to load config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ConfigService::without_file().load_file_only().unwrap();
        assert_eq!(config, InspectorConfig::default());
        assert_eq!(config.refresh_interval(), Duration::from_millis(5_000));
        assert_eq!(config.resolved_ws_base().unwrap(), "ws://localhost:8001/api/v1");
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "api_base_url = \"https://qa.example.com/api/v1\"\nrefresh_interval_ms = 2500\nproject_id = \"p-7\""
        )
        .unwrap();
        let config = ConfigService::with_path(file.path()).load_file_only().unwrap();
        assert_eq!(config.refresh_interval_ms, 2_500);
        assert_eq!(config.project_id.as_deref(), Some("p-7"));
        assert_eq!(config.swipe_duration_ms, 800);
        assert_eq!(
            config.resolved_ws_base().unwrap(),
            "wss://qa.example.com/api/v1"
        );
    }

    #[test]
    fn test_invalid_urls_are_rejected() {
        let mut config = InspectorConfig::default();
        config.api_base_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(AppError::ValidationError(_))));

        let mut config = InspectorConfig::default();
        config.ws_base_url = Some("http://localhost:8001".to_string());
        assert!(config.validate().is_err());
    }
}
