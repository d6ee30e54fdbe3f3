use super::{
    CatalogAction, CatalogObject, ConnectOutcome, IdentifyQuery, InspectorBridge,
    ProjectCatalogApi,
};
use crate::domain::device_session::{
    DeviceInfo, ElementBounds, IdentifiedElement, Platform, WindowSize,
};
use crate::domain::error::{AppError, Result};
use crate::domain::test_step::TestStep;
use crate::infrastructure::config::InspectorConfig;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// Envelope most bridge endpoints reply with.
#[derive(Debug, Deserialize)]
struct BridgeReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl BridgeReply {
    fn failure(&self, fallback: &str) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ConnectReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    window_size: Option<WindowSize>,
}

#[derive(Debug, Deserialize)]
struct DataReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContextsReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    contexts: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DevicesReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    devices: Vec<DeviceInfo>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdentifyReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    selector_type: Option<String>,
    #[serde(default)]
    selector_value: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    bounds: Option<ElementBounds>,
    #[serde(default)]
    line_number: Option<usize>,
    #[serde(default)]
    window_size: Option<WindowSize>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunReply {
    run_id: String,
}

#[derive(Debug, Serialize)]
struct RegisterObjectBody<'a> {
    name: &'a str,
    description: Option<&'a str>,
    selector_type: &'a str,
    value: &'a str,
    platform: &'a str,
    project_id: &'a str,
}

pub struct HttpInspectorClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpInspectorClient {
    pub fn new(config: &InspectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone().filter(|t| !t.trim().is_empty()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.endpoint(path);
        debug!(url = %url, "GET");
        let request = self.authorize(self.client.get(&url).query(query));
        Self::read_json(request.send().await, &url).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.endpoint(path);
        debug!(url = %url, "POST");
        let request = self.authorize(self.client.post(&url).json(body));
        Self::read_json(request.send().await, &url).await
    }

    async fn read_json<T: DeserializeOwned>(
        sent: std::result::Result<reqwest::Response, reqwest::Error>,
        url: &str,
    ) -> Result<T> {
        let response = sent.map_err(|e| {
            warn!(url = %url, error = %e, "Bridge request failed");
            AppError::ConnectionError(format!("Request to {} failed: {}", url, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ConnectionError(format!(
                "Bridge error ({}): {}",
                status, text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ParseError(format!("Failed to parse JSON from {}: {}", url, e)))
    }

    async fn fetch_data(&self, path: &str, platform: Platform) -> Result<String> {
        let reply: DataReply = self.get_json(path, &[("platform", platform.as_str())]).await?;
        match reply.data {
            Some(data) if reply.success => Ok(data),
            _ => Err(AppError::ConnectionError(
                reply
                    .error
                    .unwrap_or_else(|| format!("{} returned no data", path)),
            )),
        }
    }

    fn connect_outcome(reply: ConnectReply) -> Result<ConnectOutcome> {
        if !reply.success {
            return Err(AppError::ConnectionError(
                reply.error.unwrap_or_else(|| "Connection refused".to_string()),
            ));
        }
        Ok(ConnectOutcome {
            window_size: reply.window_size.filter(|size| !size.is_empty()),
        })
    }
}

#[async_trait]
impl InspectorBridge for HttpInspectorClient {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let reply: DevicesReply = self.get_json("inspector/devices", &[]).await?;
        if !reply.success {
            return Err(AppError::ConnectionError(
                reply.error.unwrap_or_else(|| "Failed to list devices".to_string()),
            ));
        }
        Ok(reply.devices)
    }

    async fn connect_device(&self, device_id: &str, project_id: &str, os: &str) -> Result<ConnectOutcome> {
        let body = json!({
            "device_id": device_id,
            "project_id": project_id,
            "platform": os,
        });
        let reply: ConnectReply = self.post_json("inspector/connect", &body).await?;
        Self::connect_outcome(reply)
    }

    async fn connect_web(&self, url: &str) -> Result<ConnectOutcome> {
        let reply: ConnectReply = self
            .post_json("inspector/connect-web", &json!({ "url": url }))
            .await?;
        Self::connect_outcome(reply)
    }

    async fn disconnect(&self) -> Result<()> {
        let _: serde_json::Value = self.post_json("inspector/disconnect", &json!({})).await?;
        Ok(())
    }

    async fn screenshot(&self, platform: Platform) -> Result<String> {
        self.fetch_data("inspector/screenshot", platform).await
    }

    async fn source(&self, platform: Platform) -> Result<String> {
        self.fetch_data("inspector/source", platform).await
    }

    async fn contexts(&self) -> Result<Vec<String>> {
        let reply: ContextsReply = self.get_json("inspector/contexts", &[]).await?;
        if !reply.success {
            return Err(AppError::ConnectionError(
                reply.error.unwrap_or_else(|| "Failed to list contexts".to_string()),
            ));
        }
        Ok(reply.contexts)
    }

    async fn switch_context(&self, name: &str) -> Result<()> {
        let reply: BridgeReply = self
            .post_json("inspector/switch-context", &json!({ "context_name": name }))
            .await?;
        if !reply.success {
            return Err(AppError::ConnectionError(
                reply.failure("Context switch rejected"),
            ));
        }
        Ok(())
    }

    async fn identify(&self, query: IdentifyQuery) -> Result<IdentifiedElement> {
        let reply: IdentifyReply = self.post_json("inspector/identify", &query).await?;
        if !reply.success {
            return Err(AppError::IdentifyError(
                reply.error.unwrap_or_else(|| "No element at point".to_string()),
            ));
        }
        let (selector_type, selector_value, bounds) =
            match (reply.selector_type, reply.selector_value, reply.bounds) {
                (Some(t), Some(v), Some(b)) if !v.is_empty() => (t, v, b),
                _ => {
                    return Err(AppError::IdentifyError(
                        "Identify reply is missing locator or bounds".to_string(),
                    ))
                }
            };
        Ok(IdentifiedElement {
            name: reply.name.unwrap_or_else(|| "element".to_string()),
            selector_type,
            selector_value,
            bounds,
            source_line: reply.line_number.filter(|line| *line > 0),
            window_size: reply.window_size.filter(|size| !size.is_empty()),
        })
    }

    async fn perform_action(&self, step: &TestStep) -> Result<()> {
        let reply: BridgeReply = self.post_json("inspector/action", step).await?;
        if !reply.success {
            return Err(AppError::ActionExecutionError(
                reply.failure("Action failed"),
            ));
        }
        Ok(())
    }

    async fn start_run(&self, steps: &[TestStep], project_id: &str, platform: Platform) -> Result<String> {
        let body = json!({
            "steps": steps,
            "project_id": project_id,
            "platform": platform.as_str(),
        });
        let reply: RunReply = self.post_json("run/active-steps", &body).await?;
        Ok(reply.run_id)
    }
}

#[async_trait]
impl ProjectCatalogApi for HttpInspectorClient {
    async fn list_actions(&self, project_id: &str) -> Result<Vec<CatalogAction>> {
        self.get_json("assets/actions", &[("project_id", project_id)])
            .await
    }

    async fn list_objects(&self, project_id: &str) -> Result<Vec<CatalogObject>> {
        self.get_json("assets/objects", &[("project_id", project_id)])
            .await
    }

    async fn register_object(&self, project_id: &str, object: &CatalogObject) -> Result<CatalogObject> {
        let body = RegisterObjectBody {
            name: &object.name,
            description: object.description.as_deref(),
            selector_type: &object.selector_type,
            value: &object.value,
            platform: object.platform.as_deref().unwrap_or("WEB"),
            project_id,
        };
        self.post_json("assets/objects", &body).await
    }
}
