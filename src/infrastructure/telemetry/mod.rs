use crate::domain::error::{AppError, Result};
use crate::domain::live_execution::TelemetryMessage;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::info;
use url::Url;

pub type TelemetrySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `{ws_base}/run/ws/{run_id}`
pub fn run_socket_url(ws_base: &str, run_id: &str) -> Result<Url> {
    let run_id = run_id.trim();
    if run_id.is_empty() {
        return Err(AppError::ValidationError("run_id is required".to_string()));
    }
    let raw = format!("{}/run/ws/{}", ws_base.trim_end_matches('/'), run_id);
    let url = Url::parse(&raw)
        .map_err(|e| AppError::ValidationError(format!("Invalid run socket url {}: {}", raw, e)))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(AppError::ValidationError(format!(
            "Run socket url must be ws(s): {}",
            url
        )));
    }
    Ok(url)
}

pub async fn connect(url: &Url) -> Result<TelemetrySocket> {
    let (socket, _) = connect_async(url.as_str())
        .await
        .map_err(|e| AppError::ChannelError(format!("Failed to open {}: {}", url, e)))?;
    info!(url = %url, "Run telemetry socket connected");
    Ok(socket)
}

pub fn decode_frame(text: &str) -> Result<TelemetryMessage> {
    serde_json::from_str(text)
        .map_err(|e| AppError::ParseError(format!("Unrecognized telemetry frame: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::live_execution::RunOutcome;

    #[test]
    fn test_run_socket_url() {
        let url = run_socket_url("ws://localhost:8001/api/v1/", "abc").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8001/api/v1/run/ws/abc");
        assert!(run_socket_url("http://localhost:8001", "abc").is_err());
        assert!(run_socket_url("ws://localhost:8001", " ").is_err());
    }

    #[test]
    fn test_decode_frame() {
        assert_eq!(
            decode_frame(r#"{"type":"status","data":"error"}"#).unwrap(),
            TelemetryMessage::Status(RunOutcome::Error)
        );
        assert!(matches!(
            decode_frame("not json"),
            Err(AppError::ParseError(_))
        ));
    }
}
