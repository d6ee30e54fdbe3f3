use crate::domain::error::Result;
use crate::domain::live_execution::{
    CompletionRecord, ExecutionStatus, LiveExecutionSession,
};
use crate::infrastructure::telemetry::{self, TelemetrySocket};
use futures_util::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

/// Follows one run over its telemetry socket.
///
/// The socket is owned by a background task. Dropping the monitor (or calling
/// [`RunMonitor::close`]) stops that task and closes the socket.
pub struct RunMonitor {
    run_id: String,
    state: Arc<Mutex<LiveExecutionSession>>,
    revision: watch::Receiver<u64>,
    completion: Option<oneshot::Receiver<CompletionRecord>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RunMonitor {
    /// Starts following `run_id`. Must be called inside a tokio runtime.
    pub fn open(ws_base: &str, run_id: &str) -> Result<Self> {
        let url = telemetry::run_socket_url(ws_base, run_id)?;
        let run_id = run_id.trim().to_string();
        let state = Arc::new(Mutex::new(LiveExecutionSession::new(run_id.clone())));
        let (revision_tx, revision) = watch::channel(0u64);
        let (completion_tx, completion) = oneshot::channel();
        let (shutdown, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(pump(
            url,
            state.clone(),
            revision_tx,
            completion_tx,
            shutdown_rx,
        ));

        Ok(Self {
            run_id,
            state,
            revision,
            completion: Some(completion),
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn snapshot(&self) -> LiveExecutionSession {
        lock(&self.state).clone()
    }

    pub fn status(&self) -> ExecutionStatus {
        lock(&self.state).status
    }

    pub fn log_text(&self) -> String {
        lock(&self.state).log_text.clone()
    }

    /// Newest screen frame only; intermediate frames are never queued.
    pub fn latest_frame(&self) -> Option<String> {
        lock(&self.state).latest_frame.clone()
    }

    /// Bumped after every applied frame and status change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.clone()
    }

    /// Resolves once with the first terminal status. Errors if the socket
    /// closed without one.
    pub fn take_completion(&mut self) -> Option<oneshot::Receiver<CompletionRecord>> {
        self.completion.take()
    }

    /// Waits for the socket task to end on its own.
    pub async fn wait_until_finished(&mut self) -> ExecutionStatus {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(run_id = %self.run_id, error = %err, "Telemetry task ended abnormally");
                lock(&self.state).mark_closed();
            }
        }
        self.status()
    }

    /// Stops the socket task and waits for it. The state stays readable.
    pub async fn shutdown(&mut self) -> ExecutionStatus {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.wait_until_finished().await
    }

    pub async fn close(mut self) -> ExecutionStatus {
        self.shutdown().await
    }
}

impl Drop for RunMonitor {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn lock(state: &Mutex<LiveExecutionSession>) -> MutexGuard<'_, LiveExecutionSession> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn bump(revision: &watch::Sender<u64>) {
    revision.send_modify(|value| *value += 1);
}

async fn pump(
    url: Url,
    state: Arc<Mutex<LiveExecutionSession>>,
    revision: watch::Sender<u64>,
    completion: oneshot::Sender<CompletionRecord>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let run_id = lock(&state).run_id.clone();
    let connected = tokio::select! {
        socket = telemetry::connect(&url) => socket,
        _ = &mut shutdown => {
            lock(&state).mark_closed();
            bump(&revision);
            return;
        }
    };
    let socket = match connected {
        Ok(socket) => socket,
        Err(err) => {
            warn!(run_id = %run_id, error = %err, "Run telemetry unavailable");
            lock(&state).mark_closed();
            bump(&revision);
            return;
        }
    };

    lock(&state).mark_streaming();
    bump(&revision);

    stream_frames(socket, &run_id, &state, &revision, completion, shutdown).await;

    lock(&state).mark_closed();
    bump(&revision);
    info!(run_id = %run_id, status = ?lock(&state).status, "Run telemetry finished");
}

async fn stream_frames(
    mut socket: TelemetrySocket,
    run_id: &str,
    state: &Mutex<LiveExecutionSession>,
    revision: &watch::Sender<u64>,
    completion: oneshot::Sender<CompletionRecord>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut completion = Some(completion);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!(run_id = %run_id, "Closing run telemetry socket");
                if let Err(err) = socket.close(None).await {
                    debug!(run_id = %run_id, error = %err, "Socket close handshake failed");
                }
                break;
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => match telemetry::decode_frame(&text) {
                    Ok(message) => {
                        let finished = lock(state).apply(message);
                        bump(revision);
                        if let Some(record) = finished {
                            info!(run_id = %run_id, outcome = %record.outcome, "Run completed");
                            if let Some(tx) = completion.take() {
                                let _ = tx.send(record);
                            }
                        }
                    }
                    Err(err) => warn!(run_id = %run_id, error = %err, "Skipping telemetry frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(run_id = %run_id, error = %err, "Run telemetry socket failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::live_execution::RunOutcome;
    use futures_util::SinkExt;
    use tokio::net::TcpListener;

    async fn serve_frames(frames: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
            let _ = ws.close(None).await;
            while let Some(Ok(_)) = ws.next().await {}
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_streams_logs_in_order_and_reports_first_status() {
        let base = serve_frames(vec![
            r#"{"type":"log","data":"step 1 ok\n"}"#,
            r#"{"type":"screen","data":"frame-1"}"#,
            r#"{"type":"log","data":"step 2 ok\n"}"#,
            "garbage",
            r#"{"type":"screen","data":"frame-2"}"#,
            r#"{"type":"status","data":"success"}"#,
            r#"{"type":"status","data":"error"}"#,
        ])
        .await;

        let mut monitor = RunMonitor::open(&base, "run-42").unwrap();
        let completion = monitor.take_completion().unwrap();
        let record = completion.await.unwrap();
        assert_eq!(record.run_id, "run-42");
        assert_eq!(record.outcome, RunOutcome::Success);
        assert_eq!(record.log_snapshot, "step 1 ok\nstep 2 ok\n");

        let status = monitor.wait_until_finished().await;
        assert_eq!(status, ExecutionStatus::Completed(RunOutcome::Success));
        assert_eq!(monitor.latest_frame().as_deref(), Some("frame-2"));
        assert_eq!(monitor.snapshot().frames_received, 2);
    }

    #[tokio::test]
    async fn test_socket_closing_without_status_is_closed() {
        let base = serve_frames(vec![r#"{"type":"log","data":"partial"}"#]).await;
        let mut monitor = RunMonitor::open(&base, "run-7").unwrap();
        let completion = monitor.take_completion().unwrap();

        assert_eq!(monitor.wait_until_finished().await, ExecutionStatus::Closed);
        assert!(completion.await.is_err());
        assert_eq!(monitor.log_text(), "partial");
    }

    #[tokio::test]
    async fn test_unreachable_socket_is_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut monitor = RunMonitor::open(&format!("ws://{}", addr), "run-x").unwrap();
        assert_eq!(monitor.wait_until_finished().await, ExecutionStatus::Closed);
    }

    #[tokio::test]
    async fn test_close_stops_an_idle_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"type":"log","data":"hi"}"#.to_string()))
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let monitor = RunMonitor::open(&format!("ws://{}", addr), "run-idle").unwrap();
        let mut revisions = monitor.subscribe();
        while monitor.log_text().is_empty() {
            revisions.changed().await.unwrap();
        }
        assert_eq!(monitor.status(), ExecutionStatus::Streaming);
        assert_eq!(monitor.close().await, ExecutionStatus::Closed);
    }
}
