use crate::application::use_cases::live_execution::RunMonitor;
use crate::domain::error::{AppError, Result};
use crate::domain::live_execution::{CompletionRecord, ExecutionStatus};
use crate::domain::notification::Notification;
use crate::interfaces::logging::{
    add_log, emit_status_log, InspectorLogContext, RUN_COMPLETED_EMIT, RUN_STREAM_EMIT,
};
use crate::interfaces::state::AppState;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Opens the telemetry socket for `run_id` and forwards every update to the
/// host as `run-stream`, then `run-completed` once a terminal status arrives.
pub fn follow_run(state: &Arc<AppState>, run_id: &str) -> Result<()> {
    let run_id = run_id.trim();
    if run_id.is_empty() {
        return Err(AppError::ValidationError("run_id is required".to_string()));
    }
    let ws_base = state.config.resolved_ws_base()?;
    let (monitor, stop_rx) = match state.followed_runs().entry(run_id.to_string()) {
        Entry::Occupied(_) => {
            debug!(run_id = %run_id, "Run already followed");
            return Ok(());
        }
        Entry::Vacant(slot) => {
            let monitor = RunMonitor::open(&ws_base, run_id)?;
            let (stop, stop_rx) = oneshot::channel();
            slot.insert(stop);
            (monitor, stop_rx)
        }
    };
    add_log(
        &state.logs,
        "INFO",
        "Run",
        &format!("Following run {}", run_id),
    );
    tokio::spawn(forward(Arc::clone(state), monitor, stop_rx));
    Ok(())
}

/// Closes the run's socket. Returns false when the run was not followed.
pub fn stop_following(state: &Arc<AppState>, run_id: &str) -> bool {
    match state.followed_runs().remove(run_id.trim()) {
        Some(stop) => {
            let _ = stop.send(());
            true
        }
        None => false,
    }
}

pub fn followed_runs(state: &Arc<AppState>) -> Vec<String> {
    let mut runs: Vec<String> = state.followed_runs().keys().cloned().collect();
    runs.sort();
    runs
}

fn emit_snapshot(state: &AppState, monitor: &RunMonitor) {
    let payload = match serde_json::to_value(monitor.snapshot()) {
        Ok(payload) => payload,
        Err(err) => {
            add_log(
                &state.logs,
                "ERROR",
                "Run",
                &format!("Failed to serialize run stream update: {}", err),
            );
            return;
        }
    };
    if let Err(err) = state.emitter.emit(RUN_STREAM_EMIT, payload) {
        add_log(
            &state.logs,
            "ERROR",
            "Run",
            &format!("Failed to emit run stream update: {}", err),
        );
    }
}

fn emit_completion(state: &AppState, record: &CompletionRecord) {
    match serde_json::to_value(record) {
        Ok(payload) => {
            if let Err(err) = state.emitter.emit(RUN_COMPLETED_EMIT, payload) {
                add_log(
                    &state.logs,
                    "ERROR",
                    "Run",
                    &format!("Failed to emit run completion: {}", err),
                );
            }
        }
        Err(err) => add_log(
            &state.logs,
            "ERROR",
            "Run",
            &format!("Failed to serialize run completion: {}", err),
        ),
    }
    let context = InspectorLogContext {
        run_id: Some(record.run_id.clone()),
        ..Default::default()
    };
    emit_status_log(
        state.emitter.as_ref(),
        &state.logs,
        "INFO",
        "Run",
        &format!("Run {} finished: {}", record.run_id, record.outcome),
        &record.outcome.to_string(),
        None,
        Some(context),
    );
    state
        .notifications
        .push(Notification::info(format!("Run {} finished: {}", record.run_id, record.outcome)));
}

async fn forward(state: Arc<AppState>, mut monitor: RunMonitor, mut stop: oneshot::Receiver<()>) {
    let run_id = monitor.run_id().to_string();
    let mut revisions = monitor.subscribe();
    let mut completion = monitor.take_completion();

    loop {
        tokio::select! {
            _ = &mut stop => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                emit_snapshot(&state, &monitor);
                if let Some(mut rx) = completion.take() {
                    match rx.try_recv() {
                        Ok(record) => emit_completion(&state, &record),
                        Err(oneshot::error::TryRecvError::Empty) => completion = Some(rx),
                        Err(oneshot::error::TryRecvError::Closed) => {}
                    }
                }
            }
        }
    }

    let status = monitor.shutdown().await;
    emit_snapshot(&state, &monitor);
    if let Some(rx) = completion {
        if let Ok(record) = rx.await {
            emit_completion(&state, &record);
        }
    }
    state.followed_runs().remove(&run_id);
    if status == ExecutionStatus::Closed {
        add_log(
            &state.logs,
            "WARN",
            "Run",
            &format!("Run {} stream closed without a final status", run_id),
        );
    }
    info!(run_id = %run_id, status = ?status, "Stopped following run");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::test_support::FakeBridge;
    use crate::infrastructure::config::InspectorConfig;
    use crate::interfaces::logging::tests::CapturingEmitter;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    async fn app_with_socket(frames: Vec<&'static str>) -> (Arc<AppState>, Arc<CapturingEmitter>) {
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

        let mut config = InspectorConfig::default();
        config.ws_base_url = Some(format!("ws://{}", addr));
        let bridge = Arc::new(FakeBridge::new());
        let emitter = Arc::new(CapturingEmitter::default());
        let state = AppState::new(config, bridge.clone(), bridge, emitter.clone());
        (state, emitter)
    }

    async fn wait_until_unfollowed(state: &Arc<AppState>) {
        for _ in 0..200 {
            if followed_runs(state).is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run was never released");
    }

    fn events_named(emitter: &CapturingEmitter, name: &str) -> Vec<serde_json::Value> {
        emitter
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_forwards_stream_and_completion_once() {
        let (state, emitter) = app_with_socket(vec![
            r#"{"type":"log","data":"step 1 ok\n"}"#,
            r#"{"type":"screen","data":"frame-1"}"#,
            r#"{"type":"status","data":"error"}"#,
            r#"{"type":"status","data":"success"}"#,
        ])
        .await;

        follow_run(&state, "run-9").unwrap();
        assert_eq!(followed_runs(&state), vec!["run-9"]);
        wait_until_unfollowed(&state).await;

        let completed = events_named(&emitter, RUN_COMPLETED_EMIT);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0]["outcome"], "error");
        assert_eq!(completed[0]["logSnapshot"], "step 1 ok\n");

        let stream = events_named(&emitter, RUN_STREAM_EMIT);
        let last = stream.last().unwrap();
        assert_eq!(last["latestFrame"], "frame-1");
        assert_eq!(state.notifications.list().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_closed_without_status() {
        let (state, emitter) = app_with_socket(vec![r#"{"type":"log","data":"partial"}"#]).await;

        follow_run(&state, "run-3").unwrap();
        wait_until_unfollowed(&state).await;

        assert!(events_named(&emitter, RUN_COMPLETED_EMIT).is_empty());
        assert!(state
            .logs
            .snapshot()
            .iter()
            .any(|entry| entry.level == "WARN" && entry.message.contains("without a final status")));
    }

    #[tokio::test]
    async fn test_repeated_follow_opens_one_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
        let mut config = InspectorConfig::default();
        config.ws_base_url = Some(format!("ws://{}", addr));
        let bridge = Arc::new(FakeBridge::new());
        let state = AppState::new(config, bridge.clone(), bridge, Arc::new(CapturingEmitter::default()));

        follow_run(&state, "run-5").unwrap();
        follow_run(&state, " run-5 ").unwrap();
        assert_eq!(followed_runs(&state), vec!["run-5"]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 1);

        assert!(stop_following(&state, "run-5"));
        wait_until_unfollowed(&state).await;
    }

    #[tokio::test]
    async fn test_blank_run_id_is_rejected() {
        let (state, _) = app_with_socket(Vec::new()).await;
        assert!(follow_run(&state, "  ").is_err());
        assert!(!stop_following(&state, "unknown"));
    }
}
