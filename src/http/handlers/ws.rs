//! WebSocket handler for job events
//!
//! Mirrors the SSE contract with JSON text frames: current status first,
//! then live events until a terminal status closes the connection.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::queue::{Event, QueueManager};

use super::super::types::WsQuery;
use super::AppState;

/// GET /scrq/ws?job_id={id} — WebSocket upgrade
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
) -> Result<Response, AppError> {
    let queue = Arc::clone(state.queue()?);

    // Reject unknown jobs before the upgrade.
    queue
        .get_job(&query.job_id)
        .map_err(|_| AppError::not_found("Job not found"))?;

    Ok(ws.on_upgrade(move |socket| handle_ws(queue, query.job_id, socket)))
}

async fn handle_ws(queue: Arc<QueueManager>, job_id: String, socket: WebSocket) {
    info!(job_id, "WebSocket client connected");
    let (mut tx, mut rx) = socket.split();

    // Subscribe before snapshotting so no event can fall between them.
    let mut subscription = queue.subscribe(&job_id);
    let Ok(job) = queue.get_job(&job_id) else {
        let _ = tx
            .send(Message::Text(r#"{"error":"job not found"}"#.to_string()))
            .await;
        return;
    };

    let snapshot = Event {
        job_id: job.id.clone(),
        status: job.status,
        progress: job.progress,
        message: job.message.clone(),
    };
    if send_event(&mut tx, &snapshot).await.is_err() {
        return;
    }

    if job.status.is_terminal() {
        let _ = tx.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => {
                    let terminal = event.status.is_terminal();
                    if send_event(&mut tx, &event).await.is_err() {
                        break;
                    }
                    if terminal {
                        // Give the final frame a moment to flush.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        let _ = tx.send(Message::Close(None)).await;
                        break;
                    }
                }
                None => break,
            },
            incoming = rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    debug!(job_id, "WebSocket client disconnected");
                    break;
                }
                Some(Err(err)) => {
                    warn!(job_id, error = %err, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

async fn send_event(
    tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    event: &Event,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    tx.send(Message::Text(json)).await
}
