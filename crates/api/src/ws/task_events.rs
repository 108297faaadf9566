use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, StreamExt};
use storyreel_core::task::Task;
use storyreel_core::types::EntityId;
use storyreel_events::TaskEvent;
use storyreel_pipeline::Orchestrator;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::AppResult;
use crate::state::AppState;

/// GET /api/v1/tasks/{id}/ws
///
/// Upgrade to a WebSocket that receives the task's current state followed
/// by every status and progress event, as JSON text frames. The server
/// closes the socket after the task ends.
pub async fn task_events_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    // Subscribe before the snapshot read so no event falls in between.
    let events = state.engine.events().subscribe();
    let task = state.engine.get_task(id).await?;
    let engine = state.engine.clone();
    Ok(ws.on_upgrade(move |socket| stream_task(socket, engine, task, events)))
}

/// Forward events for one task until it ends or the client goes away.
async fn stream_task(
    socket: WebSocket,
    engine: Arc<Orchestrator>,
    task: Task,
    mut events: broadcast::Receiver<TaskEvent>,
) {
    let task_id = task.id;
    tracing::info!(task_id = %task_id, "Task event stream opened");

    let (mut sink, mut stream) = socket.split();

    let snapshot = TaskEvent::status(&task);
    let mut ended = snapshot.is_terminal();
    if send_event(&mut sink, &snapshot).await.is_err() {
        return;
    }

    while !ended {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) if event.task_id == task_id => {
                    ended = event.is_terminal();
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    // Missed events are replaced by a fresh snapshot.
                    tracing::warn!(task_id = %task_id, skipped, "Task event stream lagged");
                    match engine.get_task(task_id).await {
                        Ok(current) => {
                            let event = TaskEvent::status(&current);
                            ended = event.is_terminal();
                            if send_event(&mut sink, &event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(task_id = %task_id, error = %e, "Could not reload task");
                            break;
                        }
                    }
                }
                Err(RecvError::Closed) => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(task_id = %task_id, "Client closed task event stream");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(task_id = %task_id, error = %e, "WebSocket receive error");
                    return;
                }
            },
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    tracing::info!(task_id = %task_id, "Task event stream closed");
}

async fn send_event<S>(sink: &mut S, event: &TaskEvent) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(task_id = %event.task_id, error = %e, "Could not encode task event");
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await.map_err(|_| {
        tracing::debug!(task_id = %event.task_id, "WebSocket sink closed");
    })
}
