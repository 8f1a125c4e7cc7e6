//! `/research/ws/{task_id}` — forwards a task's [`ProgressFrame`]s to a
//! WebSocket client, adapted from the teacher's `factory::ws` broadcast
//! -forwarding loop: periodic transport-level Ping/Pong keepalive combined
//! with forwarding from a `tokio::sync::broadcast::Receiver`, plus handling
//! of a client-sent text `"ping"` (answered with a `"pong"` text frame, not
//! to be confused with the WebSocket protocol's own Ping/Pong frames).

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::domain::ProgressFrame;
use crate::http::SharedState;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub fn router() -> Router<SharedState> {
    Router::new().route("/research/ws/{task_id}", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>, Path(task_id): Path<String>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, task_id))
}

async fn handle_socket(socket: WebSocket, state: SharedState, task_id: String) {
    let (attach_frames, rx) = state.registry.subscribe(&task_id);
    let (mut sender, receiver) = socket.split();

    for frame in attach_frames {
        if send_frame(&mut sender, &frame).await.is_err() {
            return;
        }
    }

    run_socket_loop(sender, receiver, rx).await;
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &ProgressFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).expect("ProgressFrame always serializes");
    sender.send(Message::Text(text.into())).await
}

/// Mirrors the teacher's `run_socket_loop`: a `select!` over periodic
/// keepalive pings, broadcast forwarding (dropping `Lagged` and breaking on
/// `Closed`), and inbound client frames. Breaks immediately after forwarding
/// a terminal frame since the registry publishes nothing further for a
/// terminated task.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<ProgressFrame>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(frame) => {
                        let terminal = frame.frame_type.is_terminal();
                        if send_frame(&mut sender, &frame).await.is_err() {
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Text(text))) if text.trim() == "ping" => {
                        if sender.send(Message::Text("pong".into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
