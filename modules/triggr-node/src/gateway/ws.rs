//! WebSocket sessions. An upgraded connection owns one pub/sub subscriber
//! queue; inbound frames manage the subscription set, outbound frames are
//! the change payloads. Pings go out every 30 s; a missing pong for 60 s or
//! a 5 s write stall closes the connection.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::gateway::auth::ApiKeyAuth;
use crate::gateway::AppState;
use crate::pubsub::Subscriber;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_DEADLINE: Duration = Duration::from_secs(60);

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    ws: WebSocketUpgrade,
) -> Response {
    let project_id = auth.project.id;
    ws.on_upgrade(move |socket| session(socket, state, project_id))
}

async fn session(socket: WebSocket, state: Arc<AppState>, project: triggr_common::ProjectId) {
    let subscriber = state.pubsub.register(project);
    let last_pong = Arc::new(Mutex::new(Instant::now()));
    let write_timeout = Duration::from_secs(state.config.ws_write_timeout_secs);

    let (sender, receiver) = socket.split();
    let writer = tokio::spawn(write_loop(
        sender,
        subscriber.clone(),
        last_pong.clone(),
        write_timeout,
    ));

    read_loop(receiver, state.clone(), subscriber.clone(), last_pong).await;

    // Reader is done (client went away or sent close): drain the writer out.
    subscriber.close(None);
    let _ = writer.await;
    state.pubsub.unsubscribe_all(&subscriber).await;
    debug!(project = %project, "websocket session ended");
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    subscriber: Arc<Subscriber>,
    last_pong: Arc<Mutex<Instant>>,
    write_timeout: Duration,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);

    loop {
        tokio::select! {
            frame = subscriber.recv() => match frame {
                Some(frame) => {
                    let sent =
                        tokio::time::timeout(write_timeout, sender.send(Message::Text(frame.into())))
                            .await;
                    match sent {
                        Ok(Ok(())) => subscriber.mark_delivered(),
                        // Write timeout or error: close the connection.
                        _ => break,
                    }
                }
                None => {
                    let close = subscriber.close_reason().map(|reason| CloseFrame {
                        code: close_code::NORMAL,
                        reason: reason.into(),
                    });
                    let _ = sender.send(Message::Close(close)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                let stale = last_pong
                    .lock()
                    .map(|t| t.elapsed() > PONG_DEADLINE)
                    .unwrap_or(true);
                if stale {
                    debug!("no pong within deadline; closing websocket");
                    break;
                }
                let sent =
                    tokio::time::timeout(write_timeout, sender.send(Message::Ping(Vec::new().into())))
                        .await;
                if !matches!(sent, Ok(Ok(()))) {
                    break;
                }
            }
        }
    }
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    state: Arc<AppState>,
    subscriber: Arc<Subscriber>,
    last_pong: Arc<Mutex<Instant>>,
) {
    while let Some(Ok(message)) = receiver.next().await {
        if subscriber.is_closed() {
            break;
        }
        match message {
            Message::Text(text) => handle_command(&state, &subscriber, text.as_str()).await,
            Message::Pong(_) => {
                if let Ok(mut t) = last_pong.lock() {
                    *t = Instant::now();
                }
            }
            Message::Close(_) => break,
            // Pings are answered by the protocol layer; binary is ignored.
            _ => {}
        }
    }
}

#[derive(Deserialize)]
struct InboundFrame {
    data: String,
}

/// `{"data": "subscribe:<topic>"}` / `{"data": "unsubscribe:<topic>"}`.
/// Anything else (bad JSON, unknown verbs, malformed topics) is ignored.
async fn handle_command(state: &AppState, subscriber: &Arc<Subscriber>, text: &str) {
    let Ok(frame) = serde_json::from_str::<InboundFrame>(text) else {
        return;
    };
    if let Some(topic) = frame.data.strip_prefix("subscribe:") {
        if state.pubsub.subscribe(subscriber, topic).await {
            debug!(topic, "subscribed");
        } else {
            debug!(topic, "ignoring malformed topic");
        }
    } else if let Some(topic) = frame.data.strip_prefix("unsubscribe:") {
        state.pubsub.unsubscribe(subscriber, topic).await;
        debug!(topic, "unsubscribed");
    }
}
