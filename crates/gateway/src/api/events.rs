//! Event delivery endpoints.
//!
//! - `GET /api/events/activations/:id` — SSE stream of one activation's
//!   events; closes after the terminal event.
//! - `GET /api/events/ws` — WebSocket; the client sends
//!   `{"subscribe": "<pattern>"}` and receives matching bus events.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::Stream;

use mg_events::{ActivationEvent, BusEvent, Subscription};

use crate::api::auth::AdminGuard;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn activation_events_sse(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(activation_id): Path<String>,
) -> impl IntoResponse {
    let sub = state.bus.subscribe("activation:*");
    Sse::new(activation_stream(sub, activation_id)).keep_alive(KeepAlive::default())
}

fn activation_stream(
    sub: Subscription,
    activation_id: String,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        loop {
            match sub.recv().await {
                Some(BusEvent::Activation(ev)) if ev.activation_id() == activation_id => {
                    let terminal = ev.is_terminal();
                    let name = event_name(&ev);
                    let data = serde_json::to_string(&ev).unwrap_or_default();
                    yield Ok(Event::default().event(name).data(data));
                    if terminal {
                        break;
                    }
                }
                Some(_) => {} // different activation id on the shared wildcard
                None => break,
            }
        }
    }
}

fn event_name(ev: &ActivationEvent) -> &'static str {
    match ev {
        ActivationEvent::Start { .. } => "start",
        ActivationEvent::Progress { .. } => "progress",
        ActivationEvent::Debug { .. } => "debug",
        ActivationEvent::Complete { .. } => "complete",
        ActivationEvent::Error { .. } => "error",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebSocket
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn events_ws(
    _guard: AdminGuard,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut sub: Option<Subscription> = None;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let parsed: Result<serde_json::Value, _> = serde_json::from_str(&text);
                        if let Ok(value) = parsed {
                            if let Some(pattern) = value["subscribe"].as_str() {
                                // A new subscribe replaces the previous one.
                                sub = Some(state.bus.subscribe(pattern));
                                let ack = serde_json::json!({ "subscribed": pattern });
                                if socket.send(Message::Text(ack.to_string())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "event websocket read failed");
                        break;
                    }
                }
            }
            event = next_event(&sub) => {
                match event {
                    Some(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(p) => p,
                            Err(_) => continue,
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break, // subscription cancelled
                }
            }
        }
    }
}

/// Pending forever while no subscription is installed, so the select arm
/// stays inert until the client subscribes.
async fn next_event(sub: &Option<Subscription>) -> Option<BusEvent> {
    match sub {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}
