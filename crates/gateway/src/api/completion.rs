//! Internal completion gateway.
//!
//! `POST /api/internal/v1/local_completion` bridges a single chat
//! completion onto the locally-served engine. Localhost-only; the body is
//! validated field by field so failures carry a `param` path. Streaming
//! responses are OpenAI-compatible chunk SSE ending in `data: [DONE]`.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use uuid::Uuid;

use mg_domain::error::Error;

use crate::api::error::ApiError;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    /// Workflow id for the cancellation registry.
    pub user_id: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub top_p: Option<f64>,
}

fn invalid(param: &str, message: &str) -> Error {
    Error::InvalidRequest {
        param: param.into(),
        message: message.into(),
    }
}

/// Field-by-field validation producing `param` paths the UI can attach to
/// inputs. Serde alone would reject the body without saying where.
pub fn validate_request(body: &serde_json::Value) -> Result<CompletionRequest, Error> {
    let messages_raw = body
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| invalid("messages", "must be an array"))?;
    if messages_raw.is_empty() {
        return Err(invalid("messages", "must contain at least one message"));
    }

    let mut messages = Vec::with_capacity(messages_raw.len());
    for (i, raw) in messages_raw.iter().enumerate() {
        let role = raw
            .get("role")
            .and_then(|r| r.as_str())
            .ok_or_else(|| invalid(&format!("messages[{i}].role"), "must be a string"))?;
        if !matches!(role, "user" | "assistant" | "system") {
            return Err(invalid(
                &format!("messages[{i}].role"),
                "must be one of: user, assistant, system",
            ));
        }
        let content = raw
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| invalid(&format!("messages[{i}].content"), "must be a string"))?;
        messages.push(ChatMessage {
            role: role.to_owned(),
            content: content.to_owned(),
        });
    }

    let stream = match body.get("stream") {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Bool(b)) => *b,
        Some(_) => return Err(invalid("stream", "must be a boolean")),
    };

    let user_id = match body.get("user_id") {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Err(invalid("user_id", "must be a string or a number")),
    };

    let temperature = match body.get("temperature") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => {
            let t = v
                .as_f64()
                .ok_or_else(|| invalid("temperature", "must be a number"))?;
            if !(0.0..=2.0).contains(&t) {
                return Err(invalid("temperature", "must be within [0, 2]"));
            }
            Some(t)
        }
    };

    let max_tokens = match body.get("max_tokens") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => {
            let m = v
                .as_u64()
                .filter(|&m| m > 0)
                .ok_or_else(|| invalid("max_tokens", "must be an integer greater than 0"))?;
            Some(m)
        }
    };

    let top_p = match body.get("top_p") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => {
            let t = v.as_f64().ok_or_else(|| invalid("top_p", "must be a number"))?;
            if !(0.0..=1.0).contains(&t) {
                return Err(invalid("top_p", "must be within [0, 1]"));
            }
            Some(t)
        }
    };

    Ok(CompletionRequest {
        messages,
        stream,
        user_id,
        temperature,
        max_tokens,
        top_p,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunk shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn delta_chunk(
    id: &str,
    created: i64,
    model: &str,
    content: Option<&str>,
    finish_reason: Option<&str>,
    usage: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut delta = serde_json::Map::new();
    if let Some(c) = content {
        delta.insert("content".into(), serde_json::Value::String(c.to_owned()));
    }
    let mut chunk = serde_json::json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    });
    if let Some(u) = usage {
        chunk["usage"] = u;
    }
    chunk
}

/// Rough token count when the engine did not report usage.
fn approx_tokens(chars: usize) -> u64 {
    (chars as u64).div_ceil(4).max(1)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream frame parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One parsed upstream SSE frame.
enum UpstreamFrame {
    Delta(String),
    Usage(serde_json::Value),
    Done,
}

/// Split complete `data:` frames out of the upstream buffer.
fn drain_frames(buf: &mut String) -> Vec<UpstreamFrame> {
    let mut frames = Vec::new();
    while let Some(pos) = buf.find("\n\n") {
        let frame: String = buf.drain(..pos + 2).collect();
        for line in frame.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                frames.push(UpstreamFrame::Done);
                continue;
            }
            let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
                continue;
            };
            if let Some(usage) = value.get("usage").filter(|u| !u.is_null()) {
                frames.push(UpstreamFrame::Usage(usage.clone()));
            }
            if let Some(content) = value["choices"][0]["delta"]["content"].as_str() {
                if !content.is_empty() {
                    frames.push(UpstreamFrame::Delta(content.to_owned()));
                }
            }
        }
    }
    frames
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn local_completion(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if !addr.ip().is_loopback() {
        return ApiError(Error::Forbidden(
            "local_completion accepts localhost callers only".into(),
        ))
        .into_response();
    }

    let req = match validate_request(&body) {
        Ok(r) => r,
        Err(e) => return ApiError(e).into_response(),
    };

    let Some(model_id) = state.lifecycle.active_model_id() else {
        return ApiError(Error::Internal("no local model is active".into())).into_response();
    };
    let model_name = model_id.to_string();

    let upstream_body = serde_json::json!({
        "model": model_name,
        "messages": req.messages,
        "stream": true,
        "stream_options": { "include_usage": true },
        "temperature": req.temperature,
        "max_tokens": req.max_tokens,
        "top_p": req.top_p,
    });
    let upstream_url = state.config.engine.chat_completions_url();
    let timeout = Duration::from_secs(state.config.engine.stream_timeout_secs);
    let prompt_chars: usize = req.messages.iter().map(|m| m.content.len()).sum();

    if req.stream {
        let stream = completion_stream(
            state.clone(),
            upstream_url,
            upstream_body,
            model_name,
            req.user_id,
            prompt_chars,
            timeout,
        );
        let sse = Sse::new(stream).keep_alive(KeepAlive::default());
        (
            [(axum::http::header::CACHE_CONTROL, "no-cache")],
            sse,
        )
            .into_response()
    } else {
        aggregate_completion(
            state,
            upstream_url,
            upstream_body,
            model_name,
            req.user_id,
            prompt_chars,
            timeout,
        )
        .await
    }
}

/// Write-side state machine: frames may only be produced while `Open`,
/// the terminal usage chunk and `[DONE]` flip through `Closing`, and a
/// `Closed` stream emits nothing further.
#[derive(PartialEq)]
enum StreamPhase {
    Open,
    Closing,
    Closed,
}

#[allow(clippy::too_many_arguments)]
fn completion_stream(
    state: AppState,
    url: String,
    upstream_body: serde_json::Value,
    model_name: String,
    workflow_id: String,
    prompt_chars: usize,
    timeout: Duration,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let chunk_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
        let created = chrono::Utc::now().timestamp();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut phase = StreamPhase::Open;
        let mut completion_chars = 0usize;
        let mut upstream_usage: Option<serde_json::Value> = None;

        let response = state
            .http
            .post(&url)
            .json(&upstream_body)
            .send()
            .await;
        let response = match response {
            Ok(r) if r.status().is_success() => Some(r),
            Ok(r) => {
                tracing::error!(status = %r.status(), "engine rejected completion request");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "engine unreachable for completion");
                None
            }
        };

        if let Some(response) = response {
            let mut bytes = response.bytes_stream();
            let mut buf = String::new();

            'read: while phase == StreamPhase::Open {
                // Cancellation is honored at token boundaries; observing it
                // clears the flag.
                if state.cancellations.take(&workflow_id) {
                    tracing::info!(workflow_id = %workflow_id, "completion cancelled");
                    phase = StreamPhase::Closing;
                    break 'read;
                }

                match tokio::time::timeout_at(deadline, bytes.next()).await {
                    Err(_) => {
                        // Absolute timeout: end the stream without a
                        // half-written frame; nothing more is emitted.
                        tracing::error!(workflow_id = %workflow_id, "completion stream timed out");
                        phase = StreamPhase::Closed;
                        break 'read;
                    }
                    Ok(None) => {
                        phase = StreamPhase::Closing;
                        break 'read;
                    }
                    Ok(Some(Err(e))) => {
                        tracing::warn!(error = %e, "engine stream read failed");
                        phase = StreamPhase::Closing;
                        break 'read;
                    }
                    Ok(Some(Ok(chunk))) => {
                        buf.push_str(&String::from_utf8_lossy(&chunk));
                        for frame in drain_frames(&mut buf) {
                            match frame {
                                UpstreamFrame::Done => {
                                    phase = StreamPhase::Closing;
                                    break 'read;
                                }
                                UpstreamFrame::Usage(u) => upstream_usage = Some(u),
                                UpstreamFrame::Delta(content) => {
                                    completion_chars += content.len();
                                    let chunk = delta_chunk(
                                        &chunk_id,
                                        created,
                                        &model_name,
                                        Some(&content),
                                        None,
                                        None,
                                    );
                                    yield Ok(Event::default().data(chunk.to_string()));
                                }
                            }
                        }
                    }
                }
            }
        } else {
            // Upstream never opened; still terminate the SSE properly.
            phase = StreamPhase::Closing;
        }

        if phase == StreamPhase::Closing {
            let usage = upstream_usage.unwrap_or_else(|| {
                let prompt = approx_tokens(prompt_chars);
                let completion = if completion_chars == 0 {
                    0
                } else {
                    approx_tokens(completion_chars)
                };
                serde_json::json!({
                    "prompt_tokens": prompt,
                    "completion_tokens": completion,
                    "total_tokens": prompt + completion,
                })
            });
            let terminal = delta_chunk(
                &chunk_id,
                created,
                &model_name,
                None,
                Some("stop"),
                Some(usage),
            );
            yield Ok(Event::default().data(terminal.to_string()));
            yield Ok(Event::default().data("[DONE]"));
            phase = StreamPhase::Closed;
        }
        let _ = phase; // Closed; any further write would be a bug.
    }
}

/// Non-streaming mode: drain the same upstream stream and answer with one
/// completion body.
async fn aggregate_completion(
    state: AppState,
    url: String,
    upstream_body: serde_json::Value,
    model_name: String,
    workflow_id: String,
    prompt_chars: usize,
    timeout: Duration,
) -> Response {
    let deadline = tokio::time::Instant::now() + timeout;

    let response = match state.http.post(&url).json(&upstream_body).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            return ApiError(Error::Internal(format!("engine returned {}", r.status())))
                .into_response()
        }
        Err(e) => {
            return ApiError(Error::Internal(format!("engine unreachable: {e}"))).into_response()
        }
    };

    let mut bytes = response.bytes_stream();
    let mut buf = String::new();
    let mut content = String::new();
    let mut upstream_usage: Option<serde_json::Value> = None;

    'read: loop {
        if state.cancellations.take(&workflow_id) {
            break 'read;
        }
        match tokio::time::timeout_at(deadline, bytes.next()).await {
            Err(_) => {
                return ApiError(Error::Timeout("completion timed out".into())).into_response();
            }
            Ok(None) => break 'read,
            Ok(Some(Err(e))) => {
                tracing::warn!(error = %e, "engine stream read failed");
                break 'read;
            }
            Ok(Some(Ok(chunk))) => {
                buf.push_str(&String::from_utf8_lossy(&chunk));
                for frame in drain_frames(&mut buf) {
                    match frame {
                        UpstreamFrame::Done => break 'read,
                        UpstreamFrame::Usage(u) => upstream_usage = Some(u),
                        UpstreamFrame::Delta(c) => content.push_str(&c),
                    }
                }
            }
        }
    }

    let usage = upstream_usage.unwrap_or_else(|| {
        let prompt = approx_tokens(prompt_chars);
        let completion = if content.is_empty() {
            0
        } else {
            approx_tokens(content.len())
        };
        serde_json::json!({
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion,
        })
    });

    Json(serde_json::json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model_name,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "usage": usage,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
