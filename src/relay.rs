//! Streaming chat relay.
//!
//! One relay call forwards a single chat turn to an OpenAI-compatible
//! upstream endpoint and pipes the upstream SSE stream back to the caller in
//! real time.  Two consumers share the inbound line sequence:
//!
//! - a pass-through sink that re-emits every `data: ` line to the caller
//!   byte-for-byte (the caller's client parses the upstream's own SSE
//!   dialect, so no translation happens here), and
//! - a fold accumulator that best-effort-parses each payload for
//!   `choices[0].delta.content` fragments.  Parse failures skip the fragment
//!   and nothing else; delivery never waits on the accumulator.
//!
//! The upstream read loop runs in a spawned task that owns the accumulator
//! and performs the post-stream persistence, so a caller disconnect can stop
//! delivery without skipping the assistant-message write.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

use crate::entities::{dao::User, ChatStore, NewMessage, SqliteStore};
use crate::error::ServerError;
use crate::schemas::chat::ModelOverride;

/// Event-data prefix of the upstream SSE dialect.
const DATA_PREFIX: &str = "data: ";
/// Literal sentinel the upstream sends after its final delta.
const DONE_SENTINEL: &str = "[DONE]";
/// Upstream lines longer than this abort the relay as a transport fault.
const MAX_LINE_BYTES: usize = 1024 * 1024;
/// Frames buffered between the relay task and the caller's response body.
const CHANNEL_CAPACITY: usize = 64;

// ── Config resolution ─────────────────────────────────────────────────────────

/// Effective upstream endpoint for one relay call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
}

/// Merge the optional per-request override with the user's stored defaults.
///
/// Each field is picked independently: an override value wins only when it
/// is present and non-empty.  Fails when no usable base URL results, before
/// any network or persistence activity.
pub fn resolve_model_config(
    overrides: Option<&ModelOverride>,
    user: &User,
) -> Result<ResolvedModelConfig, ServerError> {
    fn pick(overriding: Option<&String>, stored: &str) -> String {
        match overriding {
            Some(v) if !v.is_empty() => v.clone(),
            _ => stored.to_owned(),
        }
    }

    let resolved = ResolvedModelConfig {
        base_url: pick(
            overrides.and_then(|o| o.base_url.as_ref()),
            &user.model_base_url,
        ),
        api_key: pick(
            overrides.and_then(|o| o.api_key.as_ref()),
            &user.model_api_key,
        ),
        model_name: pick(
            overrides.and_then(|o| o.model_name.as_ref()),
            &user.model_name,
        ),
    };

    if resolved.base_url.is_empty() {
        return Err(ServerError::Configuration(
            "model base URL not configured".into(),
        ));
    }
    Ok(resolved)
}

// ── Upstream wire types ───────────────────────────────────────────────────────

/// One element of the outbound `messages` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct UpstreamRequest<'a> {
    model: &'a str,
    messages: &'a [OutboundMessage],
    stream: bool,
}

/// Lenient view of one streamed delta event.  Unknown fields are ignored and
/// every level defaults, so a malformed payload simply yields no fragment.
#[derive(Debug, Default, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the incremental content fragment from one event payload, if any.
fn delta_content(payload: &str) -> Option<String> {
    serde_json::from_str::<StreamChunk>(payload)
        .ok()?
        .choices
        .into_iter()
        .next()?
        .delta
        .content
}

fn chat_completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// A complete SSE frame carrying one upstream data line, verbatim.
fn data_frame(line: &str) -> Bytes {
    Bytes::from(format!("{line}\n\n"))
}

/// A synthetic in-stream error frame.
fn error_frame(detail: &str) -> Bytes {
    Bytes::from(format!(
        "data: {}\n\n",
        serde_json::json!({ "error": detail })
    ))
}

// ── Relay engine ──────────────────────────────────────────────────────────────

/// Open the upstream stream and return the caller-facing SSE response.
///
/// The returned response starts streaming immediately; the spawned task
/// keeps running after the handler returns and, once the upstream
/// connection is closed (normally or not), persists the accumulated
/// assistant text exactly once.
pub fn stream(
    client: reqwest::Client,
    store: Arc<SqliteStore>,
    config: ResolvedModelConfig,
    messages: Vec<OutboundMessage>,
    conversation_id: Option<i64>,
    timeout: Duration,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let accumulated = relay_upstream(&client, &config, &messages, timeout, &tx).await;
        // Finish the caller's stream before touching the database.
        drop(tx);

        if let Some(conversation_id) = conversation_id {
            if !accumulated.is_empty() {
                // Freshly checked-out pool connection; the caller already has
                // its full response, so failure here is logged, not surfaced.
                if let Err(e) = store
                    .append_message(NewMessage {
                        conversation_id,
                        role: "assistant".into(),
                        content: accumulated,
                    })
                    .await
                {
                    warn!(conversation_id, error = %e, "failed to persist assistant reply");
                }
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

/// Drive the upstream connection to completion and return the accumulated
/// assistant text (possibly empty).
///
/// Terminal paths: `[DONE]` sentinel, upstream error status, transport
/// failure, or caller disconnect.  All of them return here with the
/// upstream response dropped, so the connection is released before the
/// caller persists anything.
async fn relay_upstream(
    client: &reqwest::Client,
    config: &ResolvedModelConfig,
    messages: &[OutboundMessage],
    timeout: Duration,
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
) -> String {
    let mut accumulated = String::new();

    let mut request = client
        .post(chat_completions_url(&config.base_url))
        .timeout(timeout)
        .json(&UpstreamRequest {
            model: &config.model_name,
            messages,
            stream: true,
        });
    if !config.api_key.is_empty() {
        request = request.bearer_auth(&config.api_key);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "upstream connection failed");
            let _ = tx
                .send(Ok(error_frame(&format!("upstream request failed: {e}"))))
                .await;
            return accumulated;
        }
    };

    let status = response.status();
    if !status.is_success() {
        // A single synthetic frame naming status and body; the relay never
        // enters the streaming state.
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "upstream returned error status");
        let _ = tx
            .send(Ok(error_frame(&format!(
                "upstream returned status {}: {}",
                status.as_u16(),
                body
            ))))
            .await;
        return accumulated;
    }

    let byte_stream = response
        .bytes_stream()
        .map(|r| r.map_err(std::io::Error::other));
    let mut lines = FramedRead::new(
        tokio_util::io::StreamReader::new(byte_stream),
        LinesCodec::new_with_max_length(MAX_LINE_BYTES),
    );

    while let Some(next) = lines.next().await {
        let line = match next {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "upstream stream failed mid-flight");
                let _ = tx
                    .send(Ok(error_frame(&format!("upstream stream failed: {e}"))))
                    .await;
                break;
            }
        };

        // Blank keep-alives, comments, and `event:`/`id:` lines carry no
        // data; skip them without forwarding.
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            continue;
        };

        // Forward before parsing; a send failure means the caller went away,
        // in which case reading further upstream data is pointless but the
        // accumulator so far is still persisted.
        if tx.send(Ok(data_frame(&line))).await.is_err() {
            debug!("caller disconnected; abandoning upstream stream");
            break;
        }

        if payload.trim() == DONE_SENTINEL {
            break;
        }

        if let Some(fragment) = delta_content(payload) {
            accumulated.push_str(&fragment);
        }
    }

    accumulated
}

// ── Tests ──────────────────────────────────────────────────────────────────────
