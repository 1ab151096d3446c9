use std::fmt::Display;

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::header::{HOST, ORIGIN};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use super::AppState;
use crate::push::{self, PushError, PushSink, WriteFailure};

/// Sends each snapshot as one text message.
struct TextSink<S>(S);

#[async_trait]
impl<S> PushSink for TextSink<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    async fn push(&mut self, payload: Bytes) -> Result<(), PushError> {
        let text = String::from_utf8_lossy(&payload).into_owned();
        self.0
            .send(Message::Text(text))
            .await
            .map_err(|e| PushError(e.to_string()))
    }
}

/// Browser same-origin rule: no `Origin` header (non-browser client) passes;
/// otherwise the origin's authority must equal `Host`.
fn origin_matches_host(headers: &HeaderMap) -> bool {
    let Some(origin) = headers.get(ORIGIN).and_then(|v| v.to_str().ok()) else {
        return true;
    };
    let Some(host) = headers.get(HOST).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    origin
        .split_once("://")
        .map(|(_, authority)| authority.trim_end_matches('/'))
        .is_some_and(|authority| authority.eq_ignore_ascii_case(host))
}

/// `GET /sydneytrainsnearme.ws`: upgrades to a WebSocket and pushes the
/// current snapshot every push interval until the peer closes or a write fails.
pub async fn vehicle_positions(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    if !state.allow_any_origin && !origin_matches_host(&headers) {
        warn!(origin = ?headers.get(ORIGIN), "Rejected cross-origin WebSocket upgrade");
        return StatusCode::FORBIDDEN.into_response();
    }

    upgrade.on_upgrade(move |socket| {
        serve_socket(socket, state).instrument(tracing::info_span!("ws_connection"))
    })
}

async fn serve_socket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();
    let cancel = state.shutdown.child_token();
    run(&state, sender, receiver, cancel).await;
}

/// Drives one socket: a reader that cancels on close or read error, and the
/// push loop on the writer, which gives up on the first failed write.
async fn run<W, R, E>(state: &AppState, sender: W, receiver: R, cancel: CancellationToken)
where
    W: Sink<Message> + Unpin + Send,
    W::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let reader = tokio::spawn(watch_for_close(receiver, cancel.clone()));

    let mut sink = TextSink(sender);
    push::serve(&state.cache, &mut sink, cancel, WriteFailure::Close).await;

    reader.abort();
    // Best effort: the peer may already be gone.
    let _ = sink.0.send(Message::Close(None)).await;
}

async fn watch_for_close<R, E>(mut receiver: R, cancel: CancellationToken)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!("Client sent close frame");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "WebSocket read failed");
                break;
            }
        }
    }
    cancel.cancel();
}
