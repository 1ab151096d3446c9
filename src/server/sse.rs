use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use super::AppState;
use crate::push::{self, PushError, PushSink, WriteFailure};

/// Feeds the response stream of one SSE client.
struct EventSink {
    tx: mpsc::Sender<Event>,
}

#[async_trait]
impl PushSink for EventSink {
    async fn push(&mut self, payload: Bytes) -> Result<(), PushError> {
        let event = Event::default().data(String::from_utf8_lossy(&payload));
        self.tx
            .send(event)
            .await
            .map_err(|e| PushError(e.to_string()))
    }
}

/// Response body stream. Dropped by the server when the client goes away,
/// which cancels the connection's push loop.
struct EventStream {
    rx: mpsc::Receiver<Event>,
    _cancel_on_drop: DropGuard,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx).map(|event| event.map(Ok))
    }
}

/// `GET /sydneytrainsnearme.sse`: one `data:` frame with the current snapshot
/// every push interval until the client disconnects.
pub async fn vehicle_positions(State(state): State<AppState>) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel(1);
    let cancel = state.shutdown.child_token();
    let stream = EventStream {
        rx,
        _cancel_on_drop: cancel.clone().drop_guard(),
    };

    tokio::spawn(
        run(state, EventSink { tx }, cancel).instrument(tracing::info_span!("sse_connection")),
    );

    (
        [(CACHE_CONTROL, "no-cache"), (CONNECTION, "keep-alive")],
        Sse::new(stream),
    )
}

async fn run(state: AppState, mut sink: EventSink, cancel: CancellationToken) {
    push::serve(&state.cache, &mut sink, cancel, WriteFailure::Continue).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SnapshotCache;
    use crate::error::FeedError;
    use crate::fetch::FeedSource;
    use axum::http::header::CONTENT_TYPE;
    use axum::response::Response;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counted {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FeedSource for Counted {
        async fn fetch(&self) -> Result<Bytes, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::new())
        }
    }

    async fn open(state: AppState) -> Response {
        vehicle_positions(State(state)).await.into_response()
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_headers() {
        let source = Arc::new(Counted {
            calls: AtomicUsize::new(0),
        });
        let resp = open(AppState::new(SnapshotCache::new(source))).await;

        assert_eq!(resp.headers()[CONTENT_TYPE], "text/event-stream");
        assert_eq!(resp.headers()[CACHE_CONTROL], "no-cache");
        assert_eq!(resp.headers()[CONNECTION], "keep-alive");
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_arrive_as_data_events() {
        let source = Arc::new(Counted {
            calls: AtomicUsize::new(0),
        });
        let resp = open(AppState::new(SnapshotCache::new(source))).await;
        let mut body = resp.into_body().into_data_stream();

        let frame = body.next().await.unwrap().unwrap();
        assert_eq!(
            &frame[..],
            b"data: {\"type\":\"FeatureCollection\",\"features\":[]}\n\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_response_stops_upstream_reads() {
        let source = Arc::new(Counted {
            calls: AtomicUsize::new(0),
        });
        let resp = open(AppState::new(SnapshotCache::new(source.clone()))).await;
        let mut body = resp.into_body().into_data_stream();

        body.next().await.unwrap().unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        drop(body);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_stream() {
        let source = Arc::new(Counted {
            calls: AtomicUsize::new(0),
        });
        let state = AppState::new(SnapshotCache::new(source));
        let shutdown = state.shutdown.clone();
        let mut body = open(state).await.into_body().into_data_stream();

        shutdown.cancel();
        assert!(body.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_stream_of_client_that_stopped_reading() {
        let source = Arc::new(Counted {
            calls: AtomicUsize::new(0),
        });
        let state = AppState::new(SnapshotCache::new(source.clone()));
        let shutdown = state.shutdown.clone();
        let body = open(state).await.into_body().into_data_stream();

        // Nothing reads the body, so the channel fills and the push stalls.
        tokio::time::sleep(Duration::from_secs(20)).await;
        let reads = source.calls.load(Ordering::SeqCst);
        assert!(reads < 6);

        shutdown.cancel();
        let frames = tokio::time::timeout(Duration::from_secs(1), body.collect::<Vec<_>>())
            .await
            .expect("stream stayed open after shutdown");
        assert!(frames.len() <= reads);
    }
}
