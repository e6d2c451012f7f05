//! Streaming proxy: upstream chunks to client SSE frames.
//!
//! Translates the dispatcher's [`UpstreamChunk`] sequence into the
//! OpenAI-shaped chunk frames clients expect, with the `[DONE]` sentinel
//! after the final content chunk and an error frame (then `[DONE]`) on
//! mid-stream failure. Every delta is flushed as its own frame; the only
//! batching anywhere in the path is the bounded channels, never a timer.
//!
//! Cancellation: the response body carries a drop guard on the request's
//! cancellation token. The moment the client connection goes away, hyper
//! drops the body, the guard cancels the token, and the upstream pump stops
//! consuming bytes and returns its connection to the pool.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::{
    bytes::GateBytes,
    chat::{Role, chunk_json, epoch_secs, error_chunk_json},
    responder::Responder,
    sse::Sse,
    types::Response,
    upstream::chunk::UpstreamChunk,
};

/// Identity of one streaming session, echoed in every chunk.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub id: String,
    pub created: u64,
    pub model: String,
}

impl StreamSession {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            created: epoch_secs(),
            model: model.to_string(),
        }
    }
}

/// Stream wrapper that cancels the request token when dropped.
struct GuardedStream<S> {
    inner: S,
    _guard: DropGuard,
}

impl<S> Stream for GuardedStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Builds the client-facing SSE response for a streaming dispatch.
pub fn streaming_response(
    session: StreamSession,
    chunks: mpsc::Receiver<UpstreamChunk>,
    cancel: CancellationToken,
) -> Response {
    let (frames_tx, frames_rx) = mpsc::channel::<GateBytes>(1);
    tokio::spawn(translate(session, chunks, frames_tx));

    let stream = GuardedStream {
        inner: ReceiverStream::new(frames_rx),
        _guard: cancel.drop_guard(),
    };
    Sse::new(stream).into_response()
}

/// Translates upstream chunks into client frames, one frame per delta.
async fn translate(
    session: StreamSession,
    mut chunks: mpsc::Receiver<UpstreamChunk>,
    frames: mpsc::Sender<GateBytes>,
) {
    let mut first = true;

    while let Some(chunk) = chunks.recv().await {
        match chunk {
            UpstreamChunk::DeltaContent(text) => {
                let role = if first { Some(Role::Assistant) } else { None };
                first = false;
                let frame = chunk_json(
                    &session.id,
                    session.created,
                    &session.model,
                    role,
                    Some(&text),
                    None,
                );
                if frames.send(GateBytes::from(frame)).await.is_err() {
                    return;
                }
            }
            UpstreamChunk::DeltaToolCall(_) => {
                // Tool-call deltas have no surface on this endpoint; the
                // terminal chunk still carries the finish reason.
            }
            UpstreamChunk::Keepalive => {}
            UpstreamChunk::Finish(reason) => {
                let frame = chunk_json(
                    &session.id,
                    session.created,
                    &session.model,
                    None,
                    None,
                    Some(reason.as_deref().unwrap_or("stop")),
                );
                if frames.send(GateBytes::from(frame)).await.is_err() {
                    return;
                }
                let _ = frames.send(GateBytes::from("[DONE]")).await;
                return;
            }
            UpstreamChunk::Error { code, message } => {
                let frame = error_chunk_json(&code, &message);
                if frames.send(GateBytes::from(frame)).await.is_err() {
                    return;
                }
                let _ = frames.send(GateBytes::from("[DONE]")).await;
                return;
            }
        }
    }

    // Upstream channel closed without a terminal chunk (cancellation tears it
    // down this way); close the client stream if anyone is still listening.
    let _ = frames.send(GateBytes::from("[DONE]")).await;
}
