//! Server-Sent Events framing for the streaming chat endpoint.
//!
//! Wraps a stream of [`GateBytes`] items and formats each as one
//! `data: <payload>\n\n` frame per the EventSource specification, with the
//! headers the OpenAI-compatible streaming contract expects. The terminal
//! `[DONE]` sentinel is an ordinary item produced by the streaming proxy, so
//! frame ordering is exactly the order the proxy emitted.
//!
//! # Examples
//!
//! ```rust
//! use modelgate::sse::Sse;
//! use modelgate::bytes::GateBytes;
//! use tokio_stream::iter;
//!
//! let frames = iter(vec![
//!     GateBytes::from("{\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}".to_string()),
//!     GateBytes::from("[DONE]"),
//! ]);
//! let sse = Sse::new(frames);
//! ```

use std::convert::Infallible;

use bytes::{Bytes, BytesMut};
use http::{StatusCode, header};
use http_body_util::StreamBody;
use tokio_stream::{Stream, StreamExt};

use crate::{body::GateBody, bytes::GateBytes, responder::Responder, types::Response};

/// SSE data line prefix according to the EventSource specification.
const PREFIX: &[u8] = b"data: ";

/// SSE event terminator sequence.
const SUFFIX: &[u8] = b"\n\n";

const fn ps_len() -> usize {
    PREFIX.len() + SUFFIX.len()
}

/// Encodes one payload into a complete SSE frame.
pub fn frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(ps_len() + payload.len());
    buf.extend_from_slice(PREFIX);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(SUFFIX);
    buf.freeze()
}

/// Server-Sent Events stream wrapper.
pub struct Sse<S>
where
    S: Stream<Item = GateBytes> + Send + 'static,
{
    /// The underlying stream of payloads to be sent as SSE events.
    pub stream: S,
}

impl<S> Sse<S>
where
    S: Stream<Item = GateBytes> + Send + 'static,
{
    /// Creates a new SSE wrapper around the provided stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S> Responder for Sse<S>
where
    S: Stream<Item = GateBytes> + Send + 'static,
{
    /// Converts the SSE stream into an HTTP response with proper headers.
    fn into_response(self) -> Response {
        let stream = self.stream.map(|GateBytes(msg)| {
            Ok::<_, Infallible>(hyper::body::Frame::data(frame(&msg)))
        });

        hyper::Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(GateBody::new(StreamBody::new(stream)))
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_prefix_payload_suffix() {
        let f = frame(b"{\"x\":1}");
        assert_eq!(&f[..], b"data: {\"x\":1}\n\n");
    }

    #[test]
    fn done_sentinel_frames_correctly() {
        let f = frame(b"[DONE]");
        assert_eq!(&f[..], b"data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn response_has_event_stream_headers() {
        let sse = Sse::new(tokio_stream::iter(vec![GateBytes::from("[DONE]")]));
        let res = sse.into_response();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert_eq!(res.headers().get("cache-control").unwrap(), "no-cache");
    }
}
