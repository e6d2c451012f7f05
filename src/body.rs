//! HTTP response body handling for buffered and streaming payloads.
//!
//! This module provides [`GateBody`], a boxed wrapper over HTTP body
//! implementations. Most gateway responses are small buffered JSON documents,
//! but chat completions with `stream: true` produce a live frame stream that
//! must be flushed delta-by-delta; `GateBody` covers both through the same
//! type so the router and middleware never care which one they carry.
//!
//! # Examples
//!
//! ```rust
//! use modelgate::body::GateBody;
//! use bytes::Bytes;
//! use futures_util::stream;
//!
//! let buffered = GateBody::from("{\"object\":\"chat.completion\"}");
//! let empty = GateBody::empty();
//! let streaming = GateBody::from_stream(stream::iter(vec![
//!     Ok::<_, std::convert::Infallible>(Bytes::from_static(b"data: {}\n\n")),
//! ]));
//! ```

use std::{
    fmt::Debug,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_util::{Stream, TryStream, TryStreamExt};
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Body, Frame, SizeHint};

use crate::types::{BoxBody, BoxError};

/// Boxed HTTP body with buffered and streaming constructors.
pub struct GateBody(BoxBody);

impl GateBody {
    /// Creates a new body from any type implementing the `Body` trait.
    pub fn new<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(|e| e.into()).boxed_unsync())
    }

    /// Creates a body from a stream of byte results.
    ///
    /// Each stream item becomes one data frame; Hyper flushes frames as they
    /// arrive, which is what gives SSE its per-delta latency.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + Debug + 'static,
    {
        let stream = stream.map_err(Into::into).map_ok(Frame::data);
        Self(StreamBody::new(stream).boxed_unsync())
    }

    /// Creates a body from a stream of HTTP frames.
    pub fn from_try_stream<S, E>(stream: S) -> Self
    where
        S: TryStream<Ok = Frame<Bytes>, Error = E> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self(StreamBody::new(stream.map_err(Into::into)).boxed_unsync())
    }

    /// Creates an empty body with no content.
    pub fn empty() -> Self {
        Self::new(Empty::new())
    }
}

impl Default for GateBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<()> for GateBody {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl From<&str> for GateBody {
    fn from(buf: &str) -> Self {
        let owned = buf.to_owned();
        Self::new(http_body_util::Full::from(owned))
    }
}

macro_rules! body_from_impl {
    ($ty:ty) => {
        impl From<$ty> for GateBody {
            fn from(buf: $ty) -> Self {
                Self::new(http_body_util::Full::from(buf))
            }
        }
    };
}

body_from_impl!(String);
body_from_impl!(Vec<u8>);
body_from_impl!(Bytes);

impl Body for GateBody {
    type Data = Bytes;
    type Error = BoxError;

    #[inline]
    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    #[inline]
    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }

    #[inline]
    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }
}
