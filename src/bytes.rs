//! Byte buffer wrapper used by the SSE encoder.
//!
//! [`GateBytes`] wraps `Bytes` so that stream combinators feeding the SSE
//! encoder have a single item type regardless of whether a frame originated
//! as a `String` (serialized chunk JSON) or as raw bytes (the `[DONE]`
//! sentinel). Conversions are zero-copy where the source allows it.

use bytes::Bytes;

/// Byte buffer wrapper with conversions from the types SSE frames are built from.
pub struct GateBytes(pub Bytes);

impl From<Bytes> for GateBytes {
    fn from(b: Bytes) -> Self {
        GateBytes(b)
    }
}

impl From<String> for GateBytes {
    fn from(s: String) -> Self {
        GateBytes(Bytes::from(s))
    }
}

impl From<&'static str> for GateBytes {
    fn from(s: &'static str) -> Self {
        GateBytes(Bytes::from_static(s.as_bytes()))
    }
}
