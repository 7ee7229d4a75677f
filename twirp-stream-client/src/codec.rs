//! Application message codec seam.
//!
//! The stream and session layers treat payloads as opaque bytes; a
//! [`Codec`] turns request values into wire bytes and message frame
//! payloads back into response values. [`ProstCodec`] covers the normal
//! protobuf case; custom codecs plug in the same way.

use std::marker::PhantomData;

use bytes::Bytes;
use twirp_stream_core::TwirpError;

/// Encodes requests and decodes responses for one RPC method.
pub trait Codec: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    /// Encode a request message into its wire bytes.
    fn encode(&self, request: &Self::Request) -> Result<Bytes, TwirpError>;

    /// Decode one message frame payload into a response value.
    ///
    /// A failure here fails the whole stream session, so implementations
    /// should return an `internal` error with a useful `meta.cause`.
    fn decode(&self, payload: &[u8]) -> Result<Self::Response, TwirpError>;

    /// Check a request before anything is sent.
    ///
    /// `Err` carries the human-readable cause; the client wraps it into an
    /// `invalid_argument` error with `meta.cause` and never touches the
    /// transport. The default accepts everything.
    fn validate(&self, _request: &Self::Request) -> Result<(), String> {
        Ok(())
    }
}

/// Protobuf codec over `prost::Message` types.
pub struct ProstCodec<Req, Res> {
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> ProstCodec<Req, Res> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Req, Res> Default for ProstCodec<Req, Res> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Res> Clone for ProstCodec<Req, Res> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<Req, Res> std::fmt::Debug for ProstCodec<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProstCodec")
    }
}

impl<Req, Res> Codec for ProstCodec<Req, Res>
where
    Req: prost::Message + Send + Sync + 'static,
    Res: prost::Message + Default + Send + 'static,
{
    type Request = Req;
    type Response = Res;

    fn encode(&self, request: &Req) -> Result<Bytes, TwirpError> {
        Ok(Bytes::from(request.encode_to_vec()))
    }

    fn decode(&self, payload: &[u8]) -> Result<Res, TwirpError> {
        Res::decode(payload).map_err(|e| {
            TwirpError::internal("Unable to decode response").with_meta("cause", e.to_string())
        })
    }
}
