//! The Twirp client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use http_body_util::BodyExt;
use tokio::sync::{Notify, mpsc};
use twirp_stream_core::TwirpError;

use crate::builder::ClientBuilder;
use crate::codec::Codec;
use crate::pump;
use crate::response::Streaming;
use crate::session::{Mode, SessionEvent, StreamSession};
use crate::transport::{HttpTransport, TransportBody};

/// Client for a single Twirp service endpoint.
///
/// One client drives at most one request at a time; starting a second
/// while the first is in flight fails fast with `unavailable` before any
/// transport work. The underlying transport is cheap to clone, so callers
/// that need concurrency create one client per concurrent request.
pub struct TwirpClient {
    transport: HttpTransport,
    base_url: String,
    next_request_id: AtomicU64,
    busy: Arc<AtomicBool>,
    stream_buffer: usize,
}

impl std::fmt::Debug for TwirpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwirpClient")
            .field("base_url", &self.base_url)
            .field("busy", &self.busy.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TwirpClient {
    /// Start building a client for the given base URL.
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub(crate) fn new(
        transport: HttpTransport,
        base_url: String,
        stream_buffer: usize,
    ) -> Self {
        Self {
            transport,
            base_url,
            next_request_id: AtomicU64::new(1),
            busy: Arc::new(AtomicBool::new(false)),
            stream_buffer,
        }
    }

    /// Call a unary method: one request message, one response message.
    ///
    /// The whole response body is the encoded message; there is no
    /// framing. A non-success status resolves to the error document in
    /// the body.
    pub async fn call_unary<C: Codec>(
        &self,
        path: &str,
        codec: C,
        request: &C::Request,
    ) -> Result<C::Response, TwirpError> {
        let _busy = self.acquire()?;
        let payload = self.prepare(&codec, request)?;
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(request_id, path, "unary call");

        let mut session = StreamSession::new(codec, Mode::Unary, request_id);
        session.start();

        let http_request = self.build_request(path, payload)?;
        let response = self.transport.request(http_request).await?;
        session.on_status(response.status());

        let mut body = response.into_body();
        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        let _ = session.on_chunk(&data);
                    }
                }
                Some(Err(e)) => {
                    let err = TwirpError::transport(format!("response body failed: {e}"));
                    let _ = session.on_transport_error(err.clone());
                    return Err(err);
                }
                None => break,
            }
        }

        let mut events = session.on_end().into_iter();
        match events.next() {
            Some(SessionEvent::Message(msg)) => Ok(msg),
            Some(SessionEvent::Failed(err)) => Err(err),
            _ => Err(TwirpError::internal("received an empty response")),
        }
    }

    /// Call a server-streaming method.
    ///
    /// Returns as soon as the response headers arrive; messages are
    /// consumed through the [`Streaming`] handle. The body is read one
    /// chunk at a time, gated on the consumer keeping up.
    pub async fn call_server_stream<C: Codec>(
        &self,
        path: &str,
        codec: C,
        request: &C::Request,
    ) -> Result<Streaming<C::Response>, TwirpError> {
        let busy = self.acquire()?;
        let payload = self.prepare(&codec, request)?;
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(request_id, path, "server stream call");

        let mut session = StreamSession::new(codec, Mode::Streaming, request_id);
        session.start();

        let http_request = self.build_request(path, payload)?;
        let response = self.transport.request(http_request).await?;
        session.on_status(response.status());

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let cancel = Arc::new(Notify::new());
        let body = response.into_body();
        let pump_cancel = cancel.clone();
        tokio::spawn(async move {
            let _busy = busy;
            pump::drive(session, body, tx, pump_cancel).await;
        });

        Ok(Streaming::new(rx, cancel))
    }

    fn acquire(&self) -> Result<BusyGuard, TwirpError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TwirpError::unavailable(
                "another request is already in flight",
            ));
        }
        Ok(BusyGuard {
            flag: self.busy.clone(),
        })
    }

    /// Validate and encode a request; nothing has touched the wire yet.
    fn prepare<C: Codec>(&self, codec: &C, request: &C::Request) -> Result<Bytes, TwirpError> {
        codec.validate(request).map_err(|cause| {
            TwirpError::invalid_argument("invalid request message").with_meta("cause", cause)
        })?;
        codec.encode(request)
    }

    fn build_request(
        &self,
        path: &str,
        payload: Bytes,
    ) -> Result<http::Request<TransportBody>, TwirpError> {
        http::Request::post(join_url(&self.base_url, path))
            .header(http::header::CONTENT_TYPE, "application/protobuf")
            .body(TransportBody::full(payload))
            .map_err(|e| {
                TwirpError::internal("failed to build request").with_meta("cause", e.to_string())
            })
    }
}

/// Releases the client's one-request slot when the request finishes,
/// whichever task ends up owning it.
#[derive(Debug)]
pub(crate) struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
