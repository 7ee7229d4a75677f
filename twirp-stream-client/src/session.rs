//! Per-request stream session state machine.
//!
//! A [`StreamSession`] owns everything one request needs between transport
//! callbacks: the lifecycle state, the carry-over buffer for partial
//! frames, and the codec. It performs no I/O itself; the caller feeds it
//! status, chunks, end-of-body, and transport failures, and it answers
//! with decoded events. This keeps the protocol logic synchronous and
//! directly testable.

use bytes::{Buf, BytesMut};
use http::StatusCode;
use twirp_stream_core::{
    FrameError, FrameKind, Trailer, TwirpError, classify_error_body, extract_frames,
    interpret_trailer,
};

use crate::codec::Codec;

/// Whether the response body is a frame stream or a single raw message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// The whole body is one encoded message, no framing.
    Unary,
    /// The body is a sequence of frames ending in a trailer.
    Streaming,
}

/// Session lifecycle states. Terminal states absorb all later callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Sending,
    Receiving,
    Completed,
    Failed,
    Cancelled,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Completed | State::Failed | State::Cancelled)
    }
}

/// What a session produced from one callback.
#[derive(Debug, PartialEq)]
pub enum SessionEvent<T> {
    /// One decoded application message.
    Message(T),
    /// Clean end of the request.
    Completed,
    /// The request failed; always the last event.
    Failed(TwirpError),
}

/// State machine for a single in-flight request.
pub struct StreamSession<C: Codec> {
    codec: C,
    mode: Mode,
    state: State,
    request_id: u64,
    /// Retained bytes of a frame split across chunks; in unary mode and
    /// on a non-success status, the accumulated body.
    leftover: BytesMut,
    /// Set when the response status was not 2xx; the body is then an
    /// error document regardless of mode.
    error_status: Option<StatusCode>,
    chunk_seq: u64,
}

impl<C: Codec> StreamSession<C> {
    pub fn new(codec: C, mode: Mode, request_id: u64) -> Self {
        Self {
            codec,
            mode,
            state: State::Idle,
            request_id,
            leftover: BytesMut::new(),
            error_status: None,
            chunk_seq: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Number of body chunks seen so far. Diagnostic only.
    pub fn chunk_seq(&self) -> u64 {
        self.chunk_seq
    }

    /// Mark the request as sent. Only meaningful from `Idle`.
    pub fn start(&mut self) {
        if self.state == State::Idle {
            tracing::debug!(request_id = self.request_id, "request started");
            self.state = State::Sending;
        }
    }

    /// Record the response status line.
    ///
    /// A non-success status switches the session into error-body mode:
    /// chunks are buffered verbatim and classified once the body ends.
    pub fn on_status(&mut self, status: StatusCode) {
        if self.state != State::Sending {
            return;
        }
        self.state = State::Receiving;
        if !status.is_success() {
            tracing::debug!(
                request_id = self.request_id,
                status = status.as_u16(),
                "non-success response status"
            );
            self.error_status = Some(status);
        }
    }

    /// Feed one body chunk; returns the events it produced.
    ///
    /// In streaming mode this runs frame extraction over the retained
    /// leftover plus the new bytes and decodes every complete message.
    /// A trailer, a structural frame error, or a decode failure produces
    /// a terminal event and releases the buffer; nothing after it in the
    /// returned vec.
    pub fn on_chunk(&mut self, chunk: &[u8]) -> Vec<SessionEvent<C::Response>> {
        if self.state != State::Receiving {
            return Vec::new();
        }
        self.chunk_seq += 1;
        tracing::trace!(
            request_id = self.request_id,
            chunk_seq = self.chunk_seq,
            len = chunk.len(),
            "body chunk"
        );

        if self.error_status.is_some() || self.mode == Mode::Unary {
            self.leftover.extend_from_slice(chunk);
            return Vec::new();
        }

        self.leftover.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            let extraction = match extract_frames(&self.leftover) {
                Ok(extraction) => extraction,
                Err(e) => {
                    let err = frame_error(e);
                    self.fail();
                    events.push(SessionEvent::Failed(err));
                    return events;
                }
            };

            if extraction.frames.is_empty() {
                if let Some(needed) = extraction.needed {
                    tracing::trace!(
                        request_id = self.request_id,
                        needed,
                        "partial frame retained"
                    );
                }
                self.leftover.advance(extraction.consumed);
                return events;
            }

            for frame in &extraction.frames {
                let payload = &self.leftover[frame.payload.clone()];
                match frame.kind {
                    FrameKind::Message => match self.codec.decode(payload) {
                        Ok(msg) => events.push(SessionEvent::Message(msg)),
                        Err(e) => {
                            self.fail();
                            events.push(SessionEvent::Failed(e));
                            return events;
                        }
                    },
                    FrameKind::Trailer => {
                        match interpret_trailer(payload) {
                            Trailer::Eof => {
                                self.complete();
                                events.push(SessionEvent::Completed);
                            }
                            Trailer::Error(e) => {
                                self.fail();
                                events.push(SessionEvent::Failed(e));
                            }
                        }
                        return events;
                    }
                }
            }

            self.leftover.advance(extraction.consumed);
            if self.leftover.is_empty() {
                return events;
            }
            // Bytes remain after draining complete frames: go around again
            // so a structural error sitting right behind them surfaces in
            // this same call, wherever the chunk boundary fell.
        }
    }

    /// The body ended. Resolves unary responses and error bodies; a
    /// streaming body that ends without a trailer is a transport fault.
    pub fn on_end(&mut self) -> Vec<SessionEvent<C::Response>> {
        if self.state.is_terminal() {
            return Vec::new();
        }

        if self.error_status.is_some() {
            let err = classify_error_body(&self.leftover);
            self.fail();
            return vec![SessionEvent::Failed(err)];
        }

        match self.mode {
            Mode::Unary => {
                if self.leftover.is_empty() {
                    self.fail();
                    return vec![SessionEvent::Failed(TwirpError::internal(
                        "received an empty response",
                    ))];
                }
                match self.codec.decode(&self.leftover) {
                    Ok(msg) => {
                        self.complete();
                        vec![SessionEvent::Message(msg), SessionEvent::Completed]
                    }
                    Err(e) => {
                        self.fail();
                        vec![SessionEvent::Failed(e)]
                    }
                }
            }
            Mode::Streaming => {
                // A well-behaved server always ends with a trailer frame.
                let err = if self.chunk_seq == 0 {
                    TwirpError::internal("received an empty response")
                } else {
                    TwirpError::internal("stream ended with incomplete message")
                };
                self.fail();
                vec![SessionEvent::Failed(err)]
            }
        }
    }

    /// The connection failed. Silent if the session is already terminal.
    pub fn on_transport_error(&mut self, err: TwirpError) -> Option<SessionEvent<C::Response>> {
        if self.state.is_terminal() {
            return None;
        }
        self.fail();
        Some(SessionEvent::Failed(err))
    }

    /// Cancel the request. Returns `false` when the session had already
    /// reached a terminal state; calling again is a no-op.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        tracing::debug!(request_id = self.request_id, "request cancelled");
        self.state = State::Cancelled;
        self.leftover = BytesMut::new();
        true
    }

    fn complete(&mut self) {
        tracing::debug!(
            request_id = self.request_id,
            chunks = self.chunk_seq,
            "request completed"
        );
        self.state = State::Completed;
        self.leftover = BytesMut::new();
    }

    fn fail(&mut self) {
        tracing::debug!(
            request_id = self.request_id,
            chunks = self.chunk_seq,
            "request failed"
        );
        self.state = State::Failed;
        self.leftover = BytesMut::new();
    }
}

fn frame_error(err: FrameError) -> TwirpError {
    match err {
        FrameError::UnknownTag { tag } => {
            TwirpError::internal("received an unexpected field tag")
                .with_meta("fieldTag", tag.to_string())
        }
        FrameError::VarintOverflow | FrameError::LengthOverflow { .. } => {
            TwirpError::internal("Unable to decode response").with_meta("cause", err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twirp_stream_core::{Code, MESSAGE_TAG, TRAILER_TAG, encode_frame};

    /// Payloads are UTF-8 strings; keeps wire bytes easy to build by hand.
    struct TextCodec;

    impl Codec for TextCodec {
        type Request = String;
        type Response = String;

        fn encode(&self, request: &String) -> Result<bytes::Bytes, TwirpError> {
            Ok(bytes::Bytes::from(request.clone()))
        }

        fn decode(&self, payload: &[u8]) -> Result<String, TwirpError> {
            std::str::from_utf8(payload)
                .map(str::to_owned)
                .map_err(|e| {
                    TwirpError::internal("Unable to decode response")
                        .with_meta("cause", e.to_string())
                })
        }
    }

    fn streaming_session() -> StreamSession<TextCodec> {
        let mut s = StreamSession::new(TextCodec, Mode::Streaming, 1);
        s.start();
        s.on_status(StatusCode::OK);
        s
    }

    fn message(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_frame(MESSAGE_TAG, payload, &mut out);
        out
    }

    fn trailer(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_frame(TRAILER_TAG, payload, &mut out);
        out
    }

    fn messages(events: &[SessionEvent<String>]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Message(m) => Some(m.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut s = StreamSession::new(TextCodec, Mode::Streaming, 7);
        assert_eq!(s.state(), State::Idle);
        s.start();
        assert_eq!(s.state(), State::Sending);
        s.on_status(StatusCode::OK);
        assert_eq!(s.state(), State::Receiving);
    }

    #[test]
    fn test_stream_messages_then_eof() {
        let mut s = streaming_session();
        let mut wire = message(b"a");
        wire.extend(message(b"b"));
        let events = s.on_chunk(&wire);
        assert_eq!(messages(&events), vec!["a", "b"]);
        assert_eq!(s.state(), State::Receiving);

        let events = s.on_chunk(&trailer(b"EOF"));
        assert_eq!(events, vec![SessionEvent::Completed]);
        assert_eq!(s.state(), State::Completed);
    }

    #[test]
    fn test_eof_with_no_messages() {
        let mut s = streaming_session();
        let events = s.on_chunk(&trailer(b"EOF"));
        assert_eq!(events, vec![SessionEvent::Completed]);
    }

    #[test]
    fn test_trailer_error_terminates() {
        let mut s = streaming_session();
        let mut wire = message(b"a");
        wire.extend(trailer(br#"{"msg":"boom","code":"aborted"}"#));
        // Bytes after the trailer must not be parsed.
        wire.extend(message(b"ignored"));
        let events = s.on_chunk(&wire);
        assert_eq!(events.len(), 2);
        assert_eq!(messages(&events), vec!["a"]);
        let SessionEvent::Failed(err) = &events[1] else {
            panic!("expected failure");
        };
        assert_eq!(err.code(), Code::Aborted);
        assert_eq!(s.state(), State::Failed);
    }

    #[test]
    fn test_chunk_boundary_independence() {
        // Same wire bytes, every possible split point: identical events.
        // The big payload forces a two-byte length varint so splits can
        // land inside it.
        let big = "X".repeat(300);
        let mut wire = message(b"hello");
        wire.extend(message(b""));
        wire.extend(message(big.as_bytes()));
        wire.extend(message(b"world"));
        wire.extend(trailer(b"EOF"));

        for split in 0..=wire.len() {
            let mut s = streaming_session();
            let mut got = Vec::new();
            got.extend(s.on_chunk(&wire[..split]));
            got.extend(s.on_chunk(&wire[split..]));
            assert_eq!(
                messages(&got),
                vec!["hello", "", big.as_str(), "world"],
                "split {split}"
            );
            assert_eq!(got.last(), Some(&SessionEvent::Completed), "split {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut wire = message(b"drip");
        wire.extend(trailer(b"EOF"));
        let mut s = streaming_session();
        let mut got = Vec::new();
        for &b in &wire {
            got.extend(s.on_chunk(&[b]));
        }
        assert_eq!(messages(&got), vec!["drip"]);
        assert_eq!(s.state(), State::Completed);
    }

    #[test]
    fn test_unknown_tag_fails_session() {
        let mut s = streaming_session();
        let mut wire = Vec::new();
        encode_frame((3 << 3) | 2, b"x", &mut wire);
        let events = s.on_chunk(&wire);
        let [SessionEvent::Failed(err)] = events.as_slice() else {
            panic!("expected failure");
        };
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(
            err.meta().get("fieldTag").map(String::as_str),
            Some("26")
        );
        assert_eq!(s.state(), State::Failed);
    }

    #[test]
    fn test_messages_before_bad_tag_are_delivered() {
        let mut s = streaming_session();
        let mut wire = message(b"ok");
        encode_frame((3 << 3) | 2, b"x", &mut wire);

        let events = s.on_chunk(&wire);
        assert_eq!(events.len(), 2);
        assert_eq!(messages(&events), vec!["ok"]);
        let SessionEvent::Failed(err) = &events[1] else {
            panic!("expected failure");
        };
        assert_eq!(err.meta().get("fieldTag").map(String::as_str), Some("26"));
        assert_eq!(s.state(), State::Failed);
    }

    #[test]
    fn test_bad_tag_boundary_independence() {
        // A good frame followed by a bad tag yields the same event
        // sequence no matter where the chunk boundary falls.
        let mut wire = message(b"ok");
        encode_frame((3 << 3) | 2, b"x", &mut wire);

        for split in 0..=wire.len() {
            let mut s = streaming_session();
            let mut got = s.on_chunk(&wire[..split]);
            got.extend(s.on_chunk(&wire[split..]));
            assert_eq!(got.len(), 2, "split {split}");
            assert_eq!(messages(&got), vec!["ok"], "split {split}");
            assert!(
                matches!(got.last(), Some(SessionEvent::Failed(_))),
                "split {split}"
            );
            assert_eq!(s.state(), State::Failed, "split {split}");
        }
    }

    #[test]
    fn test_decode_failure_fails_session() {
        let mut s = streaming_session();
        let events = s.on_chunk(&message(&[0xff, 0xfe]));
        let [SessionEvent::Failed(err)] = events.as_slice() else {
            panic!("expected failure");
        };
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(s.state(), State::Failed);
    }

    #[test]
    fn test_stream_end_without_trailer() {
        let mut s = streaming_session();
        let _ = s.on_chunk(&message(b"a"));
        let events = s.on_end();
        let [SessionEvent::Failed(err)] = events.as_slice() else {
            panic!("expected failure");
        };
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.message(), "stream ended with incomplete message");
    }

    #[test]
    fn test_stream_empty_body() {
        let mut s = streaming_session();
        let events = s.on_end();
        let [SessionEvent::Failed(err)] = events.as_slice() else {
            panic!("expected failure");
        };
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.message(), "received an empty response");
    }

    #[test]
    fn test_unary_success() {
        let mut s = StreamSession::new(TextCodec, Mode::Unary, 2);
        s.start();
        s.on_status(StatusCode::OK);
        assert!(s.on_chunk(b"hel").is_empty());
        assert!(s.on_chunk(b"lo").is_empty());
        let events = s.on_end();
        assert_eq!(
            events,
            vec![
                SessionEvent::Message("hello".to_owned()),
                SessionEvent::Completed,
            ]
        );
        assert_eq!(s.state(), State::Completed);
    }

    #[test]
    fn test_unary_empty_body() {
        let mut s = StreamSession::new(TextCodec, Mode::Unary, 3);
        s.start();
        s.on_status(StatusCode::OK);
        let events = s.on_end();
        let [SessionEvent::Failed(err)] = events.as_slice() else {
            panic!("expected failure");
        };
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.message(), "received an empty response");
    }

    #[test]
    fn test_error_status_streaming() {
        let mut s = streaming_session_with_status(StatusCode::NOT_FOUND);
        // Body is an error document, not frames.
        assert!(
            s.on_chunk(br#"{"msg":"nope","code":"not_found"}"#)
                .is_empty()
        );
        let events = s.on_end();
        let [SessionEvent::Failed(err)] = events.as_slice() else {
            panic!("expected failure");
        };
        assert_eq!(err.code(), Code::NotFound);
    }

    #[test]
    fn test_error_status_unparsable_body() {
        let mut s = streaming_session_with_status(StatusCode::BAD_GATEWAY);
        let _ = s.on_chunk(b"<html>oops</html>");
        let events = s.on_end();
        let [SessionEvent::Failed(err)] = events.as_slice() else {
            panic!("expected failure");
        };
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(
            err.meta().get("rawErr").map(String::as_str),
            Some("<html>oops</html>")
        );
    }

    #[test]
    fn test_error_status_unary() {
        let mut s = StreamSession::new(TextCodec, Mode::Unary, 4);
        s.start();
        s.on_status(StatusCode::INTERNAL_SERVER_ERROR);
        let _ = s.on_chunk(br#"{"msg":"broke","code":"internal"}"#);
        let events = s.on_end();
        let [SessionEvent::Failed(err)] = events.as_slice() else {
            panic!("expected failure");
        };
        assert_eq!(err.message(), "broke");
    }

    #[test]
    fn test_transport_error_mid_stream() {
        let mut s = streaming_session();
        let _ = s.on_chunk(&message(b"a"));
        let ev = s.on_transport_error(TwirpError::transport("connection reset"));
        let Some(SessionEvent::Failed(err)) = ev else {
            panic!("expected failure");
        };
        assert_eq!(err.code(), Code::Transport);
        assert_eq!(s.state(), State::Failed);
    }

    #[test]
    fn test_terminal_absorbs_late_callbacks() {
        let mut s = streaming_session();
        let _ = s.on_chunk(&trailer(b"EOF"));
        assert_eq!(s.state(), State::Completed);

        assert!(s.on_chunk(&message(b"late")).is_empty());
        assert!(s.on_end().is_empty());
        assert!(
            s.on_transport_error(TwirpError::transport("late"))
                .is_none()
        );
        assert_eq!(s.state(), State::Completed);
    }

    #[test]
    fn test_cancel_idempotent() {
        let mut s = streaming_session();
        assert!(s.cancel());
        assert_eq!(s.state(), State::Cancelled);
        assert!(!s.cancel());
        assert_eq!(s.state(), State::Cancelled);
    }

    #[test]
    fn test_cancel_after_completed_is_noop() {
        let mut s = streaming_session();
        let _ = s.on_chunk(&trailer(b"EOF"));
        assert!(!s.cancel());
        assert_eq!(s.state(), State::Completed);
    }

    #[test]
    fn test_chunk_seq_counts() {
        let mut s = streaming_session();
        let _ = s.on_chunk(&message(b"a"));
        let _ = s.on_chunk(&message(b"b"));
        assert_eq!(s.chunk_seq(), 2);
    }

    fn streaming_session_with_status(status: StatusCode) -> StreamSession<TextCodec> {
        let mut s = StreamSession::new(TextCodec, Mode::Streaming, 9);
        s.start();
        s.on_status(status);
        s
    }
}
