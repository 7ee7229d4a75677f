//! Body pump: drives a response body through a session.
//!
//! The pump owns the HTTP body, the session, and the sending half of a
//! bounded event channel. It never polls the body for another chunk until
//! every event from the previous chunk has been accepted by the channel,
//! so a slow consumer stalls the TCP stream instead of growing a queue.
//! Memory stays bounded at one chunk plus at most one partial frame.
//!
//! Cancellation is raced at every await point. On cancel the pump marks
//! the session cancelled and drops the body, which aborts the exchange.

use std::sync::Arc;

use bytes::Bytes;
use http_body::Body;
use http_body_util::BodyExt;
use tokio::sync::{Notify, mpsc};
use twirp_stream_core::TwirpError;

use crate::codec::Codec;
use crate::session::{SessionEvent, StreamSession};

/// Run the session to a terminal state. Consumes the body and the sender;
/// dropping the sender on return is what ends the consumer's stream.
pub(crate) async fn drive<C, B>(
    mut session: StreamSession<C>,
    mut body: B,
    tx: mpsc::Sender<Result<C::Response, TwirpError>>,
    cancel: Arc<Notify>,
) where
    C: Codec,
    B: Body<Data = Bytes> + Send + Unpin,
    B::Error: std::fmt::Display,
{
    loop {
        let events = tokio::select! {
            biased;
            _ = cancel.notified() => {
                session.cancel();
                return;
            }
            frame = body.frame() => match frame {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => session.on_chunk(&data),
                    // HTTP trailers carry nothing in this protocol.
                    Err(_) => Vec::new(),
                },
                Some(Err(e)) => {
                    let err = TwirpError::transport(format!("response body failed: {e}"));
                    session.on_transport_error(err).into_iter().collect()
                }
                None => session.on_end(),
            },
        };

        for event in events {
            match event {
                SessionEvent::Message(msg) => {
                    // The send is the backpressure point; stay cancellable
                    // while the channel is full.
                    let delivered = tokio::select! {
                        biased;
                        _ = cancel.notified() => false,
                        sent = tx.send(Ok(msg)) => sent.is_ok(),
                    };
                    if !delivered {
                        session.cancel();
                        return;
                    }
                }
                SessionEvent::Completed => return,
                SessionEvent::Failed(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }

        if session.state().is_terminal() {
            return;
        }
    }
}
