//! Consumer-facing stream handle.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{Notify, mpsc};
use twirp_stream_core::TwirpError;

/// Handle to an in-flight server stream.
///
/// Yields `Ok` per server message. A failure is delivered as exactly one
/// `Err` item and then the stream ends; a clean completion or a cancel
/// just ends the stream. Dropping the handle cancels the request.
pub struct Streaming<T> {
    rx: mpsc::Receiver<Result<T, TwirpError>>,
    cancel: Arc<Notify>,
}

impl<T> Streaming<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Result<T, TwirpError>>, cancel: Arc<Notify>) -> Self {
        Self { rx, cancel }
    }

    /// Cancel the request. Idempotent; a no-op once the stream has
    /// already reached a terminal state.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }
}

impl<T> Stream for Streaming<T> {
    type Item = Result<T, TwirpError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for Streaming<T> {
    fn drop(&mut self) {
        self.cancel.notify_one();
    }
}

impl<T> std::fmt::Debug for Streaming<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Streaming")
    }
}
