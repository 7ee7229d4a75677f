//! Streaming Twirp RPC client over chunked HTTP.
//!
//! Requests are plain protobuf POSTs; streaming responses arrive as a
//! sequence of length-delimited frames ending in a trailer (the `EOF`
//! sentinel or a JSON error). This crate layers a per-request state
//! machine and a backpressured body pump on top of a hyper transport.
//!
//! ## Modules
//!
//! - [`client`]: [`TwirpClient`] with unary and server-streaming calls
//! - [`builder`]: [`ClientBuilder`] configuration
//! - [`codec`]: the message codec seam and [`ProstCodec`]
//! - [`session`]: the per-request state machine
//! - [`response`]: the consumer-facing [`Streaming`] handle
//! - [`transport`]: hyper-based HTTP transport
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use twirp_stream_client::{ProstCodec, TwirpClient};
//!
//! let client = TwirpClient::builder("https://api.example.com").build()?;
//! let mut stream = client
//!     .call_server_stream(
//!         "/twirp/example.Feed/Watch",
//!         ProstCodec::<WatchRequest, WatchEvent>::new(),
//!         &request,
//!     )
//!     .await?;
//! while let Some(event) = stream.next().await {
//!     println!("{:?}", event?);
//! }
//! ```

pub mod builder;
pub mod client;
pub mod codec;
mod pump;
pub mod response;
pub mod session;
pub mod transport;

pub use builder::ClientBuilder;
pub use client::TwirpClient;
pub use codec::{Codec, ProstCodec};
pub use response::Streaming;
pub use session::{Mode, SessionEvent, State, StreamSession};
pub use transport::{HttpTransport, HttpTransportBuilder, TransportBody};

// Re-export the wire-level types consumers interact with.
pub use twirp_stream_core::{Code, TwirpError};
