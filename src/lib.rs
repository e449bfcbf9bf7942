//! Bidirectional RPC and event notification over a duplex message transport.
//!
//! Either endpoint of a [`Channel`] may fire fire-and-forget named events at
//! the peer, register named local procedures, invoke the peer's registered
//! procedures and await a typed result or propagated error, and close the
//! channel gracefully, draining in-flight work before severing.
//!
//! The transport is an external collaborator: anything that can deliver
//! decoded [`Packet`]s, signal errors and disconnection, and accept packets
//! for delivery. Implement [`transport::Transport`] over your medium, or use
//! [`transport::loopback`] to link two channels in-process:
//!
//! ```
//! use duplex_rpc::{Channel, transport::loopback};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> duplex_rpc::Result<()> {
//! let (left, right) = loopback::pair();
//! let a = Channel::spawn(left);
//! let b = Channel::spawn(right);
//!
//! b.register_function("double", |args| async move {
//!     let x = args[0].as_i64().unwrap_or_default();
//!     Ok(json!(x * 2))
//! })
//! .await?;
//!
//! assert_eq!(a.call("double", vec![json!(21)]).await?, json!(42));
//! a.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! There is no retransmission, timeout, flow control, multiplexing, or
//! authentication here: the transport is assumed reliable, ordered, and
//! exactly-once, and a lost link always surfaces as a disconnect signal.
//! Add timeouts or cancellation as a layer above `call` if you need them.

mod channel;
mod error;
mod packet;
pub mod transport;

pub use channel::{Channel, ChannelDriver, ChannelState, EventWaiter, HandlerResult, RemoteFunction};
pub use error::{
    Error, RemoteError, Result, TransportError, CODE_CHANNEL_CLOSED, CODE_UNDEFINED_FUNCTION,
};
pub use packet::{CorrelationId, Packet};

pub use serde_json::Value;
