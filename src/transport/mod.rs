//! The duplex link a channel runs over.
//!
//! The channel does not frame, serialize, or connect anything itself. It
//! consumes a [`Transport`]'s capability to deliver decoded packets and to
//! signal errors and disconnection, and hands it packets to deliver to the
//! peer. Implement [`Transport`] over whatever duplex medium you have; the
//! [`loopback`] module provides an in-memory reference implementation.

pub mod loopback;

use futures::Stream;

use crate::error::TransportError;
use crate::packet::Packet;

/// One signal from the transport to its channel.
#[derive(Debug)]
pub enum TransportEvent {
    /// A packet arrived from the peer, decoded and intact.
    Packet(Packet),
    /// The transport failed. Fatal to the channel: every pending call is
    /// rejected with this error and the channel tears down without draining.
    Error(TransportError),
    /// The peer end went away. Fatal to the channel, like [`Error`]
    /// but rejecting pending work with a channel-closed reason.
    ///
    /// [`Error`]: TransportEvent::Error
    Disconnect,
}

/// Capability contract of the duplex link under a channel.
///
/// The stream side delivers the three signals in the order the transport
/// observes them; the channel driver consumes the stream for the life of the
/// channel and drops the transport when it is destroyed, which is also the
/// unsubscription. A transport whose stream ends without an explicit
/// [`TransportEvent::Disconnect`] is treated as disconnected.
///
/// Messages are assumed reliable, ordered, and exactly-once. A transport is
/// owned by exactly one channel.
pub trait Transport: Stream<Item = TransportEvent> + Send + Unpin + 'static {
    /// Queue a packet for delivery to the peer.
    fn send(&mut self, packet: Packet) -> Result<(), TransportError>;
}
