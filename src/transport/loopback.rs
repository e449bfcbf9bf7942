//! In-memory transport pair, for wiring two channels back to back inside one
//! process. Also the transport the integration tests run over.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::packet::Packet;
use crate::transport::{Transport, TransportEvent};

/// Create two linked transports. A packet sent on one is delivered on the
/// other, in order. Dropping either endpoint delivers a single
/// [`TransportEvent::Disconnect`] to its peer.
pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
    let (to_first, from_second) = mpsc::unbounded_channel();
    let (to_second, from_first) = mpsc::unbounded_channel();
    let first_control = to_first.downgrade();
    let second_control = to_second.downgrade();
    let first = LoopbackTransport {
        control: first_control,
        outbound: to_second,
        inbound: from_second,
        disconnected: false,
    };
    let second = LoopbackTransport {
        control: second_control,
        outbound: to_first,
        inbound: from_first,
        disconnected: false,
    };
    (first, second)
}

/// One endpoint of an in-memory duplex link.
#[derive(Debug)]
pub struct LoopbackTransport {
    control: mpsc::WeakUnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedSender<TransportEvent>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    disconnected: bool,
}

impl LoopbackTransport {
    /// A handle that injects signals into this endpoint the way the real
    /// medium would. Weak: it does not keep the link alive, so dropping the
    /// peer still disconnects this endpoint.
    pub fn control(&self) -> LoopbackControl {
        LoopbackControl {
            sender: self.control.clone(),
        }
    }
}

impl Stream for LoopbackTransport {
    type Item = TransportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.disconnected {
            return Poll::Ready(None);
        }
        match self.inbound.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(event)),
            Poll::Ready(None) => {
                // Peer endpoint dropped. Surface it once, then end the stream.
                self.disconnected = true;
                Poll::Ready(Some(TransportEvent::Disconnect))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        self.outbound
            .send(TransportEvent::Packet(packet))
            .map_err(|_| TransportError::Closed)
    }
}

/// Injects error and disconnect signals into one loopback endpoint.
#[derive(Debug, Clone)]
pub struct LoopbackControl {
    sender: mpsc::WeakUnboundedSender<TransportEvent>,
}

impl LoopbackControl {
    /// Signal a transport failure to the endpoint.
    pub fn raise_error(&self, error: TransportError) {
        if let Some(sender) = self.sender.upgrade() {
            let _ = sender.send(TransportEvent::Error(error));
        }
    }

    /// Signal a disconnect to the endpoint.
    pub fn disconnect(&self) {
        if let Some(sender) = self.sender.upgrade() {
            let _ = sender.send(TransportEvent::Disconnect);
        }
    }
}
