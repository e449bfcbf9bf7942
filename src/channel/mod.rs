//! One endpoint of the protocol.
//!
//! [`Channel`] is the clonable handle; [`ChannelDriver`] is the task that
//! owns the transport and every internal table. The split mirrors a
//! client/reactor pair, except both directions live in one driver because
//! either peer may call the other.

mod correlation;
mod driver;
mod event_bus;
mod registry;

pub use driver::ChannelDriver;
pub use registry::HandlerResult;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::channel::driver::Command;
use crate::channel::event_bus::{EventBus, Waiter};
use crate::channel::registry::BoxedHandler;
use crate::error::Error;
use crate::transport::Transport;

/// Lifecycle of a channel. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Accepting calls, emits, and inbound work.
    Open,
    /// `close()` was invoked; draining work that was already in flight.
    /// New `emit`/`call` fail and inbound calls bounce.
    Closing,
    /// Destroyed. The transport handle is released; nothing is sent or
    /// received again.
    Closed,
}

impl ChannelState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub(crate) fn as_u8(&self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Closing => 1,
            Self::Closed => 2,
        }
    }
}

/// One endpoint of a bidirectional rpc/event channel.
///
/// Cheap to clone; every clone talks to the same driver. Fire events with
/// [`emit`](Channel::emit), expose procedures with
/// [`register_function`](Channel::register_function), invoke the peer's with
/// [`call`](Channel::call), and shut down with [`close`](Channel::close) or
/// [`destroy`](Channel::destroy).
#[derive(Clone)]
pub struct Channel {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<AtomicU8>,
    bus: Arc<Mutex<EventBus>>,
}

impl Channel {
    /// Bind a channel to a transport. The returned driver must be spawned
    /// (or otherwise polled to completion) for the channel to do anything.
    pub fn new<T: Transport>(transport: T) -> (Self, ChannelDriver<T>) {
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(ChannelState::Open.as_u8()));
        let bus = Arc::new(Mutex::new(EventBus::default()));
        let driver = ChannelDriver::new(transport, command_receiver, state.clone(), bus.clone());
        (Self { commands, state, bus }, driver)
    }

    /// Bind a channel to a transport and spawn its driver onto the current
    /// Tokio runtime. Must be called from within a runtime.
    pub fn spawn<T: Transport>(transport: T) -> Self {
        let (channel, driver) = Self::new(transport);
        tokio::spawn(driver.run());
        channel
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Fire a named event at the peer. Fire-and-forget: local subscribers
    /// are not invoked, and no acknowledgement comes back. Fails with
    /// [`Error::ChannelClosed`] once closing has begun.
    pub async fn emit(&self, event: impl Into<String>, args: Vec<Value>) -> crate::Result<()> {
        let (reply, outcome) = oneshot::channel();
        self.submit(Command::Emit {
            event: event.into(),
            args,
            reply,
        })?;
        outcome.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Sugar for `emit("message", [message])`.
    pub async fn send(&self, message: Value) -> crate::Result<()> {
        self.emit("message", vec![message]).await
    }

    /// Wait for the next occurrence of a named event.
    ///
    /// The subscription is registered before this returns, so you can hold
    /// the waiter across other work and await it later. The waiter races
    /// the event against channel teardown: a transport error settles it
    /// with that error, a disconnect with [`Error::ChannelClosed`].
    /// Exactly one settlement occurs.
    pub fn once(&self, event: impl Into<String>) -> EventWaiter {
        let (completion, settled) = oneshot::channel();
        self.subscribe(event.into(), Waiter::Settle(completion));
        EventWaiter { settled }
    }

    /// One-shot listener form of [`once`](Channel::once): `listener` fires
    /// with the args of the next occurrence of `event`, or never, if the
    /// channel is destroyed first.
    pub fn once_with(
        &self,
        event: impl Into<String>,
        listener: impl FnOnce(Vec<Value>) + Send + 'static,
    ) {
        self.subscribe(event.into(), Waiter::Listener(Box::new(listener)));
    }

    /// Register synchronously, so the waiter exists before this returns. The
    /// closed state is published under the bus lock: a waiter either lands
    /// before the destroy drain or observes the channel already closed.
    fn subscribe(&self, event: String, waiter: Waiter) {
        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state() == ChannelState::Closed {
            drop(bus);
            waiter.fail(&Error::ChannelClosed);
            return;
        }
        bus.subscribe(event, waiter);
    }

    /// Invoke a procedure registered on the peer and await its result.
    ///
    /// Settles with the handler's return value, with the handler's failure
    /// as a typed error, or with the destroy reason if the channel goes
    /// down first. No timeout is enforced here. Fails fast with
    /// [`Error::ChannelClosed`], sending nothing, once closing has begun.
    pub async fn call(&self, name: impl Into<String>, args: Vec<Value>) -> crate::Result<Value> {
        let (completion, outcome) = oneshot::channel();
        self.submit(Command::Call {
            name: name.into(),
            args,
            completion,
        })?;
        outcome.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Expose an async function to the peer under `name`.
    ///
    /// Fails with [`Error::DuplicateRegistration`] if the name is taken;
    /// registration is permanent. Unlike `call`, registration is legal on a
    /// closing channel. Handlers run as deferred tasks; a panic inside one
    /// is captured and shipped to the caller as a response error.
    pub async fn register_function<F, Fut>(
        &self,
        name: impl Into<String>,
        handler: F,
    ) -> crate::Result<()>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: BoxedHandler = Arc::new(move |args| handler(args).boxed());
        let (reply, outcome) = oneshot::channel();
        self.submit(Command::Register {
            name: name.into(),
            handler,
            reply,
        })?;
        outcome.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Close gracefully: stop accepting new work, wait for every call and
    /// handler execution pending at this moment to settle, then destroy.
    /// Resolves once the channel is closed; immediately, if it already was.
    pub async fn close(&self) {
        let (done, closed) = oneshot::channel();
        if self.commands.send(Command::Close { done }).is_err() {
            return;
        }
        let _ = closed.await;
    }

    /// Tear down immediately, without draining. Every pending call and
    /// event waiter is rejected with `reason` (default:
    /// [`Error::Cancelled`]). Idempotent: destroying a destroyed channel is
    /// a no-op.
    pub fn destroy(&self, reason: Option<Error>) {
        let _ = self.commands.send(Command::Destroy { reason });
    }

    /// A callable bound to one remote procedure name.
    pub fn remote(&self, name: impl Into<String>) -> RemoteFunction {
        RemoteFunction {
            channel: self.clone(),
            name: name.into(),
        }
    }

    fn submit(&self, command: Command) -> crate::Result<()> {
        self.commands.send(command).map_err(|_| Error::ChannelClosed)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("state", &self.state()).finish()
    }
}

/// Awaitable handed out by [`Channel::once`]. Settles with the event's args
/// or with the channel's teardown reason, whichever happens first.
#[must_use = "an event waiter does nothing unless awaited"]
#[derive(Debug)]
pub struct EventWaiter {
    settled: oneshot::Receiver<crate::Result<Vec<Value>>>,
}

impl Future for EventWaiter {
    type Output = crate::Result<Vec<Value>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.settled).poll(cx).map(|settled| match settled {
            Ok(outcome) => outcome,
            // The driver went away without settling us: the channel closed.
            Err(_) => Err(Error::ChannelClosed),
        })
    }
}

/// A peer procedure as a directly callable handle: `remote.call(args)` is
/// `channel.call(name, args)`. Carries no state beyond the binding.
#[derive(Debug, Clone)]
pub struct RemoteFunction {
    channel: Channel,
    name: String,
}

impl RemoteFunction {
    /// The bound procedure name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the bound procedure on the peer.
    pub async fn call(&self, args: Vec<Value>) -> crate::Result<Value> {
        self.channel.call(self.name.clone(), args).await
    }
}
