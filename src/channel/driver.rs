use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::channel::correlation::CorrelationTable;
use crate::channel::event_bus::EventBus;
use crate::channel::registry::{BoxedHandler, FunctionRegistry};
use crate::channel::ChannelState;
use crate::error::{Error, RemoteError};
use crate::packet::{CorrelationId, Packet};
use crate::transport::{Transport, TransportEvent};

/// What a [`Channel`](crate::Channel) handle asks its driver to do.
pub(crate) enum Command {
    Emit {
        event: String,
        args: Vec<Value>,
        reply: oneshot::Sender<crate::Result<()>>,
    },
    Call {
        name: String,
        args: Vec<Value>,
        completion: oneshot::Sender<crate::Result<Value>>,
    },
    Register {
        name: String,
        handler: BoxedHandler,
        reply: oneshot::Sender<crate::Result<()>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
    Destroy {
        reason: Option<Error>,
    },
}

/// The task side of a channel: exclusive owner of the transport, correlation
/// table, function registry, and event bus.
///
/// Everything the channel does - inbound dispatch, handler completion,
/// command handling - interleaves on this one task, so nothing races on the
/// channel's tables. Handler executions themselves are deferred onto a
/// [`JoinSet`] and tracked there until their response send settles.
#[must_use = "a channel does nothing until its driver is spawned"]
pub struct ChannelDriver<T: Transport> {
    transport: T,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    state: Arc<AtomicU8>,
    calls: CorrelationTable,
    functions: FunctionRegistry,
    bus: Arc<Mutex<EventBus>>,
    executions: JoinSet<(CorrelationId, Packet)>,
    close_waiters: Vec<oneshot::Sender<()>>,
}

impl<T: Transport> ChannelDriver<T> {
    pub(crate) fn new(
        transport: T,
        commands: mpsc::UnboundedReceiver<Command>,
        state: Arc<AtomicU8>,
        bus: Arc<Mutex<EventBus>>,
    ) -> Self {
        Self {
            transport,
            commands,
            commands_open: true,
            state,
            calls: CorrelationTable::default(),
            functions: FunctionRegistry::default(),
            bus,
            executions: JoinSet::new(),
            close_waiters: Vec::new(),
        }
    }

    /// Drive the channel until it is destroyed.
    ///
    /// Returning drops the transport, which releases its signal
    /// subscriptions and severs the link. Dropping every `Channel` handle
    /// does not stop the driver: the peer can still call local functions
    /// until the transport disconnects.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.transport.next() => match event {
                    Some(TransportEvent::Packet(packet)) => self.dispatch(packet),
                    Some(TransportEvent::Error(error)) => {
                        log::warn!("transport error, destroying channel: {error}");
                        self.destroy(Error::Transport(error));
                        break;
                    }
                    Some(TransportEvent::Disconnect) | None => {
                        log::debug!("transport disconnected, destroying channel");
                        self.destroy(Error::ChannelClosed);
                        break;
                    }
                },
                Some(finished) = self.executions.join_next(), if !self.executions.is_empty() => {
                    self.finish_execution(finished);
                }
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => {
                        if self.handle_command(command).is_break() {
                            break;
                        }
                    }
                    None => self.commands_open = false,
                },
            }
            if self.state() == ChannelState::Closing
                && self.calls.is_empty()
                && self.executions.is_empty()
            {
                log::debug!("drain complete, destroying channel");
                self.destroy(Error::Cancelled);
                break;
            }
        }
    }

    /// Route one inbound packet. The routing decision is synchronous; only
    /// handler execution is deferred.
    fn dispatch(&mut self, packet: Packet) {
        match packet {
            Packet::Event { event, args } => {
                log::trace!("inbound event '{event}'");
                let waiters = self.lock_bus().take_waiters(&event);
                // Fired outside the lock: a listener may subscribe again.
                for waiter in waiters {
                    waiter.fire(args.clone());
                }
            }
            Packet::Call { id, name, args } => self.dispatch_call(id, name, args),
            Packet::Response { id, result, error } => {
                let Some(pending) = self.calls.take(id) else {
                    // Lenient on purpose: an unmatched id is logged, never
                    // escalated.
                    log::warn!("{id} response for call that was not in flight");
                    return;
                };
                let outcome = match error {
                    Some(payload) => Err(Error::from(payload)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                pending.settle(outcome);
            }
        }
    }

    fn dispatch_call(&mut self, id: CorrelationId, name: String, args: Vec<Value>) {
        if self.state() != ChannelState::Open {
            log::debug!("{id} bouncing call '{name}' received while closing");
            // Best effort; the transport may already be gone.
            if let Err(error) = self
                .transport
                .send(Packet::response_error(id, RemoteError::channel_closed()))
            {
                log::debug!("{id} could not bounce call: {error}");
            }
            return;
        }
        match self.functions.get(&name) {
            Some(handler) => {
                let handler = handler.clone();
                // Runs on the next scheduling turn, never synchronously from
                // the dispatch step, so an immediately-failing handler is
                // indistinguishable from an asynchronous one.
                self.executions.spawn(async move {
                    let outcome = AssertUnwindSafe(handler(args)).catch_unwind().await;
                    let packet = match outcome {
                        Ok(Ok(value)) => Packet::response(id, value),
                        Ok(Err(failure)) => Packet::response_error(id, failure),
                        Err(panic) => {
                            Packet::response_error(id, RemoteError::from_panic(panic))
                        }
                    };
                    (id, packet)
                });
            }
            None => {
                log::debug!("{id} call for unregistered function '{name}'");
                let error = RemoteError::undefined_function(&name);
                self.executions
                    .spawn(async move { (id, Packet::response_error(id, error)) });
            }
        }
    }

    fn finish_execution(
        &mut self,
        finished: Result<(CorrelationId, Packet), tokio::task::JoinError>,
    ) {
        match finished {
            Ok((id, packet)) => {
                log::trace!("{id} sending response");
                if let Err(error) = self.transport.send(packet) {
                    log::debug!("{id} response dropped, transport closed: {error}");
                }
            }
            Err(join_error) => {
                log::error!("execution task failed: {join_error}");
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Emit { event, args, reply } => {
                let result = if self.state() != ChannelState::Open {
                    Err(Error::ChannelClosed)
                } else {
                    self.transport
                        .send(Packet::Event { event, args })
                        .map_err(Error::from)
                };
                let _ = reply.send(result);
            }
            Command::Call {
                name,
                args,
                completion,
            } => {
                if self.state() != ChannelState::Open {
                    // Fail fast, no packet sent and no id burned.
                    let _ = completion.send(Err(Error::ChannelClosed));
                    return ControlFlow::Continue(());
                }
                let id = self.calls.register(completion);
                log::trace!("{id} calling remote function '{name}'");
                if let Err(error) = self.transport.send(Packet::Call { id, name, args }) {
                    if let Some(pending) = self.calls.take(id) {
                        pending.settle(Err(Error::Transport(error)));
                    }
                }
            }
            Command::Register {
                name,
                handler,
                reply,
            } => {
                // Registration is not gated by lifecycle state.
                let _ = reply.send(self.functions.register(name, handler));
            }
            Command::Close { done } => {
                self.close_waiters.push(done);
                if self.state() == ChannelState::Open {
                    log::debug!(
                        "closing, draining {} pending calls and {} executions",
                        self.calls.len(),
                        self.executions.len()
                    );
                    self.set_state(ChannelState::Closing);
                }
            }
            Command::Destroy { reason } => {
                self.destroy(reason.unwrap_or(Error::Cancelled));
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Terminal teardown. Rejects everything still outstanding with `reason`
    /// and marks the channel closed; the run loop breaks immediately after,
    /// dropping the transport.
    fn destroy(&mut self, reason: Error) {
        self.calls.reject_all(&reason);
        self.executions.abort_all();
        // The closed state is published under the bus lock, so a handle
        // either gets its waiter in before this drain or observes closed.
        let waiters = {
            let mut bus = self.lock_bus();
            self.set_state(ChannelState::Closed);
            bus.drain_all()
        };
        for waiter in waiters {
            waiter.fail(&reason);
        }
        for done in self.close_waiters.drain(..) {
            let _ = done.send(());
        }
    }

    fn lock_bus(&self) -> MutexGuard<'_, EventBus> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}
