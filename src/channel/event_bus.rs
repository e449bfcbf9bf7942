use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::Error;

/// One party waiting for the next occurrence of a named event.
pub(crate) enum Waiter {
    /// A `once(event)` future. Settles with the event's args, or with the
    /// channel's destroy reason if error/disconnect wins the race.
    Settle(oneshot::Sender<crate::Result<Vec<Value>>>),
    /// A `once_with(event, listener)` subscription. Fires on the event,
    /// dropped unfired on destroy.
    Listener(Box<dyn FnOnce(Vec<Value>) + Send>),
}

impl Waiter {
    /// Consume the waiter with one occurrence of its event.
    pub fn fire(self, args: Vec<Value>) {
        match self {
            Waiter::Settle(completion) => {
                let _ = completion.send(Ok(args));
            }
            Waiter::Listener(listener) => listener(args),
        }
    }

    /// Consume the waiter without its event: futures settle with the
    /// reason, listeners are dropped unfired.
    pub fn fail(self, reason: &Error) {
        if let Waiter::Settle(completion) = self {
            let _ = completion.send(Err(reason.clone()));
        }
    }
}

/// Local publish/subscribe for events raised by the dispatcher.
///
/// All subscriptions are one-shot: taking the waiters for a name consumes
/// them. Shared behind a mutex between the channel handle (which registers
/// waiters synchronously, so a subscription exists before `once` returns)
/// and the driver (which takes them on publication and on destroy). Callers
/// fire waiters after releasing the lock; a listener may re-subscribe.
#[derive(Default)]
pub(crate) struct EventBus {
    waiters: HashMap<String, Vec<Waiter>>,
}

impl EventBus {
    pub fn subscribe(&mut self, event: String, waiter: Waiter) {
        self.waiters.entry(event).or_default().push(waiter);
    }

    /// Remove and return every waiter for one occurrence of `event`.
    pub fn take_waiters(&mut self, event: &str) -> Vec<Waiter> {
        self.waiters.remove(event).unwrap_or_default()
    }

    /// Remove and return every waiter for every event.
    pub fn drain_all(&mut self) -> Vec<Waiter> {
        self.waiters.drain().flat_map(|(_, waiters)| waiters).collect()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("waiting_events", &self.waiters.keys())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn taking_waiters_consumes_every_waiter_for_the_name() {
        let mut bus = EventBus::default();
        let (first_tx, mut first) = oneshot::channel();
        let (second_tx, mut second) = oneshot::channel();
        bus.subscribe("ready".to_owned(), Waiter::Settle(first_tx));
        bus.subscribe("ready".to_owned(), Waiter::Settle(second_tx));

        let waiters = bus.take_waiters("ready");
        assert_eq!(waiters.len(), 2);
        for waiter in waiters {
            waiter.fire(vec![json!("payload")]);
        }
        assert_eq!(first.try_recv().unwrap().unwrap(), vec![json!("payload")]);
        assert_eq!(second.try_recv().unwrap().unwrap(), vec![json!("payload")]);

        // One-shot: a second occurrence finds nobody.
        assert!(bus.take_waiters("ready").is_empty());
    }

    #[test]
    fn unrelated_events_leave_waiters_alone() {
        let mut bus = EventBus::default();
        let (tx, mut rx) = oneshot::channel();
        bus.subscribe("ready".to_owned(), Waiter::Settle(tx));

        assert!(bus.take_waiters("other").is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.take_waiters("ready").len(), 1);
    }

    #[test]
    fn failing_a_waiter_rejects_futures_and_drops_listeners() {
        let mut bus = EventBus::default();
        let (tx, mut rx) = oneshot::channel();
        bus.subscribe("ready".to_owned(), Waiter::Settle(tx));
        bus.subscribe(
            "ready".to_owned(),
            Waiter::Listener(Box::new(|_args| panic!("listener must not fire"))),
        );

        for waiter in bus.drain_all() {
            waiter.fail(&Error::ChannelClosed);
        }
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::ChannelClosed)));
    }
}
