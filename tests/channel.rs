//! End-to-end coverage of two channels linked back to back.

use std::time::Duration;

use duplex_rpc::transport::{loopback, Transport, TransportEvent};
use duplex_rpc::{Channel, ChannelState, Error, Packet, RemoteError, TransportError};
use futures::StreamExt;
use serde_json::json;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn linked_pair() -> (Channel, Channel) {
    let (left, right) = loopback::pair();
    (Channel::spawn(left), Channel::spawn(right))
}

#[tokio::test]
async fn call_resolves_to_the_handler_return_value() {
    init_logging();
    let (a, b) = linked_pair();
    b.register_function("double", |args| async move {
        let x = args[0].as_i64().unwrap_or_default();
        Ok(json!(x * 2))
    })
    .await
    .expect("name is free");

    let result = a.call("double", vec![json!(21)]).await.expect("peer answers");
    assert_eq!(result, json!(42));
}

#[tokio::test]
async fn handler_failure_comes_back_as_a_remote_error() {
    init_logging();
    let (a, b) = linked_pair();
    b.register_function("fail", |args| async move {
        let message = args[0].as_str().unwrap_or_default().to_owned();
        Err(RemoteError::new(message))
    })
    .await
    .expect("name is free");

    match a.call("fail", vec![json!("boom")]).await {
        Err(Error::Remote(remote)) => assert_eq!(remote.message, "boom"),
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn handler_panic_comes_back_as_a_remote_error() {
    init_logging();
    let (a, b) = linked_pair();
    b.register_function("explode", |_args| async move {
        if true {
            panic!("kaboom");
        }
        Ok(json!(null))
    })
    .await
    .expect("name is free");

    match a.call("explode", vec![]).await {
        Err(Error::Remote(remote)) => assert_eq!(remote.message, "kaboom"),
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn calling_an_unregistered_name_rejects_and_never_hangs() {
    init_logging();
    let (a, _b) = linked_pair();

    let error = a.call("missing", vec![]).await.expect_err("nothing registered");
    assert!(matches!(error, Error::UndefinedFunction(_)));
    assert_eq!(error.to_string(), "missing is not defined");
}

#[tokio::test]
async fn duplicate_registration_fails_without_touching_the_first() {
    init_logging();
    let (a, b) = linked_pair();
    b.register_function("answer", |_args| async move { Ok(json!(42)) })
        .await
        .expect("name is free");

    let refused = b
        .register_function("answer", |_args| async move { Ok(json!(0)) })
        .await;
    assert!(matches!(
        refused,
        Err(Error::DuplicateRegistration { name }) if name == "answer"
    ));

    assert_eq!(a.call("answer", vec![]).await.unwrap(), json!(42));
}

#[tokio::test]
async fn once_resolves_on_the_first_occurrence() {
    init_logging();
    let (a, b) = linked_pair();

    let ready = b.once("ready");
    a.emit("ready", vec![]).await.expect("channel is open");

    assert_eq!(ready.await.expect("event arrives"), Vec::<serde_json::Value>::new());
}

#[tokio::test]
async fn send_is_sugar_for_a_message_event() {
    init_logging();
    let (a, b) = linked_pair();

    let message = b.once("message");
    a.send(json!("hi")).await.expect("channel is open");

    assert_eq!(message.await.expect("message arrives"), vec![json!("hi")]);
}

#[tokio::test]
async fn once_with_fires_a_listener_exactly_once() {
    init_logging();
    let (a, b) = linked_pair();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    b.once_with("tick", move |args| {
        let _ = tx.send(args);
    });

    a.emit("tick", vec![json!(1)]).await.expect("channel is open");
    a.emit("tick", vec![json!(2)]).await.expect("channel is open");

    assert_eq!(rx.recv().await.expect("listener fired"), vec![json!(1)]);
    // The subscription was one-shot; the second occurrence found nobody.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn close_drains_the_call_that_is_already_in_flight() {
    init_logging();
    let (a, b) = linked_pair();
    b.register_function("slow", |args| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(args.into_iter().next().unwrap_or(json!(null)))
    })
    .await
    .expect("name is free");

    let caller = a.clone();
    let in_flight =
        tokio::spawn(async move { caller.call("slow", vec![json!("payload")]).await });
    // Let the call packet reach the wire before closing.
    tokio::time::sleep(Duration::from_millis(10)).await;

    a.close().await;
    assert_eq!(a.state(), ChannelState::Closed);

    // The in-flight call settled with its real result before close resolved.
    let result = in_flight.await.expect("caller task completes");
    assert_eq!(result.expect("call survived the close"), json!("payload"));

    // New work fails fast now.
    assert!(matches!(a.call("slow", vec![]).await, Err(Error::ChannelClosed)));
    assert!(matches!(a.emit("late", vec![]).await, Err(Error::ChannelClosed)));
}

#[tokio::test]
async fn calls_into_a_closing_peer_bounce() {
    init_logging();
    let (a, b) = linked_pair();
    a.register_function("noop", |_args| async move { Ok(json!(null)) })
        .await
        .expect("name is free");
    b.register_function("hang", |_args| async move {
        futures::future::pending::<()>().await;
        Ok(json!(null))
    })
    .await
    .expect("name is free");

    // A pending outgoing call keeps a draining instead of destroying.
    let caller = a.clone();
    let _pending = tokio::spawn(async move { caller.call("hang", vec![]).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let closer = a.clone();
    let _closing = tokio::spawn(async move { closer.close().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(a.state(), ChannelState::Closing);

    let error = b.call("noop", vec![]).await.expect_err("peer is closing");
    assert!(matches!(error, Error::ChannelClosed));

    a.destroy(None);
}

#[tokio::test]
async fn a_response_nobody_is_waiting_for_is_discarded() {
    init_logging();
    let (left, mut right) = loopback::pair();
    let a = Channel::spawn(left);

    // Nothing on this channel ever allocated id 99.
    right
        .send(Packet::Response {
            id: 99,
            result: Some(json!("stray")),
            error: None,
        })
        .expect("link is open");

    // The stray settlement is logged and dropped; the channel keeps serving.
    a.emit("still-here", vec![json!(1)]).await.expect("channel is open");
    match right.next().await {
        Some(TransportEvent::Packet(Packet::Event { event, args })) => {
            assert_eq!(event, "still-here");
            assert_eq!(args, vec![json!(1)]);
        }
        other => panic!("expected the event to cross the link, got {other:?}"),
    }
    assert_eq!(a.state(), ChannelState::Open);
}

#[tokio::test]
async fn destroy_rejects_every_pending_call_and_is_idempotent() {
    init_logging();
    let (a, b) = linked_pair();
    b.register_function("hang", |_args| async move {
        futures::future::pending::<()>().await;
        Ok(json!(null))
    })
    .await
    .expect("name is free");

    let first_caller = a.clone();
    let first = tokio::spawn(async move { first_caller.call("hang", vec![]).await });
    let second_caller = a.clone();
    let second = tokio::spawn(async move { second_caller.call("hang", vec![]).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    a.destroy(None);
    assert!(matches!(first.await.unwrap(), Err(Error::Cancelled)));
    assert!(matches!(second.await.unwrap(), Err(Error::Cancelled)));

    // Destroying again is a no-op.
    a.destroy(None);
    a.destroy(Some(Error::ChannelClosed));
    assert_eq!(a.state(), ChannelState::Closed);
}

#[tokio::test]
async fn destroy_rejects_pending_calls_with_the_given_reason() {
    init_logging();
    let (a, b) = linked_pair();
    b.register_function("hang", |_args| async move {
        futures::future::pending::<()>().await;
        Ok(json!(null))
    })
    .await
    .expect("name is free");

    let first_caller = a.clone();
    let first = tokio::spawn(async move { first_caller.call("hang", vec![]).await });
    let second_caller = a.clone();
    let second = tokio::spawn(async move { second_caller.call("hang", vec![]).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The explicit reason, not the Cancelled default, reaches every caller.
    a.destroy(Some(Error::ChannelClosed));
    assert!(matches!(first.await.unwrap(), Err(Error::ChannelClosed)));
    assert!(matches!(second.await.unwrap(), Err(Error::ChannelClosed)));
}

#[tokio::test]
async fn disconnect_rejects_pending_calls_and_fails_fast_afterwards() {
    init_logging();
    let (left, right) = loopback::pair();
    let control = left.control();
    let a = Channel::spawn(left);
    let b = Channel::spawn(right);
    b.register_function("hang", |_args| async move {
        futures::future::pending::<()>().await;
        Ok(json!(null))
    })
    .await
    .expect("name is free");

    let first_caller = a.clone();
    let first = tokio::spawn(async move { first_caller.call("hang", vec![]).await });
    let second_caller = a.clone();
    let second = tokio::spawn(async move { second_caller.call("hang", vec![]).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    control.disconnect();
    assert!(matches!(first.await.unwrap(), Err(Error::ChannelClosed)));
    assert!(matches!(second.await.unwrap(), Err(Error::ChannelClosed)));

    assert!(matches!(a.call("hang", vec![]).await, Err(Error::ChannelClosed)));
}

#[tokio::test]
async fn once_rejects_when_a_transport_error_wins_the_race() {
    init_logging();
    let (left, right) = loopback::pair();
    let control = left.control();
    let a = Channel::spawn(left);
    let _b = Channel::spawn(right);

    let waiter = a.once("x");
    control.raise_error(TransportError::Io("wire fault".to_owned()));

    match waiter.await {
        Err(Error::Transport(TransportError::Io(message))) => assert_eq!(message, "wire fault"),
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn once_rejects_when_a_disconnect_wins_the_race() {
    init_logging();
    let (left, right) = loopback::pair();
    let control = left.control();
    let a = Channel::spawn(left);
    let _b = Channel::spawn(right);

    let waiter = a.once("x");
    control.disconnect();

    assert!(matches!(waiter.await, Err(Error::ChannelClosed)));
}

#[tokio::test]
async fn once_resolves_on_the_event_when_it_arrives_first() {
    init_logging();
    let (left, right) = loopback::pair();
    let control = left.control();
    let a = Channel::spawn(left);
    let b = Channel::spawn(right);

    let waiter = a.once("x");
    b.emit("x", vec![json!("first")]).await.expect("channel is open");
    let args = waiter.await.expect("event won the race");
    assert_eq!(args, vec![json!("first")]);

    // A later transport error no longer concerns the settled waiter.
    control.raise_error(TransportError::Io("too late".to_owned()));
}

#[tokio::test]
async fn remote_function_binds_a_name_to_a_callable() {
    init_logging();
    let (a, b) = linked_pair();
    b.register_function("add", |args| async move {
        let sum: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
        Ok(json!(sum))
    })
    .await
    .expect("name is free");

    let add = a.remote("add");
    assert_eq!(add.name(), "add");
    assert_eq!(add.call(vec![json!(19), json!(23)]).await.unwrap(), json!(42));
}

#[tokio::test]
async fn registration_is_still_legal_while_closing() {
    init_logging();
    let (a, b) = linked_pair();
    b.register_function("hang", |_args| async move {
        futures::future::pending::<()>().await;
        Ok(json!(null))
    })
    .await
    .expect("name is free");

    // Keep one call in flight so a stays in the closing state.
    let caller = a.clone();
    let _pending = tokio::spawn(async move { caller.call("hang", vec![]).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let closer = a.clone();
    let closing = tokio::spawn(async move { closer.close().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(a.state(), ChannelState::Closing);

    a.register_function("late", |_args| async move { Ok(json!("late")) })
        .await
        .expect("registration is not gated by lifecycle state");

    a.destroy(None);
    closing.await.expect("close resolves once destroyed");
}
