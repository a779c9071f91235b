//! Integration tests for the server-side endpoint registry
//!
//! These tests verify channel tracking keyed by remote endpoint identity,
//! event routing, and shutdown semantics.

mod common;

use common::{MockChannel, MockShutdown};
use parking_lot::Mutex;
use portmux::{
    AcceptOutcome, EndpointEvent, EndpointId, EndpointRegistry, EventKind, PostOutcome, Validator,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Macro for verbose test output
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

#[test]
fn test_accept_tracks_channel_by_endpoint() {
    common::init_logging();
    verbose_println!("Testing accept...");

    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let channel = MockChannel::with_endpoint("c1", 7u64);

    let outcome = registry.accept(channel);
    assert_eq!(outcome, AcceptOutcome::Tracked(EndpointId::Index(7)));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.endpoints(), vec![EndpointId::Index(7)]);
    assert!(registry.channel(&EndpointId::Index(7)).is_some());
}

#[test]
fn test_accept_without_endpoint_identity() {
    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let channel = MockChannel::new("anonymous");

    let outcome = registry.accept(channel.clone());
    assert_eq!(outcome, AcceptOutcome::Untracked);
    assert!(registry.is_empty());
    // The channel is left alone, not closed.
    assert!(!channel.is_closed());
}

#[test]
fn test_connect_listener_fires_on_accept() {
    verbose_println!("Testing connect event routing...");

    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    registry.on(
        EventKind::Connect,
        move |event, origin| {
            assert!(matches!(event, EndpointEvent::Connected));
            sink.lock().push(origin.endpoint.clone());
        },
        None,
    );

    registry.accept(MockChannel::with_endpoint("c1", 1u64));
    registry.accept(MockChannel::with_endpoint("c1", 2u64));

    assert_eq!(*seen.lock(), vec![EndpointId::Index(1), EndpointId::Index(2)]);
}

#[test]
fn test_connect_listener_can_reply_on_origin_channel() {
    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    registry.on(
        EventKind::Connect,
        |_, origin| {
            let _ = origin.channel.send(json!({"type": "welcome"}));
        },
        None,
    );

    let channel = MockChannel::with_endpoint("c1", 1u64);
    registry.accept(channel.clone());

    assert_eq!(channel.sent(), vec![json!({"type": "welcome"})]);
}

#[test]
fn test_post_routes_to_one_endpoint() {
    verbose_println!("Testing post routing...");

    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let ch1 = MockChannel::with_endpoint("c1", 1u64);
    let ch2 = MockChannel::with_endpoint("c1", 2u64);
    registry.accept(ch1.clone());
    registry.accept(ch2.clone());

    let outcome = registry.post(&EndpointId::Index(2), json!("only for two"));
    assert_eq!(outcome, PostOutcome::Sent);
    assert!(ch1.sent().is_empty());
    assert_eq!(ch2.sent(), vec![json!("only for two")]);
}

#[test]
fn test_post_to_unknown_endpoint() {
    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let outcome = registry.post(&EndpointId::Index(404), json!("lost"));
    assert_eq!(outcome, PostOutcome::NoChannel);
}

#[test]
fn test_post_reports_send_failure() {
    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let channel = MockChannel::with_endpoint("c1", 1u64);
    registry.accept(channel.clone());
    channel.fail_sends(true);

    match registry.post(&EndpointId::Index(1), json!("x")) {
        PostOutcome::SendFailed(detail) => verbose_println!("  Send failed: {}", detail),
        other => panic!("expected SendFailed, got {other:?}"),
    }
    // A failed send does not evict the endpoint.
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_messages_route_with_validators() {
    verbose_println!("Testing message routing with validators...");

    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let all = Arc::new(AtomicUsize::new(0));
    let pings = Arc::new(Mutex::new(Vec::new()));

    let count = Arc::clone(&all);
    registry.on(
        EventKind::Message,
        move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
        },
        None,
    );

    let only_pings: Validator<EndpointEvent<Value>> = Arc::new(|event| {
        event
            .message()
            .and_then(|m| m.get("type"))
            .map_or(false, |t| t == "ping")
    });
    let sink = Arc::clone(&pings);
    registry.on(
        EventKind::Message,
        move |_, origin| sink.lock().push(origin.endpoint.clone()),
        Some(only_pings),
    );

    let ch1 = MockChannel::with_endpoint("c1", 1u64);
    let ch2 = MockChannel::with_endpoint("c1", 2u64);
    registry.accept(ch1.clone());
    registry.accept(ch2.clone());

    ch1.emit_message(json!({"type": "ping"}));
    ch2.emit_message(json!({"type": "state"}));

    assert_eq!(all.load(Ordering::SeqCst), 2);
    assert_eq!(*pings.lock(), vec![EndpointId::Index(1)]);
}

#[test]
fn test_disconnect_evicts_endpoint() {
    verbose_println!("Testing disconnect handling...");

    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let gone = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&gone);
    registry.on(
        EventKind::Disconnect,
        move |event, origin| {
            assert!(matches!(event, EndpointEvent::Disconnected));
            sink.lock().push(origin.endpoint.clone());
        },
        None,
    );

    let channel = MockChannel::with_endpoint("c1", 1u64);
    registry.accept(channel.clone());
    channel.emit_disconnect(None);

    assert!(registry.is_empty());
    assert_eq!(*gone.lock(), vec![EndpointId::Index(1)]);
    assert_eq!(
        registry.post(&EndpointId::Index(1), json!("late")),
        PostOutcome::NoChannel
    );

    // Eviction detached the registry's subscriptions; a second disconnect
    // finds no listeners to fire.
    channel.emit_disconnect(None);
    assert_eq!(gone.lock().len(), 1);
}

#[test]
fn test_accept_replaces_channel_for_same_endpoint() {
    verbose_println!("Testing endpoint replacement...");

    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    registry.on(
        EventKind::Message,
        move |event, _| {
            if let Some(message) = event.message() {
                sink.lock().push(message.clone());
            }
        },
        None,
    );

    let old = MockChannel::with_endpoint("c1", 1u64);
    let new = MockChannel::with_endpoint("c1", 1u64);
    registry.accept(old.clone());
    registry.accept(new.clone());

    assert_eq!(registry.len(), 1);
    assert!(old.is_closed());
    assert!(!new.is_closed());

    // The replaced channel can no longer reach the listeners.
    old.emit_message(json!("stale"));
    new.emit_message(json!("fresh"));
    assert_eq!(*seen.lock(), vec![json!("fresh")]);

    // Posts land on the replacement.
    registry.post(&EndpointId::Index(1), json!("out"));
    assert_eq!(new.sent(), vec![json!("out")]);
    assert!(old.sent().is_empty());
}

#[test]
fn test_with_listeners_constructor() {
    let seen = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&seen);
    let on_connect: portmux::EndpointListener<Value> = Box::new(move |_, _| {
        count.fetch_add(1, Ordering::SeqCst);
    });
    let registry: EndpointRegistry<Value> =
        EndpointRegistry::with_listeners([(EventKind::Connect, on_connect, None)]);

    registry.accept(MockChannel::with_endpoint("c1", 1u64));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_string_endpoint_identities() {
    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let channel = MockChannel::with_endpoint("c1", "worker-a");
    let outcome = registry.accept(channel.clone());

    assert_eq!(
        outcome,
        AcceptOutcome::Tracked(EndpointId::Name("worker-a".into()))
    );
    assert_eq!(
        registry.post(&EndpointId::Name("worker-a".into()), json!("hi")),
        PostOutcome::Sent
    );
    assert_eq!(channel.sent(), vec![json!("hi")]);
}

#[test]
fn test_panicking_listener_does_not_block_others() {
    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    registry.on(EventKind::Message, |_, _| panic!("listener blew up"), None);
    let seen = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&seen);
    registry.on(
        EventKind::Message,
        move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
        },
        None,
    );

    let channel = MockChannel::with_endpoint("c1", 1u64);
    registry.accept(channel.clone());
    channel.emit_message(json!("x"));

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_close_all_closes_every_channel() {
    verbose_println!("Testing close_all...");

    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let ch1 = MockChannel::with_endpoint("c1", 1u64);
    let ch2 = MockChannel::with_endpoint("c1", 2u64);
    registry.accept(ch1.clone());
    registry.accept(ch2.clone());

    registry.close_all();

    assert!(registry.is_empty());
    assert!(ch1.is_closed());
    assert!(ch2.is_closed());
    assert_eq!(ch1.close_calls(), 1);
    assert_eq!(ch2.close_calls(), 1);
}

#[test]
fn test_accept_after_close_all_is_rejected() {
    verbose_println!("Testing accept after shutdown...");

    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    registry.close_all();

    let late = MockChannel::with_endpoint("c1", 9u64);
    let outcome = registry.accept(late.clone());

    assert_eq!(outcome, AcceptOutcome::Rejected);
    assert!(late.is_closed());
    assert!(registry.is_empty());
}

#[test]
fn test_shutdown_signal_closes_all() {
    let shutdown = MockShutdown::new();
    let registry: EndpointRegistry<Value> = EndpointRegistry::new();
    let channel = MockChannel::with_endpoint("c1", 1u64);
    registry.accept(channel.clone());

    registry.bind_shutdown(&shutdown);
    registry.bind_shutdown(&shutdown);
    assert_eq!(shutdown.subscriber_count(), 1);

    shutdown.fire();

    assert!(registry.is_empty());
    assert!(channel.is_closed());
}
