//! Broker traffic over loopback TCP.

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use filamachine::message::{Message, create_response};
use filamachine::process::Runnable;
use filamachine::transport::InprocRegistry;
use serde_json::json;

use super::support::{WAIT, assert_topics_bind_to_their_publisher, broker, config, wait_until};

/// `tcp://127.0.0.1:p` where both `p` (responder) and `p + 1`
/// (publisher) are free right now.
fn tcp_identifier() -> String {
    loop {
        let free = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = free.local_addr().unwrap().port();
        if port < u16::MAX && TcpListener::bind(("127.0.0.1", port + 1)).is_ok() {
            return format!("tcp://127.0.0.1:{port}");
        }
    }
}

fn port_of(identifier: &str) -> u16 {
    identifier.rsplit(':').next().unwrap().parse().unwrap()
}

/// Two identifiers whose port pairs do not overlap.
fn two_tcp_identifiers() -> (String, String) {
    let first = tcp_identifier();
    loop {
        let second = tcp_identifier();
        if port_of(&first).abs_diff(port_of(&second)) >= 2 {
            return (first, second);
        }
    }
}

#[test]
fn request_reply_over_tcp() {
    let registry = InprocRegistry::new();
    let cfg = config();
    let address = tcp_identifier();
    let server = broker(&registry, &address, &cfg);
    server.set_request_handler(|m: &Message| create_response(m, &json!({ "echo": m.id })));
    server.start().unwrap();

    let client = broker(&registry, "TcpCaller", &cfg);
    for id in [3, 4] {
        let mut message = Message::new(id);
        let response = client.send(&mut message, &address).unwrap();
        assert!(response.is_success());
        assert_eq!(response.sequence, message.sequence);
        assert_eq!(response.payload_json().unwrap()["echo"], id);
    }
    server.stop();
}

#[test]
fn notifications_cross_tcp() {
    let registry = InprocRegistry::new();
    let cfg = config();
    let address = tcp_identifier();
    let source = broker(&registry, &address, &cfg);
    source.start().unwrap();

    let listener = broker(&registry, "TcpEar", &cfg);
    let heard = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&heard);
    listener.set_notification_handler(move |m: &Message| {
        if m.id == 77 {
            count.fetch_add(1, Ordering::SeqCst);
        }
    });
    listener.start().unwrap();
    listener.subscribe(&address, "Tick").unwrap();

    // The topic filter reaches the publisher asynchronously; keep
    // publishing until the first delivery arrives.
    assert!(wait_until(WAIT, || {
        source.notify(&mut Message::new(77), "Tick").unwrap();
        source.notify(&mut Message::new(78), "Tock").unwrap();
        heard.load(Ordering::SeqCst) > 0
    }));

    listener.unsubscribe(&address, "Tick").unwrap();
    listener.stop();
    source.stop();
}

#[test]
fn topic_is_bound_to_the_tcp_publisher_it_was_subscribed_on() {
    let registry = InprocRegistry::new();
    let (first, second) = two_tcp_identifiers();
    assert_topics_bind_to_their_publisher(&registry, &first, &second);
}

#[test]
fn subscribing_to_an_unbound_tcp_publisher_fails() {
    let registry = InprocRegistry::new();
    let listener = broker(&registry, "Orphan", &config());
    let result = listener.subscribe(&tcp_identifier(), "Tick");
    assert!(matches!(result, Err(e) if e.is_transport()));
    assert!(listener.subscribe("Inproc", "Tick").is_ok());
}
