//! Broker request/reply and publish/subscribe over the in-process
//! registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use filamachine::error::{Error, SubscriptionError};
use filamachine::message::{Message, create_response};
use filamachine::process::Runnable;
use filamachine::transport::{InprocRegistry, MAX_SUBSCRIPTION_SOCKETS};
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::support::{WAIT, assert_topics_bind_to_their_publisher, broker, config, wait_until};

// ── Publish / subscribe ───────────────────────────────────────

#[test]
fn topic_is_bound_to_the_publisher_it_was_subscribed_on() {
    let registry = InprocRegistry::new();
    assert_topics_bind_to_their_publisher(&registry, "Left", "Right");
}

#[test]
fn notification_fans_out_to_every_subscriber_of_the_topic() {
    let registry = InprocRegistry::new();
    let cfg = config();
    let source = broker(&registry, "Source", &cfg);
    source.start().unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let mut listeners = Vec::new();
    for (name, topic) in [("A", "Tick"), ("B", "Tick"), ("C", "Tock")] {
        let listener = broker(&registry, name, &cfg);
        let log = Arc::clone(&received);
        listener.set_notification_handler(move |m: &Message| log.lock().push((name, m.id)));
        listener.start().unwrap();
        listener.subscribe("Source", topic).unwrap();
        listeners.push(listener);
    }

    source.notify(&mut Message::new(42), "Tick").unwrap();
    assert!(wait_until(WAIT, || received.lock().len() == 2));
    thread::sleep(Duration::from_millis(30));

    let mut got = received.lock().clone();
    got.sort_unstable();
    assert_eq!(got, vec![("A", 42), ("B", 42)]);

    for listener in &listeners {
        listener.stop();
    }
    source.stop();
}

#[test]
fn unsubscribed_topic_is_no_longer_delivered() {
    let registry = InprocRegistry::new();
    let cfg = config();
    let source = broker(&registry, "Ticker", &cfg);
    let listener = broker(&registry, "Ear", &cfg);
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    listener.set_notification_handler(move |_: &Message| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    source.start().unwrap();
    listener.start().unwrap();

    listener.subscribe("Ticker", "Tick").unwrap();
    source.notify(&mut Message::new(1), "Tick").unwrap();
    assert!(wait_until(WAIT, || count.load(Ordering::SeqCst) == 1));

    listener.unsubscribe("Ticker", "Tick").unwrap();
    source.notify(&mut Message::new(2), "Tick").unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    listener.stop();
    source.stop();
}

#[test]
fn subscription_pool_is_bounded() {
    let registry = InprocRegistry::new();
    let listener = broker(&registry, "Greedy", &config());

    for n in 0..MAX_SUBSCRIPTION_SOCKETS {
        listener.subscribe(&format!("Source{n}"), "Tick").unwrap();
    }
    // more topics on a held connection still fit
    listener.subscribe("Source0", "Tock").unwrap();

    let overflow = listener.subscribe("OneTooMany", "Tick");
    assert_eq!(
        overflow,
        Err(Error::Subscription(SubscriptionError::NoSocketsAvailable))
    );

    listener.unsubscribe("Source3", "Tick").unwrap();
    listener.subscribe("OneTooMany", "Tick").unwrap();
}

#[test]
fn duplicate_subscription_is_rejected() {
    let registry = InprocRegistry::new();
    let listener = broker(&registry, "Twice", &config());
    listener.subscribe("Source", "Tick").unwrap();
    assert_eq!(
        listener.subscribe("Source", "Tick"),
        Err(Error::Subscription(SubscriptionError::AlreadySubscribed))
    );
}

// ── Request / reply ───────────────────────────────────────────

#[test]
fn concurrent_sends_through_one_broker_are_serialized() {
    let registry = InprocRegistry::new();
    let cfg = config();
    let server = broker(&registry, "Slow", &cfg);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        server.set_request_handler(move |m: &Message| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            active.fetch_sub(1, Ordering::SeqCst);
            create_response(m, &Value::Null)
        });
    }
    server.start().unwrap();

    let client = broker(&registry, "Impatient", &cfg);
    let begin = Instant::now();
    let workers: Vec<_> = (0..2)
        .map(|n| {
            let client = Arc::clone(&client);
            thread::spawn(move || client.send(&mut Message::new(n), "Slow").unwrap())
        })
        .collect();
    for worker in workers {
        assert!(worker.join().unwrap().is_success());
    }

    assert!(begin.elapsed() >= Duration::from_millis(60));
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    server.stop();
}

#[test]
fn send_retries_until_a_late_server_binds() {
    let registry = InprocRegistry::new();
    let mut cfg = config();
    cfg.broker.send_attempts = 5;
    let server = broker(&registry, "Late", &cfg);
    server.set_request_handler(|m: &Message| create_response(m, &json!({ "late": true })));

    let starter = {
        let server = Arc::clone(&server);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(15));
            server.start().unwrap();
        })
    };

    let client = broker(&registry, "Early", &cfg);
    let response = client.send(&mut Message::new(9), "Late").unwrap();
    assert_eq!(response.payload_json().unwrap()["late"], true);

    starter.join().unwrap();
    server.stop();
}

#[test]
fn stopped_server_is_unreachable() {
    let registry = InprocRegistry::new();
    let mut cfg = config();
    cfg.broker.send_attempts = 1;
    let server = broker(&registry, "Gone", &cfg);
    server.set_request_handler(|m: &Message| create_response(m, &Value::Null));
    server.start().unwrap();
    server.stop();

    let client = broker(&registry, "Caller", &cfg);
    let result = client.send(&mut Message::new(1), "Gone");
    assert!(matches!(result, Err(e) if e.is_transport()));
}

// ── Reentrancy ──────────────────────────────────────────────────

const REENTRANT_CHILD_ENV: &str = "FILAMACHINE_REENTRANT_CHILD";

/// Runs itself as a child process; inside the child the request handler
/// sends through its own broker, which must abort.
#[cfg(unix)]
#[test]
fn reentrant_send_aborts_the_process() {
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Command, Stdio};

    if std::env::var_os(REENTRANT_CHILD_ENV).is_some() {
        send_from_inside_the_request_handler();
        return;
    }

    let status = Command::new(std::env::current_exe().unwrap())
        .args([
            "broker_tests::reentrant_send_aborts_the_process",
            "--exact",
            "--test-threads=1",
        ])
        .env(REENTRANT_CHILD_ENV, "1")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.signal(), Some(6), "child exited with {status}");
}

fn send_from_inside_the_request_handler() {
    let registry = InprocRegistry::new();
    let cfg = config();
    let server = broker(&registry, "Echo", &cfg);
    let weak = Arc::downgrade(&server);
    server.set_request_handler(move |m: &Message| {
        if let Some(inner) = weak.upgrade() {
            let _ = inner.send(&mut Message::new(m.id), "Elsewhere");
        }
        create_response(m, &Value::Null)
    });
    server.start().unwrap();

    let client = broker(&registry, "Caller", &cfg);
    let _ = client.send(&mut Message::new(1), "Echo");
    server.stop();
}
