//! Shared fixtures: brokers on a private registry and polling helpers.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use filamachine::broker::MessageBroker;
use filamachine::component::{RequestId, STATE_KEY};
use filamachine::config::SystemConfig;
use filamachine::message::{Message, ResponseMessage};
use filamachine::process::Runnable;
use filamachine::transport::{InprocRegistry, IoContext};
use parking_lot::Mutex;
use serde_json::Value;

pub const WAIT: Duration = Duration::from_secs(5);

/// Grace period for stray deliveries before asserting on what arrived.
pub const SETTLE: Duration = Duration::from_millis(50);

/// Defaults with a roomy reply timeout and fast temperature sampling.
pub fn config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.broker.max_transmission_time_ms = 500;
    config.machine.temperature_observation_interval_ms = 20;
    config
}

pub fn broker(registry: &InprocRegistry, id: &str, config: &SystemConfig) -> Arc<MessageBroker> {
    let io = Arc::new(IoContext::new(id, registry, config.component.io_poll_interval()));
    MessageBroker::new(id, io, &config.broker)
}

/// Poll `condition` every 5 ms until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn request(broker: &MessageBroker, id: &RequestId, parameters: &Value) -> ResponseMessage {
    let mut message = Message::with_json(id.message_id(), parameters);
    broker.send(&mut message, id.address()).unwrap()
}

/// State name reported by a state query, e.g. `"Running"`.
pub fn state_of(broker: &MessageBroker, query: &RequestId) -> String {
    let response = request(broker, query, &Value::Null);
    assert!(response.is_success(), "state query failed: {response}");
    response.payload_json().unwrap()[STATE_KEY]
        .as_str()
        .unwrap_or_default()
        .to_owned()
}

pub fn wait_for_state(broker: &MessageBroker, query: &RequestId, state: &str) -> bool {
    wait_until(WAIT, || state_of(broker, query) == state)
}

/// Subscribe topic `A` on publisher `first` and topic `B` on `second`.
/// Publishing `A` on `first` must arrive exactly once; publishing `A` on
/// `second` must not arrive at all.
pub fn assert_topics_bind_to_their_publisher(registry: &InprocRegistry, first: &str, second: &str) {
    let cfg = config();
    let (p1, p2) = (broker(registry, first, &cfg), broker(registry, second, &cfg));
    p1.start().unwrap();
    p2.start().unwrap();

    let listener = broker(registry, "TopicEar", &cfg);
    let heard = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&heard);
    listener.set_notification_handler(move |m: &Message| log.lock().push(m.id));
    listener.start().unwrap();
    listener.subscribe(first, "A").unwrap();
    listener.subscribe(second, "B").unwrap();

    // Filters reach a remote publisher asynchronously.
    assert!(wait_until(WAIT, || {
        p1.notify(&mut Message::new(1), "A").unwrap();
        p2.notify(&mut Message::new(2), "B").unwrap();
        let heard = heard.lock();
        heard.contains(&1) && heard.contains(&2)
    }));
    thread::sleep(SETTLE);
    heard.lock().clear();

    p2.notify(&mut Message::new(20), "A").unwrap();
    p1.notify(&mut Message::new(10), "A").unwrap();
    assert!(wait_until(WAIT, || heard.lock().contains(&10)));
    thread::sleep(SETTLE);
    assert_eq!(*heard.lock(), vec![10]);

    listener.stop();
    p1.stop();
    p2.stop();
}
