//! Message broker: one component's endpoint onto the message network.
//!
//! ```text
//!                    ┌──────────────── MessageBroker "X" ────────────────┐
//!  send(msg, "Y") ──▶│ Client ──(mutex, retry)──▶ inproc://Y              │
//!  notify(msg, t) ──▶│ Publisher  inproc://XPub ──▶ subscribers of t      │
//!                    │ Server     inproc://X    ◀── requests ──▶ handler  │
//!                    │ Subscriber (8 slots)     ◀── notifications         │
//!                    └───────────────────────────────────────────────────┘
//! ```
//!
//! Inbound requests and notifications run on the broker's io thread.  At
//! most one outbound request is in flight per broker: concurrent `send`
//! calls queue on the client mutex.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use log::{debug, error, trace, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::message::{Message, ResponseMessage, ResultCode, StreamBuffer, create_error_response};
use crate::process::Runnable;
use crate::transport::{
    Client, INPROC_SCHEME, IoContext, NotificationHandler, Publisher, RequestHandler, Server,
    Subscriber, TCP_SCHEME, split_host_port,
};

/// Application-level request handler.
pub type MessageHandler = dyn Fn(&Message) -> ResponseMessage + Send + Sync;

/// Application-level notification handler.
pub type NotifyHandler = dyn Fn(&Message) + Send + Sync;

const PUBLISHER_SUFFIX: &str = "Pub";

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Responder,
    Publisher,
}

/// Transport address of `service` for the component named `identifier`.
///
/// - `X` → `inproc://X` / `inproc://XPub`
/// - `tcp://host:port` → itself / `tcp://host:port+1`
pub fn full_address(identifier: &str, service: Service) -> String {
    if let Some(host_port) = identifier.strip_prefix(TCP_SCHEME) {
        return match service {
            Service::Responder => identifier.to_owned(),
            Service::Publisher => match split_host_port(host_port)
                .and_then(|(host, port)| Some((host, port.checked_add(1)?)))
            {
                Some((host, port)) => format!("{TCP_SCHEME}{host}:{port}"),
                None => format!("{identifier}{PUBLISHER_SUFFIX}"),
            },
        };
    }
    match service {
        Service::Responder => format!("{INPROC_SCHEME}{identifier}"),
        Service::Publisher => format!("{INPROC_SCHEME}{identifier}{PUBLISHER_SUFFIX}"),
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded retry with exponential backoff for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            attempts: config.send_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_backoff: Duration::from_millis(config.retry_backoff_max_ms),
        }
    }

    /// Delay before retry number `retry` (1 = first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

pub struct MessageBroker {
    identifier: String,
    io: Arc<IoContext>,
    timeout: Duration,
    retry: RetryPolicy,
    server: Server,
    publisher: Publisher,
    subscriber: Subscriber,
    client: Mutex<Client>,
    sequence: AtomicU32,
    request_handler: RwLock<Option<Arc<MessageHandler>>>,
    notification_handler: RwLock<Option<Arc<NotifyHandler>>>,
    /// Thread currently running an inbound request handler.
    inbound: Mutex<Option<ThreadId>>,
}

impl MessageBroker {
    pub fn new(identifier: impl Into<String>, io: Arc<IoContext>, config: &BrokerConfig) -> Arc<Self> {
        let identifier = identifier.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let w = weak.clone();
            let on_request: Arc<RequestHandler> =
                Arc::new(move |input: &mut StreamBuffer, output: &mut StreamBuffer| {
                    w.upgrade()
                        .is_some_and(|broker| broker.process_request(input, output))
                });
            let w = weak.clone();
            let on_notification: Arc<NotificationHandler> =
                Arc::new(move |input: &mut StreamBuffer| {
                    w.upgrade()
                        .is_some_and(|broker| broker.process_notification(input))
                });

            Self {
                server: Server::new(full_address(&identifier, Service::Responder), on_request, &io),
                publisher: Publisher::new(full_address(&identifier, Service::Publisher), &io),
                subscriber: Subscriber::new(on_notification, &io),
                client: Mutex::new(Client::new(io.registry())),
                timeout: config.transmission_timeout(),
                retry: RetryPolicy::from_config(config),
                sequence: AtomicU32::new(0),
                request_handler: RwLock::new(None),
                notification_handler: RwLock::new(None),
                inbound: Mutex::new(None),
                identifier,
                io,
            }
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn io_context(&self) -> &Arc<IoContext> {
        &self.io
    }

    /// Synchronous request to the component named `address`.
    ///
    /// Transport failures are retried per the [`RetryPolicy`]; protocol
    /// failures are not.  Calling this from inside this broker's own
    /// inbound request handler aborts the process.
    pub fn send(&self, message: &mut Message, address: &str) -> Result<ResponseMessage> {
        if self.is_processing_inbound_request() {
            error!(
                target: self.identifier.as_str(),
                "send to {address} issued from inside an inbound request handler; aborting"
            );
            std::process::abort();
        }

        let full = full_address(address, Service::Responder);
        let mut client = self.client.lock();

        message.sequence = self.next_sequence();
        let mut request = StreamBuffer::new();
        message.serialize(&mut request)?;
        trace!(target: self.identifier.as_str(), "sending {message} to {full}");

        let mut attempt = 1;
        let mut reply = loop {
            let result = exchange(&mut client, &full, &request, self.timeout);
            client.disconnect();
            match result {
                Ok(reply) => break reply,
                Err(e) if e.is_transport() && attempt < self.retry.attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        target: self.identifier.as_str(),
                        "send {message} to {full} failed ({e}), retry {attempt} in {delay:?}"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        target: self.identifier.as_str(),
                        "send {message} to {full} failed after {attempt} attempt(s): {e}"
                    );
                    return Err(e);
                }
            }
        };

        let response = ResponseMessage::deserialize(&mut reply).inspect_err(|e| {
            error!(target: self.identifier.as_str(), "bad response from {full}: {e}");
        })?;
        if response.id != message.id || response.sequence != message.sequence {
            warn!(
                target: self.identifier.as_str(),
                "response {response} does not match request {message}"
            );
        }
        Ok(response)
    }

    /// Publish `message` under `topic` to all current subscribers.
    /// Fails only when the message cannot be serialized; a broker whose
    /// publisher is not started drops the notification.
    pub fn notify(&self, message: &mut Message, topic: &str) -> Result<()> {
        message.sequence = self.next_sequence();
        let mut data = StreamBuffer::new();
        message.serialize(&mut data)?;
        if !self.publisher.is_running() {
            debug!(
                target: self.identifier.as_str(),
                "publisher not started; dropping {message} for {topic}"
            );
            return Ok(());
        }
        trace!(target: self.identifier.as_str(), "notify {message} as {topic}");
        self.publisher.publish(topic, &data)
    }

    pub fn subscribe(&self, address: &str, topic: &str) -> Result<()> {
        debug!(target: self.identifier.as_str(), "subscribing to {address}/{topic}");
        self.subscriber
            .subscribe(&full_address(address, Service::Publisher), topic)
    }

    pub fn unsubscribe(&self, address: &str, topic: &str) -> Result<()> {
        debug!(target: self.identifier.as_str(), "unsubscribing from {address}/{topic}");
        self.subscriber
            .unsubscribe(&full_address(address, Service::Publisher), topic)
    }

    pub fn set_request_handler<F>(&self, handler: F)
    where
        F: Fn(&Message) -> ResponseMessage + Send + Sync + 'static,
    {
        *self.request_handler.write() = Some(Arc::new(handler));
    }

    pub fn set_notification_handler<F>(&self, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        *self.notification_handler.write() = Some(Arc::new(handler));
    }

    pub fn clear_handlers(&self) {
        *self.request_handler.write() = None;
        *self.notification_handler.write() = None;
    }

    /// True on the thread currently running an inbound request handler of
    /// this broker.
    pub fn is_processing_inbound_request(&self) -> bool {
        *self.inbound.lock() == Some(thread::current().id())
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    // ── Inbound ───────────────────────────────────────────────

    fn process_request(&self, input: &mut StreamBuffer, output: &mut StreamBuffer) -> bool {
        let message = match Message::deserialize(input) {
            Ok(message) => message,
            Err(e) => {
                error!(target: self.identifier.as_str(), "failed to parse request: {e}");
                let response = create_error_response(&Message::default(), ResultCode::InvalidMessage);
                let _ = response.serialize(output);
                return false;
            }
        };
        trace!(target: self.identifier.as_str(), "received request {message}");

        let handler = self.request_handler.read().clone();
        let response = match handler {
            Some(handler) => {
                let _inbound = InboundScope::enter(&self.inbound);
                let mut response = handler(&message);
                response.refer_to(&message);
                response
            }
            None => {
                error!(target: self.identifier.as_str(), "unhandled request {message}");
                create_error_response(&message, ResultCode::UnsupportedRequest)
            }
        };

        match response.serialize(output) {
            Ok(()) => true,
            Err(e) => {
                error!(target: self.identifier.as_str(), "failed to serialize response: {e}");
                false
            }
        }
    }

    fn process_notification(&self, input: &mut StreamBuffer) -> bool {
        let message = match Message::deserialize(input) {
            Ok(message) => message,
            Err(e) => {
                error!(target: self.identifier.as_str(), "failed to parse notification: {e}");
                return false;
            }
        };
        trace!(target: self.identifier.as_str(), "received notification {message}");

        let handler = self.notification_handler.read().clone();
        match handler {
            Some(handler) => {
                handler(&message);
                true
            }
            None => {
                error!(target: self.identifier.as_str(), "unhandled notification {message}");
                false
            }
        }
    }
}

impl Runnable for MessageBroker {
    /// Start the io context, then publisher and server.  Both endpoints are
    /// attempted even if the first fails.
    fn start(&self) -> Result<()> {
        if let Err(e) = self.io.start() {
            error!(target: self.identifier.as_str(), "failed to start io context: {e}");
            return Err(e);
        }
        let published = self.publisher.start();
        let served = self.server.start();
        if let Err(e) = &published {
            error!(target: self.identifier.as_str(), "publisher failed to start: {e}");
        }
        if let Err(e) = &served {
            error!(target: self.identifier.as_str(), "server failed to start: {e}");
        }
        published.and(served)
    }

    fn stop(&self) {
        self.server.stop();
        self.publisher.stop();
        self.io.stop();
    }

    fn is_running(&self) -> bool {
        self.io.is_running() && self.server.is_running()
    }
}

// ── Internal ──────────────────────────────────────────────────

fn exchange(
    client: &mut Client,
    address: &str,
    request: &StreamBuffer,
    timeout: Duration,
) -> Result<StreamBuffer> {
    client.connect(address, timeout, timeout)?;
    let mut reply = StreamBuffer::new();
    client.send(request, &mut reply)?;
    Ok(reply)
}

/// Marks the current thread as inside an inbound request until dropped.
struct InboundScope<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
    previous: Option<ThreadId>,
}

impl<'a> InboundScope<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        let previous = slot.lock().replace(thread::current().id());
        Self { slot, previous }
    }
}

impl Drop for InboundScope<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = self.previous;
    }
}
