//! In-process endpoint registry.
//!
//! One registry is shared by all io contexts of a process, the way a
//! socket context is shared by all sockets bound on it.
//!
//! ```text
//! InprocRegistry
//!  ├── responders: "FilamentFeederMotor"    → Responder { executor, handler }
//!  └── channels:   "FilamentFeederMotorPub" → TopicChannel
//!                                              ├── bound
//!                                              └── links: [subscriber → topics, delivery]
//! ```
//!
//! Topic channels are created on first use from either side, so a
//! subscriber may attach before the publisher binds.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use log::{trace, warn};
use parking_lot::Mutex;

use crate::error::{Result, TransportError};
use crate::message::StreamBuffer;

use super::io_context::IoExecutor;
use super::{NotificationHandler, RequestHandler, dispatch_request};

// ---------------------------------------------------------------------------
// Request/reply
// ---------------------------------------------------------------------------

/// A bound request handler and the io thread it runs on.
#[derive(Clone)]
pub struct Responder {
    executor: IoExecutor,
    handler: Arc<RequestHandler>,
}

impl Responder {
    pub fn new(executor: IoExecutor, handler: Arc<RequestHandler>) -> Self {
        Self { executor, handler }
    }

    /// Run the handler on the responder's io thread and wait for its reply.
    pub fn request(&self, request: Vec<u8>, timeout: Duration) -> Result<Vec<u8>> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let handler = Arc::clone(&self.handler);
        self.executor.post(move || {
            let reply = dispatch_request(handler.as_ref(), request);
            // The requester may have timed out already.
            let _ = reply_tx.send(reply);
        })?;

        reply_rx.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => TransportError::Timeout.into(),
            mpsc::RecvTimeoutError::Disconnected => TransportError::Disconnected.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Publish/subscribe
// ---------------------------------------------------------------------------

/// Where notifications for one subscriber are executed.
#[derive(Clone)]
pub struct Delivery {
    pub executor: IoExecutor,
    pub handler: Arc<NotificationHandler>,
}

impl Delivery {
    /// Queue one notification onto the subscriber's io thread.
    pub fn deliver(&self, data: Vec<u8>) -> Result<()> {
        let handler = Arc::clone(&self.handler);
        self.executor.post(move || {
            let mut input = StreamBuffer::from(data);
            if !handler(&mut input) {
                warn!("notification handler rejected message");
            }
        })
    }
}

struct SubscriberLink {
    subscriber: u64,
    topics: Vec<String>,
    delivery: Delivery,
}

/// Fan-out point for one publisher address.
pub struct TopicChannel {
    name: String,
    bound: AtomicBool,
    links: Mutex<Vec<SubscriberLink>>,
}

impl TopicChannel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            bound: AtomicBool::new(false),
            links: Mutex::new(Vec::new()),
        }
    }

    pub fn bind(&self) -> Result<()> {
        if self.bound.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AddressInUse(self.name.clone()).into());
        }
        Ok(())
    }

    pub fn unbind(&self) {
        self.bound.store(false, Ordering::Release);
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    pub fn add_topic(&self, subscriber: u64, topic: &str, delivery: &Delivery) {
        let mut links = self.links.lock();
        match links.iter_mut().find(|l| l.subscriber == subscriber) {
            Some(link) => {
                if !link.topics.iter().any(|t| t == topic) {
                    link.topics.push(topic.to_owned());
                }
            }
            None => links.push(SubscriberLink {
                subscriber,
                topics: vec![topic.to_owned()],
                delivery: delivery.clone(),
            }),
        }
    }

    pub fn remove_topic(&self, subscriber: u64, topic: &str) {
        let mut links = self.links.lock();
        if let Some(link) = links.iter_mut().find(|l| l.subscriber == subscriber) {
            link.topics.retain(|t| t != topic);
        }
        links.retain(|l| !l.topics.is_empty());
    }

    pub fn detach(&self, subscriber: u64) {
        self.links.lock().retain(|l| l.subscriber != subscriber);
    }

    /// Deliver `data` to every link subscribed to exactly `topic`.
    /// Returns the number of deliveries queued.
    pub fn publish(&self, topic: &str, data: &[u8]) -> Result<usize> {
        if !self.is_bound() {
            return Err(TransportError::NotBound(self.name.clone()).into());
        }
        let links = self.links.lock();
        let mut queued = 0;
        for link in links.iter().filter(|l| l.topics.iter().any(|t| t == topic)) {
            match link.delivery.deliver(data.to_vec()) {
                Ok(()) => queued += 1,
                Err(e) => trace!("{}: subscriber {} skipped: {e}", self.name, link.subscriber),
            }
        }
        Ok(queued)
    }

    pub fn subscriber_count(&self) -> usize {
        self.links.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Registry {
    responders: HashMap<String, Responder>,
    channels: HashMap<String, Arc<TopicChannel>>,
    next_subscriber: u64,
}

/// Process-wide table of in-process endpoints.  Cloning shares the table.
#[derive(Clone, Default)]
pub struct InprocRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl InprocRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_responder(&self, name: &str, responder: Responder) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.responders.contains_key(name) {
            return Err(TransportError::AddressInUse(name.to_owned()).into());
        }
        inner.responders.insert(name.to_owned(), responder);
        Ok(())
    }

    pub fn unbind_responder(&self, name: &str) {
        self.inner.lock().responders.remove(name);
    }

    pub fn responder(&self, name: &str) -> Result<Responder> {
        self.inner
            .lock()
            .responders
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::NotBound(name.to_owned()).into())
    }

    /// The channel for `name`, created unbound if it does not exist.
    pub fn channel(&self, name: &str) -> Arc<TopicChannel> {
        let mut inner = self.inner.lock();
        Arc::clone(
            inner
                .channels
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(TopicChannel::new(name))),
        )
    }

    pub fn next_subscriber_id(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_subscriber += 1;
        inner.next_subscriber
    }
}
