//! Subscribe side of publish/subscribe.
//!
//! ```text
//! Subscriber
//!  └── slots: heapless::Vec<Slot, 8>
//!        ├── "inproc://FilamentPreHeaterPub"  topics: [RangeReached, RangeLeft]
//!        ├── "inproc://FilamentMergerHeaterPub" topics: [RangeReached]
//!        └── ...                               (one connection per address)
//! ```
//!
//! The pool is fixed.  Once all slots are taken further addresses fail
//! with `NoSocketsAvailable` until a slot's last topic is removed.

use std::sync::Arc;
use std::time::Duration;

use heapless::Vec as BoundedVec;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{Result, SubscriptionError};

use super::inproc::{Delivery, InprocRegistry, TopicChannel};
use super::io_context::IoContext;
use super::tcp::TcpSubscription;
use super::{Endpoint, NotificationHandler};

/// Upstream connections one subscriber may hold.
pub const MAX_SUBSCRIPTION_SOCKETS: usize = 8;

/// Topics one connection may filter on.
pub const MAX_TOPICS_PER_CONNECTION: usize = 16;

enum Link {
    Inproc(Arc<TopicChannel>),
    Tcp(TcpSubscription),
}

struct Slot {
    address: String,
    topics: BoundedVec<String, MAX_TOPICS_PER_CONNECTION>,
    link: Link,
}

pub struct Subscriber {
    id: u64,
    registry: InprocRegistry,
    delivery: Delivery,
    poll_interval: Duration,
    slots: Mutex<BoundedVec<Slot, MAX_SUBSCRIPTION_SOCKETS>>,
}

impl Subscriber {
    pub fn new(handler: Arc<NotificationHandler>, io: &IoContext) -> Self {
        let registry = io.registry().clone();
        Self {
            id: registry.next_subscriber_id(),
            registry,
            delivery: Delivery {
                executor: io.executor(),
                handler,
            },
            poll_interval: io.poll_interval(),
            slots: Mutex::new(BoundedVec::new()),
        }
    }

    pub fn subscribe(&self, address: &str, topic: &str) -> Result<()> {
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.iter_mut().find(|s| s.address == address) {
            if slot.topics.iter().any(|t| t == topic) {
                return Err(SubscriptionError::AlreadySubscribed.into());
            }
            if slot.topics.is_full() {
                return Err(SubscriptionError::TooManyTopics.into());
            }
            self.add_topic(&mut slot.link, topic)?;
            let _ = slot.topics.push(topic.to_owned());
            debug!("subscribed to {topic} at {address}");
            return Ok(());
        }

        if slots.is_full() {
            warn!("cannot subscribe to {address}: no more sockets available");
            return Err(SubscriptionError::NoSocketsAvailable.into());
        }

        let mut link = match Endpoint::parse(address)? {
            Endpoint::Inproc(name) => Link::Inproc(self.registry.channel(&name)),
            Endpoint::Tcp(host_port) => Link::Tcp(TcpSubscription::open(
                &host_port,
                self.delivery.clone(),
                self.poll_interval,
            )?),
        };
        self.add_topic(&mut link, topic)?;

        let mut topics = BoundedVec::new();
        let _ = topics.push(topic.to_owned());
        let slot = Slot {
            address: address.to_owned(),
            topics,
            link,
        };
        if slots.push(slot).is_err() {
            return Err(SubscriptionError::NoSocketsAvailable.into());
        }
        debug!("subscribed to {topic} at {address} (new connection)");
        Ok(())
    }

    pub fn unsubscribe(&self, address: &str, topic: &str) -> Result<()> {
        let mut slots = self.slots.lock();
        let index = slots
            .iter()
            .position(|s| s.address == address)
            .ok_or(SubscriptionError::NotSubscribed)?;

        let slot = &mut slots[index];
        let position = slot
            .topics
            .iter()
            .position(|t| t == topic)
            .ok_or(SubscriptionError::NotSubscribed)?;

        match &mut slot.link {
            Link::Inproc(channel) => channel.remove_topic(self.id, topic),
            Link::Tcp(subscription) => {
                if let Err(e) = subscription.unsubscribe(topic) {
                    warn!("unsubscribe {topic} at {address} not sent: {e}");
                }
            }
        }
        slot.topics.swap_remove(position);

        if slot.topics.is_empty() {
            let mut slot = slots.swap_remove(index);
            self.close(&mut slot.link);
            debug!("released connection to {address}");
        }
        Ok(())
    }

    pub fn is_subscribed(&self, address: &str, topic: &str) -> bool {
        self.slots
            .lock()
            .iter()
            .any(|s| s.address == address && s.topics.iter().any(|t| t == topic))
    }

    /// Connection slots in use.
    pub fn connection_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Drop every subscription and free all slots.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        while let Some(mut slot) = slots.pop() {
            self.close(&mut slot.link);
        }
    }

    fn add_topic(&self, link: &mut Link, topic: &str) -> Result<()> {
        match link {
            Link::Inproc(channel) => {
                channel.add_topic(self.id, topic, &self.delivery);
                Ok(())
            }
            Link::Tcp(subscription) => subscription.subscribe(topic),
        }
    }

    fn close(&self, link: &mut Link) {
        match link {
            Link::Inproc(channel) => channel.detach(self.id),
            Link::Tcp(subscription) => subscription.close(),
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.clear();
    }
}
