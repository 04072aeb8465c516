//! Outbound capabilities handed to component behaviour.
//!
//! State machine actions never see the broker directly; they get a
//! [`ComponentHandle`] (or any other [`Sender`]) and an [`EventPusher`].

use std::sync::Arc;

use log::{error, warn};
use serde_json::Value;

use crate::broker::MessageBroker;
use crate::error::{Error, Result};
use crate::message::{Message, ResponseMessage, ResultCode, create_error_response_with_reason};

use super::event_queue::EventQueue;
use super::service_id::{NotificationId, RequestId};

/// Request/notify capability.
pub trait Sender: Send + Sync {
    /// Synchronous request.  Only a `Success` response is `Ok`; any other
    /// result becomes [`Error::Response`].
    fn send(&self, request: &RequestId, parameters: &Value) -> Result<ResponseMessage>;

    /// Publish a notification to all subscribers.
    fn notify(&self, notification: &NotificationId, parameters: &Value) -> Result<()>;
}

/// Feeds events into one component's queue.
pub struct EventPusher<E> {
    queue: Arc<EventQueue<E>>,
}

impl<E> Clone for EventPusher<E> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<E> EventPusher<E> {
    pub fn new(queue: Arc<EventQueue<E>>) -> Self {
        Self { queue }
    }

    pub fn push(&self, event: E) -> bool {
        self.queue.push(event)
    }

    /// The owning component is stopped; pushes fail.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

/// Capability object of one component: its broker plus its own queue.
pub struct ComponentHandle<E> {
    broker: Arc<MessageBroker>,
    events: EventPusher<E>,
}

impl<E> Clone for ComponentHandle<E> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            events: self.events.clone(),
        }
    }
}

impl<E> ComponentHandle<E> {
    pub fn new(broker: Arc<MessageBroker>, queue: Arc<EventQueue<E>>) -> Self {
        Self {
            broker,
            events: EventPusher::new(queue),
        }
    }

    pub fn id(&self) -> &str {
        self.broker.identifier()
    }

    /// Push an event into the owning component's queue.
    pub fn push(&self, event: E) -> bool {
        self.events.push(event)
    }

    pub fn pusher(&self) -> EventPusher<E> {
        self.events.clone()
    }

    /// Send a copy of `message` to `request`, returning whatever came back.
    /// Transport failures are answered with an `Error` response.
    pub fn forward(&self, request: &RequestId, message: &Message) -> ResponseMessage {
        let mut forwarded = Message {
            id: request.message_id(),
            ..message.clone()
        };
        match self.broker.send(&mut forwarded, request.address()) {
            Ok(response) => response,
            Err(e) => {
                error!(target: self.id(), "forward to {request} failed: {e}");
                create_error_response_with_reason(message, ResultCode::Error, &e.to_string())
            }
        }
    }
}

impl<E: Send> Sender for ComponentHandle<E> {
    fn send(&self, request: &RequestId, parameters: &Value) -> Result<ResponseMessage> {
        let mut message = Message::with_json(request.message_id(), parameters);
        let response = self.broker.send(&mut message, request.address())?;
        if response.is_success() {
            return Ok(response);
        }
        let reason = response
            .error_reason()
            .unwrap_or_else(|| response.result.name().to_owned());
        warn!(
            target: self.id(),
            "request {request} answered {}: {reason}",
            response.result.name()
        );
        Err(Error::Response {
            result: response.result,
            reason,
        })
    }

    fn notify(&self, notification: &NotificationId, parameters: &Value) -> Result<()> {
        let mut message = Message::with_json(notification.message_id(), parameters);
        self.broker.notify(&mut message, notification.topic())
    }
}
