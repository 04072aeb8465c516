//! Service components: a state machine behind a message broker.
//!
//! ```text
//!   inbound request ──▶ io thread ──▶ Dispatcher ──┬─ Command(e)     ─▶ queue.push(e)
//!                                                   ├─ StateQuery     ─▶ {"state": ..}
//!                                                   ├─ Get/SetProperty
//!                                                   └─ Custom(fn)
//!   notification    ──▶ io thread ──▶ Dispatcher ──▶ queue.push(e) / fn(msg, pusher)
//!
//!   worker thread:  loop { machine.process_next_event(&mut context) }
//! ```
//!
//! Actions run on the worker thread only, one at a time, in push order.
//! They may call `send`/`notify` through their [`ComponentHandle`].

pub mod event_queue;
pub mod property;
pub mod sender;
pub mod service_id;
pub mod state_machine;

use core::fmt::Debug;
use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::broker::MessageBroker;
use crate::config::ComponentConfig;
use crate::error::Result;
use crate::message::{
    Message, MessageId, ResponseMessage, ResultCode, create_error_response,
    create_error_response_with_reason, create_response,
};
use crate::process::{ProcessContext, RunFlag, Runnable};

pub use event_queue::EventQueue;
pub use property::{JsonProperty, Property};
pub use sender::{ComponentHandle, EventPusher, Sender};
pub use service_id::{NotificationId, RequestId};
pub use state_machine::{StateCell, StateMachine, Transition};

/// JSON key of a state query response.
pub const STATE_KEY: &str = "state";

type CustomRequest = dyn Fn(&Message) -> ResponseMessage + Send + Sync;
type CustomNotification<E> = dyn Fn(&Message, &EventPusher<E>) + Send + Sync;

enum RequestRoute<E> {
    Command(E),
    StateQuery,
    GetProperty(Arc<dyn JsonProperty>),
    SetProperty(Arc<dyn JsonProperty>, Option<E>),
    Custom(Arc<CustomRequest>),
}

enum NotificationRoute<E> {
    Event(E),
    Custom(Arc<CustomNotification<E>>),
}

// ---------------------------------------------------------------------------
// Dispatcher (runs on the io thread)
// ---------------------------------------------------------------------------

struct Dispatcher<E> {
    id: String,
    events: EventPusher<E>,
    state_name: Box<dyn Fn() -> String + Send + Sync>,
    requests: HashMap<MessageId, RequestRoute<E>>,
    notifications: HashMap<MessageId, NotificationRoute<E>>,
}

impl<E: Copy + Debug> Dispatcher<E> {
    fn on_request(&self, message: &Message) -> ResponseMessage {
        let Some(route) = self.requests.get(&message.id) else {
            warn!(target: self.id.as_str(), "unsupported request {message}");
            return create_error_response(message, ResultCode::UnsupportedRequest);
        };

        match route {
            RequestRoute::Command(event) => self.push_or_reject(message, *event),
            RequestRoute::StateQuery => {
                create_response(message, &json!({ STATE_KEY: (self.state_name)() }))
            }
            RequestRoute::GetProperty(property) => create_response(message, &property.to_json()),
            RequestRoute::SetProperty(property, event) => {
                let changed = message
                    .payload_json()
                    .and_then(|payload| property.set_from_json(&payload));
                match (changed, event) {
                    (Ok(true), Some(event)) => self.push_or_reject(message, *event),
                    (Ok(_), _) => create_response(message, &Value::Null),
                    (Err(e), _) => {
                        warn!(
                            target: self.id.as_str(),
                            "rejected {} update: {e}",
                            property.name()
                        );
                        create_error_response(message, ResultCode::InvalidPayload)
                    }
                }
            }
            RequestRoute::Custom(handler) => handler(message),
        }
    }

    fn push_or_reject(&self, message: &Message, event: E) -> ResponseMessage {
        if self.events.push(event) {
            return create_response(message, &Value::Null);
        }
        let reason = if self.events.is_closed() {
            "event queue closed"
        } else {
            "event queue full"
        };
        warn!(target: self.id.as_str(), "rejected {event:?}: {reason}");
        create_error_response_with_reason(message, ResultCode::Error, reason)
    }

    fn on_notification(&self, message: &Message) {
        match self.notifications.get(&message.id) {
            Some(NotificationRoute::Event(event)) => {
                if !self.events.push(*event) {
                    warn!(target: self.id.as_str(), "event queue rejected {event:?}");
                }
            }
            Some(NotificationRoute::Custom(handler)) => handler(message, &self.events),
            None => debug!(target: self.id.as_str(), "ignoring notification {message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects routes, then builds a [`ServiceComponent`].
pub struct ComponentBuilder<E> {
    broker: Arc<MessageBroker>,
    queue: Arc<EventQueue<E>>,
    requests: HashMap<MessageId, RequestRoute<E>>,
    notifications: HashMap<MessageId, NotificationRoute<E>>,
    subscriptions: Vec<NotificationId>,
}

impl<E> ComponentBuilder<E>
where
    E: Copy + PartialEq + Debug + Send + Sync + 'static,
{
    pub fn new(broker: Arc<MessageBroker>, config: &ComponentConfig) -> Self {
        Self {
            broker,
            queue: Arc::new(EventQueue::new(config.event_queue_size)),
            requests: HashMap::new(),
            notifications: HashMap::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Capability object for the behaviour context, available before
    /// `build` so the context can be constructed with it.
    pub fn handle(&self) -> ComponentHandle<E> {
        ComponentHandle::new(Arc::clone(&self.broker), Arc::clone(&self.queue))
    }

    pub fn command(self, id: RequestId, event: E) -> Self {
        self.route(id, RequestRoute::Command(event))
    }

    pub fn state_query(self, id: RequestId) -> Self {
        self.route(id, RequestRoute::StateQuery)
    }

    pub fn get_property(self, id: RequestId, property: Arc<dyn JsonProperty>) -> Self {
        self.route(id, RequestRoute::GetProperty(property))
    }

    /// `event` is pushed when the stored value actually changed.
    pub fn set_property(self, id: RequestId, property: Arc<dyn JsonProperty>, event: Option<E>) -> Self {
        self.route(id, RequestRoute::SetProperty(property, event))
    }

    pub fn request<F>(self, id: RequestId, handler: F) -> Self
    where
        F: Fn(&Message) -> ResponseMessage + Send + Sync + 'static,
    {
        self.route(id, RequestRoute::Custom(Arc::new(handler)))
    }

    pub fn notification(self, id: NotificationId, event: E) -> Self {
        self.subscribe(id, NotificationRoute::Event(event))
    }

    pub fn notification_fn<F>(self, id: NotificationId, handler: F) -> Self
    where
        F: Fn(&Message, &EventPusher<E>) + Send + Sync + 'static,
    {
        self.subscribe(id, NotificationRoute::Custom(Arc::new(handler)))
    }

    fn route(mut self, id: RequestId, route: RequestRoute<E>) -> Self {
        if self.requests.insert(id.message_id(), route).is_some() {
            warn!(target: self.broker.identifier(), "route for {id} replaced");
        }
        self
    }

    fn subscribe(mut self, id: NotificationId, route: NotificationRoute<E>) -> Self {
        self.notifications.insert(id.message_id(), route);
        if !self.subscriptions.contains(&id) {
            self.subscriptions.push(id);
        }
        self
    }

    /// Validate the transition table and assemble the component.
    pub fn build<S, C>(
        self,
        initial: S,
        transitions: Vec<Transition<S, E, C>>,
        context: C,
    ) -> Result<ServiceComponent<S, E, C>>
    where
        S: Copy + PartialEq + Debug + Send + Sync + 'static,
        C: Send + 'static,
    {
        let id = self.broker.identifier().to_owned();
        let machine = StateMachine::new(id.clone(), initial, transitions, Arc::clone(&self.queue))?;
        let state = machine.state_cell();

        let reader = state.clone();
        let dispatcher = Arc::new(Dispatcher {
            id: id.clone(),
            events: EventPusher::new(Arc::clone(&self.queue)),
            state_name: Box::new(move || format!("{:?}", reader.get())),
            requests: self.requests,
            notifications: self.notifications,
        });

        Ok(ServiceComponent {
            process: ProcessContext::new(id.clone()),
            id,
            broker: self.broker,
            queue: self.queue,
            state,
            dispatcher,
            subscriptions: self.subscriptions,
            worker: Arc::new(Mutex::new(Worker { machine, context })),
        })
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

struct Worker<S, E, C> {
    machine: StateMachine<S, E, C>,
    context: C,
}

pub struct ServiceComponent<S, E, C> {
    id: String,
    broker: Arc<MessageBroker>,
    queue: Arc<EventQueue<E>>,
    state: StateCell<S>,
    dispatcher: Arc<Dispatcher<E>>,
    subscriptions: Vec<NotificationId>,
    worker: Arc<Mutex<Worker<S, E, C>>>,
    process: ProcessContext,
}

impl<S, E, C> ServiceComponent<S, E, C>
where
    S: Copy + PartialEq + Debug + Send + Sync + 'static,
    E: Copy + PartialEq + Debug + Send + Sync + 'static,
    C: Send + 'static,
{
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn current_state(&self) -> S {
        self.state.get()
    }

    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    pub fn handle(&self) -> ComponentHandle<E> {
        ComponentHandle::new(Arc::clone(&self.broker), Arc::clone(&self.queue))
    }

    pub fn push(&self, event: E) -> bool {
        self.queue.push(event)
    }

    fn unsubscribe_all(&self, ids: &[NotificationId]) {
        for id in ids {
            if let Err(e) = self.broker.unsubscribe(id.address(), id.topic()) {
                debug!(target: self.id.as_str(), "unsubscribe {id}: {e}");
            }
        }
    }
}

impl<S, E, C> Runnable for ServiceComponent<S, E, C>
where
    S: Copy + PartialEq + Debug + Send + Sync + 'static,
    E: Copy + PartialEq + Debug + Send + Sync + 'static,
    C: Send + 'static,
{
    fn start(&self) -> Result<()> {
        if self.process.is_running() {
            return Ok(());
        }

        // Open before anything can deliver, so the first command after a
        // restart is queued rather than rejected.
        self.queue.open();

        for (done, id) in self.subscriptions.iter().enumerate() {
            if let Err(e) = self.broker.subscribe(id.address(), id.topic()) {
                error!(target: self.id.as_str(), "failed to subscribe to {id}: {e}");
                self.unsubscribe_all(&self.subscriptions[..done]);
                self.queue.reset();
                return Err(e);
            }
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        self.broker
            .set_request_handler(move |message| dispatcher.on_request(message));
        let dispatcher = Arc::clone(&self.dispatcher);
        self.broker
            .set_notification_handler(move |message| dispatcher.on_notification(message));

        if let Err(e) = self.broker.start() {
            error!(target: self.id.as_str(), "failed to start broker: {e}");
            self.broker.stop();
            self.broker.clear_handlers();
            self.unsubscribe_all(&self.subscriptions);
            self.queue.reset();
            return Err(e);
        }

        let worker = Arc::clone(&self.worker);
        let queue = Arc::clone(&self.queue);
        let started = self.process.start(
            move |flag: &RunFlag| {
                let mut worker = worker.lock();
                let Worker { machine, context } = &mut *worker;
                while flag.is_set() {
                    if !machine.process_next_event(context) && machine.queue().is_closed() {
                        break;
                    }
                }
            },
            move || queue.reset(),
        );
        if let Err(e) = started {
            self.broker.stop();
            self.broker.clear_handlers();
            self.unsubscribe_all(&self.subscriptions);
            self.queue.reset();
            return Err(e);
        }

        info!(target: self.id.as_str(), "started in state {:?}", self.current_state());
        Ok(())
    }

    fn stop(&self) {
        self.process.stop();
        self.unsubscribe_all(&self.subscriptions);
        self.broker.clear_handlers();
        self.broker.stop();
        info!(target: self.id.as_str(), "stopped in state {:?}", self.current_state());
    }

    fn is_running(&self) -> bool {
        self.process.is_running()
    }

    fn wait_until_finished(&self) {
        self.process.wait_until_finished();
    }
}

impl<S, E, C> Drop for ServiceComponent<S, E, C> {
    fn drop(&mut self) {
        if self.process.is_running() {
            self.process.stop();
            self.broker.clear_handlers();
            self.broker.stop();
        }
    }
}
