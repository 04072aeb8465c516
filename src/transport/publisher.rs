//! Publish side of publish/subscribe.  Delivery is best effort: a message
//! published while nobody listens is gone.

use std::sync::Arc;
use std::time::Duration;

use log::{info, trace};
use parking_lot::Mutex;

use crate::error::{Result, TransportError};
use crate::message::StreamBuffer;
use crate::process::Runnable;

use super::Endpoint;
use super::inproc::{InprocRegistry, TopicChannel};
use super::io_context::IoContext;
use super::tcp::TcpPublisher;

enum Binding {
    Inproc(Arc<TopicChannel>),
    Tcp(TcpPublisher),
}

pub struct Publisher {
    address: String,
    registry: InprocRegistry,
    poll_interval: Duration,
    binding: Mutex<Option<Binding>>,
}

impl Publisher {
    pub fn new(address: impl Into<String>, io: &IoContext) -> Self {
        Self {
            address: address.into(),
            registry: io.registry().clone(),
            poll_interval: io.poll_interval(),
            binding: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send the unread bytes of `data` to every subscriber of `topic`.
    /// Succeeds with zero subscribers; fails only when not bound.
    pub fn publish(&self, topic: &str, data: &StreamBuffer) -> Result<()> {
        let binding = self.binding.lock();
        let delivered = match binding.as_ref() {
            None => return Err(TransportError::NotBound(self.address.clone()).into()),
            Some(Binding::Inproc(channel)) => channel.publish(topic, data.unread())?,
            Some(Binding::Tcp(publisher)) => publisher.publish(topic, data.unread()),
        };
        trace!("{}: published {topic} to {delivered} subscribers", self.address);
        Ok(())
    }
}

impl Runnable for Publisher {
    fn start(&self) -> Result<()> {
        let mut binding = self.binding.lock();
        if binding.is_some() {
            return Ok(());
        }
        *binding = Some(match Endpoint::parse(&self.address)? {
            Endpoint::Inproc(name) => {
                let channel = self.registry.channel(&name);
                channel.bind()?;
                Binding::Inproc(channel)
            }
            Endpoint::Tcp(host_port) => {
                Binding::Tcp(TcpPublisher::bind(&host_port, self.poll_interval)?)
            }
        });
        info!("publisher bound to {}", self.address);
        Ok(())
    }

    fn stop(&self) {
        match self.binding.lock().take() {
            Some(Binding::Inproc(channel)) => channel.unbind(),
            Some(Binding::Tcp(publisher)) => drop(publisher),
            None => return,
        }
        info!("publisher unbound from {}", self.address);
    }

    fn is_running(&self) -> bool {
        self.binding.lock().is_some()
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.stop();
    }
}
