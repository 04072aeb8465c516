//! Reply side of request/reply.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;

use crate::error::Result;
use crate::process::Runnable;

use super::inproc::{InprocRegistry, Responder};
use super::io_context::{IoContext, IoExecutor};
use super::tcp::TcpResponder;
use super::{Endpoint, RequestHandler};

enum Binding {
    Inproc(String),
    Tcp(TcpResponder),
}

/// Binds `address` and answers each request through `handler` on the io
/// thread of the owning context.
pub struct Server {
    address: String,
    handler: Arc<RequestHandler>,
    executor: IoExecutor,
    registry: InprocRegistry,
    poll_interval: Duration,
    binding: Mutex<Option<Binding>>,
}

impl Server {
    pub fn new(address: impl Into<String>, handler: Arc<RequestHandler>, io: &IoContext) -> Self {
        Self {
            address: address.into(),
            handler,
            executor: io.executor(),
            registry: io.registry().clone(),
            poll_interval: io.poll_interval(),
            binding: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Runnable for Server {
    fn start(&self) -> Result<()> {
        let mut binding = self.binding.lock();
        if binding.is_some() {
            return Ok(());
        }
        let responder = Responder::new(self.executor.clone(), Arc::clone(&self.handler));
        *binding = Some(match Endpoint::parse(&self.address)? {
            Endpoint::Inproc(name) => {
                self.registry.bind_responder(&name, responder)?;
                Binding::Inproc(name)
            }
            Endpoint::Tcp(host_port) => {
                Binding::Tcp(TcpResponder::bind(&host_port, responder, self.poll_interval)?)
            }
        });
        info!("server bound to {}", self.address);
        Ok(())
    }

    fn stop(&self) {
        match self.binding.lock().take() {
            Some(Binding::Inproc(name)) => self.registry.unbind_responder(&name),
            Some(Binding::Tcp(responder)) => {
                debug!("closing {}", responder.local_addr());
                drop(responder);
            }
            None => return,
        }
        info!("server unbound from {}", self.address);
    }

    fn is_running(&self) -> bool {
        self.binding.lock().is_some()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
