//! Deployment units: one component with its broker and io thread.
//!
//! ```text
//!  ExecutionGroup
//!  ├── ExecutionBundle "FilamentMergerControl"
//!  │     IoContext ─▶ MessageBroker ─▶ component (worker thread)
//!  ├── ExecutionBundle "FilamentFeederMotor"
//!  └── ...
//! ```
//!
//! A bundle creates all three pieces together and tears them down
//! together.  The group starts every bundle and reports whether all of
//! them came up.

use std::any::Any;
use std::sync::Arc;

use log::{error, info};

use crate::broker::MessageBroker;
use crate::config::SystemConfig;
use crate::error::Result;
use crate::process::Runnable;
use crate::transport::{InprocRegistry, IoContext};

/// Object-safe view of a bundle, as held by [`ExecutionGroup`].
pub trait Bundle: Send + Sync {
    fn id(&self) -> &str;

    /// `true` when the component is running afterwards.
    fn start(&self) -> bool;

    fn stop(&self);

    fn is_running(&self) -> bool;

    fn wait_until_finished(&self);

    fn as_any(&self) -> &dyn Any;
}

// ---------------------------------------------------------------------------
// ExecutionBundle
// ---------------------------------------------------------------------------

pub struct ExecutionBundle<C> {
    // Dropped first: the component still refers to the broker.
    component: C,
    broker: Arc<MessageBroker>,
    id: String,
}

impl<C: Runnable + 'static> ExecutionBundle<C> {
    /// Create the io context and broker for `id`, then let `factory` build
    /// the component on top of the broker.
    pub fn new<F>(
        id: impl Into<String>,
        registry: &InprocRegistry,
        config: &SystemConfig,
        factory: F,
    ) -> Result<Self>
    where
        F: FnOnce(Arc<MessageBroker>) -> Result<C>,
    {
        let id = id.into();
        let io = Arc::new(IoContext::new(
            id.clone(),
            registry,
            config.component.io_poll_interval(),
        ));
        let broker = MessageBroker::new(id.clone(), io, &config.broker);
        let component = factory(Arc::clone(&broker))?;
        Ok(Self {
            component,
            broker,
            id,
        })
    }

    pub fn component(&self) -> &C {
        &self.component
    }

    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }
}

impl<C: Runnable + 'static> Bundle for ExecutionBundle<C> {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(&self) -> bool {
        match self.component.start() {
            Ok(()) => true,
            Err(e) => {
                error!(target: self.id.as_str(), "failed to start: {e}");
                false
            }
        }
    }

    fn stop(&self) {
        self.component.stop();
    }

    fn is_running(&self) -> bool {
        self.component.is_running()
    }

    fn wait_until_finished(&self) {
        self.component.wait_until_finished();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// ExecutionGroup
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ExecutionGroup {
    bundles: Vec<Box<dyn Bundle>>,
}

impl ExecutionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, bundle: impl Bundle + 'static) {
        self.bundles.push(Box::new(bundle));
    }

    pub fn with(mut self, bundle: impl Bundle + 'static) -> Self {
        self.add(bundle);
        self
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn bundle(&self, id: &str) -> Option<&dyn Bundle> {
        self.bundles.iter().find(|b| b.id() == id).map(|b| b.as_ref())
    }

    /// Typed access to the component of bundle `id`.
    pub fn component<C: Runnable + 'static>(&self, id: &str) -> Option<&C> {
        self.bundle(id)?
            .as_any()
            .downcast_ref::<ExecutionBundle<C>>()
            .map(ExecutionBundle::component)
    }

    /// Start every bundle, even after a failure.  `true` only if all
    /// started.
    pub fn start(&self) -> bool {
        let mut all = true;
        for bundle in &self.bundles {
            all &= bundle.start();
        }
        if all {
            info!("execution group started ({} bundles)", self.bundles.len());
        } else {
            error!("execution group started with failures");
        }
        all
    }

    pub fn stop(&self) {
        for bundle in &self.bundles {
            bundle.stop();
        }
    }

    pub fn wait_until_finished(&self) {
        for bundle in &self.bundles {
            bundle.wait_until_finished();
        }
    }

    /// `true` while any bundle still runs.
    pub fn is_running(&self) -> bool {
        self.bundles.iter().any(|b| b.is_running())
    }
}
