//! Owned worker threads with cooperative stop.
//!
//! ```text
//!  start(runner, on_stop)          stop()
//!        │                           │
//!        ▼                           ▼
//!  ┌───────────────┐   flag=false  ┌───────────────┐
//!  │ runner(&flag) │ ◀──────────── │ on_stop()     │  e.g. EventQueue::reset
//!  │  loop while   │               │ join()        │
//!  │  flag.is_set()│               └───────────────┘
//!  └───────────────┘
//! ```
//!
//! Runners must poll the [`RunFlag`] at bounded intervals so that
//! `stop()` terminates in bounded time.

pub mod timer;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, error, trace};
use parking_lot::Mutex;

use crate::error::{Error, Result};

pub use timer::Timer;

/// Lifecycle surface shared by components, bundles and contexts.
pub trait Runnable: Send + Sync {
    fn start(&self) -> Result<()>;
    fn stop(&self);
    fn is_running(&self) -> bool;

    /// Block until owned threads have exited.
    fn wait_until_finished(&self) {}
}

/// Keep-running flag handed to a runner closure.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

type StopFn = Box<dyn Fn() + Send + Sync>;

/// One named OS thread running a supplied loop.
pub struct ProcessContext {
    id: String,
    flag: RunFlag,
    handle: Mutex<Option<JoinHandle<()>>>,
    on_stop: Mutex<Option<StopFn>>,
}

impl ProcessContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flag: RunFlag(Arc::new(AtomicBool::new(false))),
            handle: Mutex::new(None),
            on_stop: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawn the thread.  `on_stop` runs inside `stop()` right after the
    /// flag is cleared, to unblock whatever the runner waits on.
    pub fn start<F, S>(&self, runner: F, on_stop: S) -> Result<()>
    where
        F: FnOnce(&RunFlag) + Send + 'static,
        S: Fn() + Send + Sync + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(Error::Spawn(format!("{} already running", self.id)));
        }
        if let Some(old) = handle.take() {
            join_quietly(&self.id, old);
        }

        *self.on_stop.lock() = Some(Box::new(on_stop));
        self.flag.set(true);

        let flag = self.flag.clone();
        let id = self.id.clone();
        let spawned = thread::Builder::new()
            .name(thread_name(&self.id))
            .spawn(move || {
                trace!(target: id.as_str(), "process started");
                runner(&flag);
                trace!(target: id.as_str(), "process finished");
            });

        match spawned {
            Ok(h) => {
                *handle = Some(h);
                Ok(())
            }
            Err(e) => {
                self.flag.set(false);
                error!(target: self.id.as_str(), "failed to spawn thread: {e}");
                Err(Error::Spawn(e.to_string()))
            }
        }
    }

    /// Clear the flag, run the stop hook and join.
    pub fn stop(&self) {
        debug!(target: self.id.as_str(), "stopping process");
        self.flag.set(false);
        if let Some(on_stop) = self.on_stop.lock().as_ref() {
            on_stop();
        }
        self.wait_until_finished();
    }

    /// Block until the thread has exited.  A no-op when called from the
    /// thread itself.
    pub fn wait_until_finished(&self) {
        let handle = {
            let mut guard = self.handle.lock();
            match guard.as_ref() {
                Some(h) if h.thread().id() == thread::current().id() => return,
                Some(_) => guard.take(),
                None => None,
            }
        };
        if let Some(h) = handle {
            join_quietly(&self.id, h);
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ProcessContext {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

// ── Internal ──────────────────────────────────────────────────

/// Linux limits thread names to 15 bytes.
fn thread_name(id: &str) -> String {
    id.chars().take(15).collect()
}

fn join_quietly(id: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!(target: id, "worker thread panicked");
    }
}
