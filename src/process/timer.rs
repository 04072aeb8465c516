//! Periodic callback on its own thread.
//!
//! The wait between ticks is a condvar timeout, so `stop()` wakes the
//! thread immediately instead of sleeping out the remaining period.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, trace};
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

#[derive(Default)]
struct Shared {
    running: Mutex<bool>,
    wake: Condvar,
}

pub struct Timer {
    name: String,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared::default()),
            handle: Mutex::new(None),
        }
    }

    /// Call `tick` every `period` until stopped.  The first call happens
    /// one period after start.  Restarting replaces the previous schedule.
    pub fn start<F>(&self, period: Duration, mut tick: F) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        self.stop();
        *self.shared.running.lock() = true;

        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(name.chars().take(15).collect())
            .spawn(move || {
                let mut next = Instant::now() + period;
                loop {
                    {
                        let mut running = shared.running.lock();
                        while *running && Instant::now() < next {
                            shared.wake.wait_until(&mut running, next);
                        }
                        if !*running {
                            break;
                        }
                    }
                    trace!(target: name.as_str(), "tick");
                    tick();
                    next += period;
                }
            });

        match spawned {
            Ok(h) => {
                *self.handle.lock() = Some(h);
                Ok(())
            }
            Err(e) => {
                *self.shared.running.lock() = false;
                Err(Error::Spawn(e.to_string()))
            }
        }
    }

    pub fn stop(&self) {
        *self.shared.running.lock() = false;
        self.shared.wake.notify_all();
        let handle = self.handle.lock().take();
        if let Some(h) = handle {
            if h.thread().id() == thread::current().id() {
                return;
            }
            if h.join().is_err() {
                error!(target: self.name.as_str(), "timer callback panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.lock()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
