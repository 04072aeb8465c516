//! Per-bundle I/O thread.
//!
//! Bound servers and subscriber links hold an [`IoExecutor`] and post
//! their handler invocations as jobs.  The io thread runs jobs in order,
//! one at a time, so every inbound handler of a component is serialized.
//!
//! The job channel is created once per context.  Executors therefore stay
//! valid across stop/start; while the context is stopped `post` fails
//! with `Disconnected` and nothing is queued.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use log::{debug, error};
use parking_lot::Mutex;

use crate::error::{Result, TransportError};
use crate::process::{ProcessContext, Runnable};

use super::inproc::InprocRegistry;

pub type Job = Box<dyn FnOnce() + Send>;

struct Shared {
    accepting: AtomicBool,
    jobs: Mutex<mpsc::Receiver<Job>>,
}

/// Cloneable handle that posts jobs onto one io thread.
#[derive(Clone)]
pub struct IoExecutor {
    tx: mpsc::Sender<Job>,
    shared: Arc<Shared>,
}

impl IoExecutor {
    pub fn post<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected.into());
        }
        self.tx
            .send(Box::new(job))
            .map_err(|_| TransportError::Disconnected.into())
    }
}

pub struct IoContext {
    id: String,
    registry: InprocRegistry,
    poll_interval: Duration,
    executor: IoExecutor,
    process: ProcessContext,
}

impl IoContext {
    pub fn new(id: impl Into<String>, registry: &InprocRegistry, poll_interval: Duration) -> Self {
        let id = id.into();
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            accepting: AtomicBool::new(false),
            jobs: Mutex::new(rx),
        });
        Self {
            process: ProcessContext::new(format!("{id}Io")),
            id,
            registry: registry.clone(),
            poll_interval,
            executor: IoExecutor { tx, shared },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registry(&self) -> &InprocRegistry {
        &self.registry
    }

    pub fn executor(&self) -> IoExecutor {
        self.executor.clone()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Runnable for IoContext {
    fn start(&self) -> Result<()> {
        if self.process.is_running() {
            return Ok(());
        }

        let shared = Arc::clone(&self.executor.shared);
        // Anything left from a stop race belongs to the previous run.
        {
            let rx = shared.jobs.lock();
            while rx.try_recv().is_ok() {}
        }
        shared.accepting.store(true, Ordering::Release);

        let poll = self.poll_interval;
        let id = self.id.clone();
        let on_stop_shared = Arc::clone(&shared);
        let started = self.process.start(
            move |flag| {
                let rx = shared.jobs.lock();
                while flag.is_set() {
                    match rx.recv_timeout(poll) {
                        Ok(job) => {
                            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!(target: id.as_str(), "io job panicked");
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                // Dropping a pending request job drops its reply channel,
                // which the waiting client sees as a disconnect.
                let mut dropped = 0usize;
                while let Ok(job) = rx.try_recv() {
                    drop(job);
                    dropped += 1;
                }
                if dropped > 0 {
                    debug!(target: id.as_str(), "dropped {dropped} pending io jobs");
                }
            },
            move || on_stop_shared.accepting.store(false, Ordering::Release),
        );

        if started.is_err() {
            self.executor.shared.accepting.store(false, Ordering::Release);
        }
        started
    }

    fn stop(&self) {
        if self.process.is_running() {
            self.process.stop();
        }
        self.executor.shared.accepting.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.process.is_running()
    }
}
