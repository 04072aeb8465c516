//! Mock devices for integration tests.
//!
//! Record every write so tests can assert on the full command history
//! without the simulated plant reacting to it.

use std::thread;
use std::time::{Duration, Instant};

use filamachine::error::{Error, HalError, Result};
use filamachine::hal::{GpioEvent, GpioEventKind, GpioPin, PinDirection, PinState};
use parking_lot::Mutex;

// ── RecordingRelay ────────────────────────────────────────────

pub struct RecordingRelay {
    created: Instant,
    writes: Mutex<Vec<PinState>>,
    broken: bool,
}

#[allow(dead_code)]
impl RecordingRelay {
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            writes: Mutex::new(Vec::new()),
            broken: false,
        }
    }

    /// Every write fails with `GpioWriteFailed`.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::new()
        }
    }

    pub fn writes(&self) -> Vec<PinState> {
        self.writes.lock().clone()
    }

    pub fn is_on(&self) -> bool {
        self.writes.lock().last() == Some(&PinState::High)
    }
}

impl GpioPin for RecordingRelay {
    fn state(&self) -> Result<PinState> {
        Ok(self.writes.lock().last().copied().unwrap_or(PinState::Low))
    }

    fn set_state(&self, state: PinState) -> Result<()> {
        if self.broken {
            return Err(Error::Hal(HalError::GpioWriteFailed));
        }
        self.writes.lock().push(state);
        Ok(())
    }

    fn direction(&self) -> PinDirection {
        PinDirection::Out
    }

    fn wait_for_event(&self, timeout: Duration) -> Result<GpioEvent> {
        thread::sleep(timeout);
        Ok(GpioEvent {
            timestamp: self.created.elapsed(),
            kind: GpioEventKind::Timeout,
        })
    }
}
