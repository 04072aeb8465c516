//! [`GpioPin`] on top of an `embedded-hal` 1.0 pin.
//!
//! `embedded-hal` pins take `&mut self`, so the pin sits behind a mutex.
//! Edge detection is done by sampling at a fixed interval.

use std::time::{Duration, Instant};

use embedded_hal::digital::{InputPin, OutputPin, PinState as HalPinState};
use parking_lot::Mutex;

use super::{GpioEvent, GpioEventKind, GpioPin, PinDirection, PinState};
use crate::error::{HalError, Result};

/// Sampling period of [`GpioPin::wait_for_event`].
pub const EDGE_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct EmbeddedGpioPin<P> {
    pin: Mutex<P>,
    direction: PinDirection,
    created: Instant,
}

impl<P> EmbeddedGpioPin<P>
where
    P: InputPin + OutputPin + Send,
{
    pub fn new(pin: P, direction: PinDirection) -> Self {
        Self {
            pin: Mutex::new(pin),
            direction,
            created: Instant::now(),
        }
    }

    pub fn into_inner(self) -> P {
        self.pin.into_inner()
    }

    fn read(&self) -> Result<PinState> {
        self.pin
            .lock()
            .is_high()
            .map(PinState::from)
            .map_err(|_| HalError::GpioReadFailed.into())
    }
}

impl<P> GpioPin for EmbeddedGpioPin<P>
where
    P: InputPin + OutputPin + Send,
{
    fn state(&self) -> Result<PinState> {
        self.read()
    }

    fn set_state(&self, state: PinState) -> Result<()> {
        if self.direction != PinDirection::Out {
            return Err(HalError::WrongDirection.into());
        }
        let level = match state {
            PinState::High => HalPinState::High,
            PinState::Low => HalPinState::Low,
        };
        self.pin
            .lock()
            .set_state(level)
            .map_err(|_| HalError::GpioWriteFailed.into())
    }

    fn direction(&self) -> PinDirection {
        self.direction
    }

    fn wait_for_event(&self, timeout: Duration) -> Result<GpioEvent> {
        let deadline = Instant::now() + timeout;
        let initial = self.read()?;
        loop {
            let current = self.read()?;
            if current != initial {
                let kind = match current {
                    PinState::High => GpioEventKind::RisingEdge,
                    PinState::Low => GpioEventKind::FallingEdge,
                };
                return Ok(GpioEvent {
                    timestamp: self.created.elapsed(),
                    kind,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(GpioEvent {
                    timestamp: self.created.elapsed(),
                    kind: GpioEventKind::Timeout,
                });
            }
            std::thread::sleep(EDGE_POLL_INTERVAL.min(deadline - now));
        }
    }
}
