//! Heater relay plus periodic temperature observation.
//!
//! ```text
//!   Timer tick ─▶ sensor.temperature() ─▶ Hysteresis::check
//!                                              │
//!                       t >= max ──────────────┼──▶ MaxTemperatureReached
//!                       t <= min ──────────────┴──▶ MinTemperatureReached
//! ```
//!
//! Each limit is reported once per crossing: after a max report only a
//! reading at or below min reports again, and vice versa. Readings inside
//! the window, or noise around a limit, stay quiet.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use log::{debug, error};

use crate::error::Result;
use crate::hal::{GpioPin, PinState, TemperatureSensor};
use crate::process::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterSignal {
    MaxTemperatureReached,
    MinTemperatureReached,
    SensorFailed,
}

/// Two-point limit detector.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    min: i32,
    max: i32,
    last: Option<HeaterSignal>,
}

impl Hysteresis {
    pub fn new(min: i32, max: i32) -> Self {
        Self {
            min,
            max,
            last: None,
        }
    }

    pub fn check(&mut self, temperature: i32) -> Option<HeaterSignal> {
        let signal = if temperature >= self.max {
            HeaterSignal::MaxTemperatureReached
        } else if temperature <= self.min {
            HeaterSignal::MinTemperatureReached
        } else {
            return None;
        };
        if self.last == Some(signal) {
            return None;
        }
        self.last = Some(signal);
        Some(signal)
    }
}

/// Last measured temperature, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct TemperatureReading(Arc<AtomicI32>);

impl TemperatureReading {
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, value: i32) {
        self.0.store(value, Ordering::Relaxed);
    }
}

pub struct HeaterService {
    id: String,
    relay: Arc<dyn GpioPin>,
    sensor: Arc<dyn TemperatureSensor>,
    limits: (i32, i32),
    interval: Duration,
    reading: TemperatureReading,
    observer: Timer,
}

impl HeaterService {
    pub fn new(
        id: impl Into<String>,
        relay: Arc<dyn GpioPin>,
        sensor: Arc<dyn TemperatureSensor>,
        limits: (i32, i32),
        interval: Duration,
    ) -> Self {
        let id = id.into();
        Self {
            observer: Timer::new(format!("{id}Timer")),
            id,
            relay,
            sensor,
            limits,
            interval,
            reading: TemperatureReading::default(),
        }
    }

    pub fn reading(&self) -> TemperatureReading {
        self.reading.clone()
    }

    pub fn switch_heater(&self, on: bool) -> Result<()> {
        debug!(target: self.id.as_str(), "switching heater {}", if on { "on" } else { "off" });
        let state = if on { PinState::High } else { PinState::Low };
        self.relay.set_state(state).inspect_err(|e| {
            error!(target: self.id.as_str(), "failed to switch heater relay: {e}");
        })
    }

    pub fn update_temperature(&self) -> Result<i32> {
        let value = self.sensor.temperature()?.value;
        self.reading.set(value);
        Ok(value)
    }

    /// Sample the sensor every interval and call `on_signal` for limit
    /// crossings and read failures.
    pub fn start_observation<F>(&self, mut on_signal: F) -> Result<()>
    where
        F: FnMut(HeaterSignal) + Send + 'static,
    {
        let sensor = Arc::clone(&self.sensor);
        let reading = self.reading.clone();
        let id = self.id.clone();
        let mut hysteresis = Hysteresis::new(self.limits.0, self.limits.1);
        self.observer.start(self.interval, move || {
            match sensor.temperature() {
                Ok(t) => {
                    reading.set(t.value);
                    if let Some(signal) = hysteresis.check(t.value) {
                        debug!(target: id.as_str(), "{signal:?} at {t}");
                        on_signal(signal);
                    }
                }
                Err(e) => {
                    error!(target: id.as_str(), "temperature read failed: {e}");
                    on_signal(HeaterSignal::SensorFailed);
                }
            }
        })
    }

    pub fn stop_observation(&self) {
        self.observer.stop();
    }

    pub fn is_observing(&self) -> bool {
        self.observer.is_running()
    }
}
