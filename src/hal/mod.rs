//! Hardware collaborator interface.
//!
//! ```text
//!   Hal ──┬── gpio_pins()           id ─▶ Arc<dyn GpioPin>
//!         ├── stepper_motors()      id ─▶ Arc<dyn StepperMotor>
//!         └── temperature_sensors() id ─▶ Arc<dyn TemperatureSensor>
//! ```
//!
//! Components receive the device handles they need at construction.
//! Every call is synchronous, takes `&self` and reports failure as
//! [`HalError`].  [`sim`] has in-memory devices for hosts and tests;
//! [`gpio::EmbeddedGpioPin`] wraps any `embedded-hal` pin.

pub mod gpio;
pub mod sim;

use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{HalError, Result};

/// Device identifiers of the filament machine.
pub mod id {
    pub const STEPPER_MOTOR_FEEDER: &str = "feeder";
    pub const RELAY_HEATER_MERGER: &str = "relay-switch-heater-merger";
    pub const RELAY_HEATER_FEEDER: &str = "relay-switch-heater-feeder";
    pub const TEMPERATURE_SENSOR_MERGER: &str = "temperature-sensor-merger";
    pub const TEMPERATURE_SENSOR_FEEDER: &str = "temperature-sensor-feeder";
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    Rpm,
}

/// A measurement or set point together with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitValue<T> {
    pub value: T,
    pub unit: Unit,
}

impl<T> UnitValue<T> {
    pub const fn new(value: T, unit: Unit) -> Self {
        Self { value, unit }
    }
}

impl<T: fmt::Display> fmt::Display for UnitValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Unit::Celsius => write!(f, "{}°C", self.value),
            Unit::Rpm => write!(f, "{}rpm", self.value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Low,
    High,
}

impl From<bool> for PinState {
    fn from(high: bool) -> Self {
        if high { Self::High } else { Self::Low }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioEventKind {
    Timeout,
    RisingEdge,
    FallingEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioEvent {
    /// Time since the pin was created.
    pub timestamp: Duration,
    pub kind: GpioEventKind,
}

/// Rotation sense of a stepper motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

// ---------------------------------------------------------------------------
// Device traits
// ---------------------------------------------------------------------------

pub trait GpioPin: Send + Sync {
    fn state(&self) -> Result<PinState>;

    /// Only valid on output pins.
    fn set_state(&self, state: PinState) -> Result<()>;

    fn direction(&self) -> PinDirection;

    /// Block until an edge occurs or `timeout` elapses.
    fn wait_for_event(&self, timeout: Duration) -> Result<GpioEvent>;
}

pub trait StepperMotor: Send + Sync {
    /// Clear driver faults and return to a stopped state.
    fn reset(&self) -> Result<()>;

    /// Rotate continuously; `None` keeps the last direction.
    fn rotate(&self, direction: Option<Direction>) -> Result<()>;

    fn rotate_to_position(&self, position: i32) -> Result<()>;

    fn stop(&self, immediately: bool) -> Result<()>;

    fn position(&self) -> i32;

    fn speed(&self) -> UnitValue<u32>;

    fn set_speed(&self, speed: UnitValue<u32>) -> Result<()>;

    fn max_speed(&self) -> UnitValue<u32>;

    fn set_max_speed(&self, speed: UnitValue<u32>);
}

pub trait TemperatureSensor: Send + Sync {
    fn temperature(&self) -> Result<UnitValue<i32>>;
}

pub type GpioPinMap = BTreeMap<String, Arc<dyn GpioPin>>;
pub type StepperMotorMap = BTreeMap<String, Arc<dyn StepperMotor>>;
pub type TemperatureSensorMap = BTreeMap<String, Arc<dyn TemperatureSensor>>;

/// Device registry handed to component factories.
pub trait Hal: Send + Sync {
    fn gpio_pins(&self) -> &GpioPinMap;
    fn stepper_motors(&self) -> &StepperMotorMap;
    fn temperature_sensors(&self) -> &TemperatureSensorMap;

    fn gpio_pin(&self, id: &str) -> Result<Arc<dyn GpioPin>> {
        lookup(self.gpio_pins(), id)
    }

    fn stepper_motor(&self, id: &str) -> Result<Arc<dyn StepperMotor>> {
        lookup(self.stepper_motors(), id)
    }

    fn temperature_sensor(&self, id: &str) -> Result<Arc<dyn TemperatureSensor>> {
        lookup(self.temperature_sensors(), id)
    }
}

fn lookup<T: ?Sized>(map: &BTreeMap<String, Arc<T>>, id: &str) -> Result<Arc<T>> {
    map.get(id)
        .cloned()
        .ok_or_else(|| HalError::UnknownDevice(id.to_owned()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn unknown_device_is_reported() {
        let hal = sim::SimHal::default();
        assert_eq!(
            hal.stepper_motor("coiler").err(),
            Some(Error::Hal(HalError::UnknownDevice("coiler".into())))
        );
    }

    #[test]
    fn unit_value_display() {
        assert_eq!(UnitValue::new(200, Unit::Celsius).to_string(), "200°C");
        assert_eq!(UnitValue::new(50u32, Unit::Rpm).to_string(), "50rpm");
    }
}
