//! In-memory devices.
//!
//! Used by the host binary and the tests.  Each device can be told to
//! fail so error paths are reachable without hardware.  A temperature
//! sensor may be linked to a relay pin: while the relay is high every
//! reading rises by a fixed step, otherwise it falls back toward ambient.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::{Condvar, Mutex};

use super::{
    Direction, GpioEvent, GpioEventKind, GpioPin, GpioPinMap, Hal, PinDirection, PinState,
    StepperMotor, StepperMotorMap, TemperatureSensor, TemperatureSensorMap, Unit, UnitValue, id,
};
use crate::error::{HalError, Result};

// ---------------------------------------------------------------------------
// GPIO
// ---------------------------------------------------------------------------

struct PinInner {
    state: PinState,
    events: VecDeque<GpioEvent>,
}

pub struct SimGpioPin {
    direction: PinDirection,
    created: Instant,
    inner: Mutex<PinInner>,
    edge: Condvar,
    failing: AtomicBool,
}

impl SimGpioPin {
    pub fn input(initial: PinState) -> Self {
        Self::new(PinDirection::In, initial)
    }

    pub fn output(initial: PinState) -> Self {
        Self::new(PinDirection::Out, initial)
    }

    fn new(direction: PinDirection, initial: PinState) -> Self {
        Self {
            direction,
            created: Instant::now(),
            inner: Mutex::new(PinInner {
                state: initial,
                events: VecDeque::new(),
            }),
            edge: Condvar::new(),
            failing: AtomicBool::new(false),
        }
    }

    /// Drive the level from outside, as wiring would.  Works on input
    /// pins and queues an edge event when the level changes.
    pub fn drive(&self, state: PinState) {
        self.apply(state);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn is_high(&self) -> bool {
        self.inner.lock().state == PinState::High
    }

    fn apply(&self, state: PinState) {
        let mut inner = self.inner.lock();
        if inner.state == state {
            return;
        }
        inner.state = state;
        let kind = match state {
            PinState::High => GpioEventKind::RisingEdge,
            PinState::Low => GpioEventKind::FallingEdge,
        };
        let timestamp = self.created.elapsed();
        inner.events.push_back(GpioEvent { timestamp, kind });
        self.edge.notify_all();
    }
}

impl GpioPin for SimGpioPin {
    fn state(&self) -> Result<PinState> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(HalError::GpioReadFailed.into());
        }
        Ok(self.inner.lock().state)
    }

    fn set_state(&self, state: PinState) -> Result<()> {
        if self.direction != PinDirection::Out {
            return Err(HalError::WrongDirection.into());
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(HalError::GpioWriteFailed.into());
        }
        self.apply(state);
        Ok(())
    }

    fn direction(&self) -> PinDirection {
        self.direction
    }

    fn wait_for_event(&self, timeout: Duration) -> Result<GpioEvent> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(event) = inner.events.pop_front() {
                return Ok(event);
            }
            if self.edge.wait_until(&mut inner, deadline).timed_out() {
                return Ok(inner.events.pop_front().unwrap_or(GpioEvent {
                    timestamp: self.created.elapsed(),
                    kind: GpioEventKind::Timeout,
                }));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stepper motor
// ---------------------------------------------------------------------------

struct MotorInner {
    position: i32,
    speed: u32,
    max_speed: u32,
    direction: Direction,
    rotating: bool,
}

pub struct SimStepperMotor {
    inner: Mutex<MotorInner>,
    failing: AtomicBool,
}

impl SimStepperMotor {
    pub fn new(max_speed_rpm: u32) -> Self {
        Self {
            inner: Mutex::new(MotorInner {
                position: 0,
                speed: 0,
                max_speed: max_speed_rpm,
                direction: Direction::Forward,
                rotating: false,
            }),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn is_rotating(&self) -> bool {
        self.inner.lock().rotating
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            Err(HalError::MotorFailed.into())
        } else {
            Ok(())
        }
    }
}

impl StepperMotor for SimStepperMotor {
    fn reset(&self) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock();
        inner.rotating = false;
        inner.position = 0;
        Ok(())
    }

    fn rotate(&self, direction: Option<Direction>) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock();
        if let Some(direction) = direction {
            inner.direction = direction;
        }
        inner.rotating = true;
        trace!("sim motor rotating {:?} at {}rpm", inner.direction, inner.speed);
        Ok(())
    }

    fn rotate_to_position(&self, position: i32) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock();
        inner.direction = if position >= inner.position {
            Direction::Forward
        } else {
            Direction::Backward
        };
        inner.position = position;
        Ok(())
    }

    fn stop(&self, _immediately: bool) -> Result<()> {
        self.check()?;
        self.inner.lock().rotating = false;
        Ok(())
    }

    fn position(&self) -> i32 {
        self.inner.lock().position
    }

    fn speed(&self) -> UnitValue<u32> {
        UnitValue::new(self.inner.lock().speed, Unit::Rpm)
    }

    fn set_speed(&self, speed: UnitValue<u32>) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock();
        if speed.value > inner.max_speed {
            return Err(HalError::SpeedOutOfRange.into());
        }
        inner.speed = speed.value;
        Ok(())
    }

    fn max_speed(&self) -> UnitValue<u32> {
        UnitValue::new(self.inner.lock().max_speed, Unit::Rpm)
    }

    fn set_max_speed(&self, speed: UnitValue<u32>) {
        self.inner.lock().max_speed = speed.value;
    }
}

// ---------------------------------------------------------------------------
// Temperature sensor
// ---------------------------------------------------------------------------

struct HeaterLink {
    relay: Arc<SimGpioPin>,
    ambient: i32,
    step: i32,
}

pub struct SimTemperatureSensor {
    temperature: Mutex<i32>,
    link: Option<HeaterLink>,
    failing: AtomicBool,
}

impl SimTemperatureSensor {
    /// Sensor that reports whatever was last [`set`](Self::set).
    pub fn fixed(temperature: i32) -> Self {
        Self {
            temperature: Mutex::new(temperature),
            link: None,
            failing: AtomicBool::new(false),
        }
    }

    /// Sensor that follows `relay`: `step` degrees up per reading while it
    /// is high, `step` down (not below `ambient`) while it is low.
    pub fn heated_by(relay: Arc<SimGpioPin>, ambient: i32, step: i32) -> Self {
        Self {
            temperature: Mutex::new(ambient),
            link: Some(HeaterLink {
                relay,
                ambient,
                step,
            }),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set(&self, temperature: i32) {
        *self.temperature.lock() = temperature;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

impl TemperatureSensor for SimTemperatureSensor {
    fn temperature(&self) -> Result<UnitValue<i32>> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(HalError::SensorReadFailed.into());
        }
        let mut temperature = self.temperature.lock();
        if let Some(link) = &self.link {
            *temperature = if link.relay.is_high() {
                *temperature + link.step
            } else {
                (*temperature - link.step).max(link.ambient)
            };
        }
        Ok(UnitValue::new(*temperature, Unit::Celsius))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SimHal {
    gpio_pins: GpioPinMap,
    stepper_motors: StepperMotorMap,
    temperature_sensors: TemperatureSensorMap,
}

impl SimHal {
    pub fn with_gpio_pin(mut self, id: &str, pin: Arc<dyn GpioPin>) -> Self {
        self.gpio_pins.insert(id.to_owned(), pin);
        self
    }

    pub fn with_stepper_motor(mut self, id: &str, motor: Arc<dyn StepperMotor>) -> Self {
        self.stepper_motors.insert(id.to_owned(), motor);
        self
    }

    pub fn with_temperature_sensor(mut self, id: &str, sensor: Arc<dyn TemperatureSensor>) -> Self {
        self.temperature_sensors.insert(id.to_owned(), sensor);
        self
    }
}

impl Hal for SimHal {
    fn gpio_pins(&self) -> &GpioPinMap {
        &self.gpio_pins
    }

    fn stepper_motors(&self) -> &StepperMotorMap {
        &self.stepper_motors
    }

    fn temperature_sensors(&self) -> &TemperatureSensorMap {
        &self.temperature_sensors
    }
}

/// The device set of the filament machine, with typed handles kept for
/// inspection.
pub struct SimMachine {
    pub feeder_motor: Arc<SimStepperMotor>,
    pub merger_relay: Arc<SimGpioPin>,
    pub feeder_relay: Arc<SimGpioPin>,
    pub merger_sensor: Arc<SimTemperatureSensor>,
    pub feeder_sensor: Arc<SimTemperatureSensor>,
}

impl SimMachine {
    pub fn new(max_speed_rpm: u32, ambient: i32, heating_step: i32) -> Self {
        let merger_relay = Arc::new(SimGpioPin::output(PinState::Low));
        let feeder_relay = Arc::new(SimGpioPin::output(PinState::Low));
        Self {
            feeder_motor: Arc::new(SimStepperMotor::new(max_speed_rpm)),
            merger_sensor: Arc::new(SimTemperatureSensor::heated_by(
                Arc::clone(&merger_relay),
                ambient,
                heating_step,
            )),
            feeder_sensor: Arc::new(SimTemperatureSensor::heated_by(
                Arc::clone(&feeder_relay),
                ambient,
                heating_step,
            )),
            merger_relay,
            feeder_relay,
        }
    }

    pub fn hal(&self) -> SimHal {
        SimHal::default()
            .with_stepper_motor(id::STEPPER_MOTOR_FEEDER, self.feeder_motor.clone())
            .with_gpio_pin(id::RELAY_HEATER_MERGER, self.merger_relay.clone())
            .with_gpio_pin(id::RELAY_HEATER_FEEDER, self.feeder_relay.clone())
            .with_temperature_sensor(id::TEMPERATURE_SENSOR_MERGER, self.merger_sensor.clone())
            .with_temperature_sensor(id::TEMPERATURE_SENSOR_FEEDER, self.feeder_sensor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn input_pin_rejects_writes() {
        let pin = SimGpioPin::input(PinState::Low);
        assert_eq!(
            pin.set_state(PinState::High),
            Err(Error::Hal(HalError::WrongDirection))
        );
    }

    #[test]
    fn edges_are_queued() {
        let pin = SimGpioPin::input(PinState::Low);
        pin.drive(PinState::High);
        pin.drive(PinState::High);
        pin.drive(PinState::Low);
        let timeout = Duration::from_millis(5);
        assert_eq!(pin.wait_for_event(timeout).unwrap().kind, GpioEventKind::RisingEdge);
        assert_eq!(pin.wait_for_event(timeout).unwrap().kind, GpioEventKind::FallingEdge);
        assert_eq!(pin.wait_for_event(timeout).unwrap().kind, GpioEventKind::Timeout);
    }

    #[test]
    fn edge_from_another_thread_wakes_waiter() {
        let pin = Arc::new(SimGpioPin::input(PinState::Low));
        let p = Arc::clone(&pin);
        let driver = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            p.drive(PinState::High);
        });
        let event = pin.wait_for_event(Duration::from_secs(2)).unwrap();
        assert_eq!(event.kind, GpioEventKind::RisingEdge);
        driver.join().unwrap();
    }

    #[test]
    fn motor_speed_limit() {
        let motor = SimStepperMotor::new(100);
        assert!(motor.set_speed(UnitValue::new(100, Unit::Rpm)).is_ok());
        assert_eq!(
            motor.set_speed(UnitValue::new(101, Unit::Rpm)),
            Err(Error::Hal(HalError::SpeedOutOfRange))
        );
        assert_eq!(motor.speed().value, 100);
    }

    #[test]
    fn failing_motor() {
        let motor = SimStepperMotor::new(100);
        motor.set_failing(true);
        assert_eq!(motor.rotate(None), Err(Error::Hal(HalError::MotorFailed)));
        assert!(!motor.is_rotating());
    }

    #[test]
    fn linked_sensor_follows_relay() {
        let relay = Arc::new(SimGpioPin::output(PinState::Low));
        let sensor = SimTemperatureSensor::heated_by(Arc::clone(&relay), 20, 10);
        assert_eq!(sensor.temperature().unwrap().value, 20);
        relay.set_state(PinState::High).unwrap();
        assert_eq!(sensor.temperature().unwrap().value, 30);
        assert_eq!(sensor.temperature().unwrap().value, 40);
        relay.set_state(PinState::Low).unwrap();
        assert_eq!(sensor.temperature().unwrap().value, 30);
    }

    #[test]
    fn machine_registers_all_devices() {
        let machine = SimMachine::new(100, 20, 5);
        let hal = machine.hal();
        assert!(hal.stepper_motor(id::STEPPER_MOTOR_FEEDER).is_ok());
        assert!(hal.gpio_pin(id::RELAY_HEATER_MERGER).is_ok());
        assert!(hal.gpio_pin(id::RELAY_HEATER_FEEDER).is_ok());
        assert!(hal.temperature_sensor(id::TEMPERATURE_SENSOR_MERGER).is_ok());
        assert!(hal.temperature_sensor(id::TEMPERATURE_SENSOR_FEEDER).is_ok());
    }
}
