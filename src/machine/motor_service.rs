//! Stepper motor control shared by motor components.

use std::sync::Arc;

use log::{debug, error};

use crate::error::Result;
use crate::hal::{StepperMotor, Unit, UnitValue};

pub struct MotorService {
    id: String,
    motor: Arc<dyn StepperMotor>,
}

impl MotorService {
    pub fn new(id: impl Into<String>, motor: Arc<dyn StepperMotor>) -> Self {
        Self {
            id: id.into(),
            motor,
        }
    }

    pub fn max_speed(&self) -> u32 {
        self.motor.max_speed().value
    }

    /// Apply `rpm`, clamped to the motor maximum.  Returns the applied speed.
    pub fn set_speed(&self, rpm: u32) -> Result<u32> {
        let rpm = rpm.min(self.max_speed());
        debug!(target: self.id.as_str(), "setting motor speed {rpm}rpm");
        self.motor.set_speed(UnitValue::new(rpm, Unit::Rpm))?;
        Ok(rpm)
    }

    pub fn start(&self, rpm: u32) -> Result<()> {
        self.set_speed(rpm)?;
        self.motor.rotate(None).inspect_err(|e| {
            error!(target: self.id.as_str(), "failed to start motor rotation: {e}");
        })
    }

    pub fn reset(&self) -> Result<()> {
        self.motor.reset().inspect_err(|e| {
            error!(target: self.id.as_str(), "failed to reset motor: {e}");
        })
    }

    pub fn stop(&self, immediately: bool) -> Result<()> {
        let stopped = self.motor.stop(immediately);
        match &stopped {
            Ok(()) => debug!(target: self.id.as_str(), "motor stopped"),
            Err(e) if immediately => {
                error!(target: self.id.as_str(), "failed to stop motor immediately: {e}")
            }
            Err(e) => error!(target: self.id.as_str(), "failed to stop motor: {e}"),
        }
        stopped
    }
}
