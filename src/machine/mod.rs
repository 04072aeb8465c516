//! Filament machine components and their wiring.
//!
//! ```text
//!                   FilamentMergerControl
//!            send ┌─────────┼──────────┐ send
//!                 ▼         ▼          ▼
//!   FilamentFeederMotor  FilamentMergerHeater  FilamentPreHeater
//!        (stepper)        (relay + sensor)     (relay + sensor)
//!                 └──── notifications ───▶ FilamentMergerControl
//! ```

pub mod feeder_motor;
pub mod heater;
pub mod heater_service;
pub mod merger_control;
pub mod motor_service;
pub mod protocol;

use log::info;

use crate::config::SystemConfig;
use crate::error::Result;
use crate::execution::{ExecutionBundle, ExecutionGroup};
use crate::hal::{Hal, id};
use crate::transport::InprocRegistry;

pub use feeder_motor::{FeederState, FilamentFeederMotor};
pub use heater::{HeaterComponent, HeaterState};
pub use merger_control::{ControlState, FilamentMergerControl};
pub use protocol::{
    FILAMENT_FEEDER_MOTOR, FILAMENT_MERGER_CONTROL, FILAMENT_MERGER_HEATER, FILAMENT_PRE_HEATER,
    MERGER_HEATER, PRE_HEATER,
};

/// Build the four machine bundles on `registry`, taking devices from `hal`.
pub fn build_group(
    registry: &InprocRegistry,
    hal: &dyn Hal,
    config: &SystemConfig,
) -> Result<ExecutionGroup> {
    config.validate()?;

    let control = ExecutionBundle::new(FILAMENT_MERGER_CONTROL, registry, config, |broker| {
        merger_control::build(broker, config)
    })?;
    let feeder = ExecutionBundle::new(FILAMENT_FEEDER_MOTOR, registry, config, |broker| {
        feeder_motor::build(broker, hal, config)
    })?;
    let merger_heater = ExecutionBundle::new(FILAMENT_MERGER_HEATER, registry, config, |broker| {
        heater::build(
            broker,
            MERGER_HEATER,
            hal.gpio_pin(id::RELAY_HEATER_MERGER)?,
            hal.temperature_sensor(id::TEMPERATURE_SENSOR_MERGER)?,
            config,
        )
    })?;
    let pre_heater = ExecutionBundle::new(FILAMENT_PRE_HEATER, registry, config, |broker| {
        heater::build(
            broker,
            PRE_HEATER,
            hal.gpio_pin(id::RELAY_HEATER_FEEDER)?,
            hal.temperature_sensor(id::TEMPERATURE_SENSOR_FEEDER)?,
            config,
        )
    })?;

    let group = ExecutionGroup::new()
        .with(control)
        .with(feeder)
        .with(merger_heater)
        .with(pre_heater);
    info!("machine group assembled ({} bundles)", group.len());
    Ok(group)
}
