//! Execution bundles and groups with real machine components.

use std::sync::Arc;

use filamachine::error::{Error, HalError};
use filamachine::execution::{ExecutionBundle, ExecutionGroup};
use filamachine::hal::PinState;
use filamachine::hal::sim::{SimGpioPin, SimHal, SimMachine, SimTemperatureSensor};
use filamachine::machine::{
    self, ControlState, FILAMENT_FEEDER_MOTOR, FILAMENT_MERGER_CONTROL, FILAMENT_MERGER_HEATER,
    FeederState, FilamentFeederMotor, FilamentMergerControl, HeaterComponent, HeaterState,
    MERGER_HEATER, heater,
};
use filamachine::transport::InprocRegistry;

use super::support::config;

fn heater_bundle(registry: &InprocRegistry, id: &str) -> ExecutionBundle<HeaterComponent> {
    let cfg = config();
    ExecutionBundle::new(id, registry, &cfg, |broker| {
        heater::build(
            broker,
            MERGER_HEATER,
            Arc::new(SimGpioPin::output(PinState::Low)),
            Arc::new(SimTemperatureSensor::fixed(20)),
            &cfg,
        )
    })
    .unwrap()
}

#[test]
fn machine_group_starts_every_component_switched_off() {
    let registry = InprocRegistry::new();
    let sim = SimMachine::new(100, 20, 5);
    let group = machine::build_group(&registry, &sim.hal(), &config()).unwrap();
    assert_eq!(group.len(), 4);

    assert!(group.start());
    assert!(group.is_running());

    let control = group
        .component::<FilamentMergerControl>(FILAMENT_MERGER_CONTROL)
        .unwrap();
    let feeder = group
        .component::<FilamentFeederMotor>(FILAMENT_FEEDER_MOTOR)
        .unwrap();
    let merger = group
        .component::<HeaterComponent>(FILAMENT_MERGER_HEATER)
        .unwrap();
    assert_eq!(control.current_state(), ControlState::Off);
    assert_eq!(feeder.current_state(), FeederState::Off);
    assert_eq!(merger.current_state(), HeaterState::Off);

    // wrong type for the id
    assert!(group.component::<FilamentFeederMotor>(FILAMENT_MERGER_CONTROL).is_none());

    group.stop();
    group.wait_until_finished();
    assert!(!group.is_running());
}

#[test]
fn group_start_reports_a_bundle_that_cannot_bind() {
    let registry = InprocRegistry::new();
    let group = ExecutionGroup::new()
        .with(heater_bundle(&registry, "Twin"))
        .with(heater_bundle(&registry, "Twin"))
        .with(heater_bundle(&registry, "Single"));

    assert!(!group.start());
    // the first twin and the single one still run
    assert!(group.is_running());
    assert!(group.bundle("Single").is_some_and(|b| b.is_running()));

    group.stop();
    assert!(!group.is_running());
}

#[test]
fn missing_device_fails_the_build() {
    let registry = InprocRegistry::new();
    let result = machine::build_group(&registry, &SimHal::default(), &config());
    assert!(matches!(result, Err(Error::Hal(HalError::UnknownDevice(_)))));
}

#[test]
fn invalid_configuration_is_rejected_before_building() {
    let registry = InprocRegistry::new();
    let sim = SimMachine::new(100, 20, 5);
    let mut cfg = config();
    cfg.machine.motor_speed_default = cfg.machine.motor_speed_max + 1;
    let result = machine::build_group(&registry, &sim.hal(), &cfg);
    assert!(matches!(result, Err(Error::Config(_))));
}
