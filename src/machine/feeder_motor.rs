//! Filament feeder stepper motor.
//!
//! ```text
//!  Off ──SwitchOn──▶ Standby ──StartMotor──▶ Starting ──StartMotorSucceeded──▶ Running
//!                      ▲                                                        │
//!                      └──────── StopMotorSucceeded ◀── Stopping ◀──StopMotor───┘
//!
//!  any ──SwitchOff──▶ Off          any ──ErrorOccurred──▶ Error
//! ```
//!
//! A motor that refuses to stop is an error, including on the way to Off.

use std::sync::Arc;

use log::warn;
use serde_json::Value;

use super::motor_service::MotorService;
use super::protocol::{FILAMENT_FEEDER_MOTOR, feeder_motor as ids};
use crate::broker::MessageBroker;
use crate::component::{
    ComponentBuilder, EventPusher, NotificationId, Property, Sender, ServiceComponent, Transition,
};
use crate::config::SystemConfig;
use crate::error::Result;
use crate::hal::{Hal, id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederState {
    Off,
    Standby,
    Starting,
    Running,
    Stopping,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederEvent {
    SwitchOn,
    SwitchOff,
    StartMotor,
    StartMotorSucceeded,
    StopMotor,
    StopMotorSucceeded,
    SpeedChanged,
    ErrorOccurred,
}

pub type FilamentFeederMotor = ServiceComponent<FeederState, FeederEvent, FeederContext>;

pub struct FeederContext {
    sender: Arc<dyn Sender>,
    events: EventPusher<FeederEvent>,
    motor: MotorService,
    speed: Arc<Property<u32>>,
}

impl FeederContext {
    pub fn new(
        sender: Arc<dyn Sender>,
        events: EventPusher<FeederEvent>,
        motor: MotorService,
        speed: Arc<Property<u32>>,
    ) -> Self {
        Self {
            sender,
            events,
            motor,
            speed,
        }
    }

    fn notify(&self, notification: &NotificationId) {
        if let Err(e) = self.sender.notify(notification, &Value::Null) {
            warn!(target: FILAMENT_FEEDER_MOTOR, "failed to notify {notification}: {e}");
        }
    }

    fn fail(&self) {
        self.events.push(FeederEvent::ErrorOccurred);
    }
}

pub fn transitions() -> Vec<Transition<FeederState, FeederEvent, FeederContext>> {
    use FeederEvent as E;
    use FeederState as S;

    let mut table = vec![
        Transition::new(S::Off, E::SwitchOn, S::Standby).action(switch_on),
        Transition::new(S::Standby, E::StartMotor, S::Starting).action(start_motor),
        Transition::new(S::Starting, E::StartMotorSucceeded, S::Running),
        Transition::new(S::Running, E::SpeedChanged, S::Running).action(apply_speed),
        Transition::new(S::Running, E::StopMotor, S::Stopping).action(stop_motor),
        Transition::new(S::Stopping, E::StopMotorSucceeded, S::Standby),
        Transition::new(S::Error, E::SwitchOff, S::Off).action(switch_off),
    ];
    for from in [S::Standby, S::Starting, S::Running, S::Stopping] {
        table.push(Transition::new(from, E::SwitchOff, S::Off).action(switch_off));
    }
    for from in [S::Off, S::Standby, S::Starting, S::Running, S::Stopping] {
        table.push(Transition::new(from, E::ErrorOccurred, S::Error).action(handle_error));
    }
    table
}

/// Wire the feeder motor component onto `broker`.
pub fn build(
    broker: Arc<MessageBroker>,
    hal: &dyn Hal,
    config: &SystemConfig,
) -> Result<FilamentFeederMotor> {
    let machine = &config.machine;
    let motor = MotorService::new(
        FILAMENT_FEEDER_MOTOR,
        hal.stepper_motor(id::STEPPER_MOTOR_FEEDER)?,
    );
    let speed = Arc::new(Property::new(
        "MotorSpeed",
        machine.motor_speed_default,
        0,
        machine.motor_speed_max,
    ));

    let builder = ComponentBuilder::new(broker, &config.component)
        .command(ids::SWITCH_ON, FeederEvent::SwitchOn)
        .command(ids::SWITCH_OFF, FeederEvent::SwitchOff)
        .command(ids::START_MOTOR, FeederEvent::StartMotor)
        .command(ids::STOP_MOTOR, FeederEvent::StopMotor)
        .state_query(ids::GET_STATE)
        .get_property(ids::GET_MOTOR_SPEED, speed.clone())
        .set_property(ids::SET_MOTOR_SPEED, speed.clone(), Some(FeederEvent::SpeedChanged));

    let handle = builder.handle();
    let context = FeederContext::new(Arc::new(handle.clone()), handle.pusher(), motor, speed);
    builder.build(FeederState::Off, transitions(), context)
}

// ── Actions ───────────────────────────────────────────────────

fn switch_on(ctx: &mut FeederContext, _: FeederEvent, _: FeederState) {
    if ctx.motor.reset().is_err() {
        ctx.fail();
    }
}

fn start_motor(ctx: &mut FeederContext, _: FeederEvent, _: FeederState) {
    if ctx.motor.start(ctx.speed.get()).is_ok() {
        ctx.events.push(FeederEvent::StartMotorSucceeded);
        ctx.notify(&ids::START_MOTOR_SUCCEEDED);
    } else {
        ctx.fail();
    }
}

fn apply_speed(ctx: &mut FeederContext, _: FeederEvent, _: FeederState) {
    if ctx.motor.set_speed(ctx.speed.get()).is_err() {
        ctx.fail();
    }
}

fn stop_motor(ctx: &mut FeederContext, _: FeederEvent, _: FeederState) {
    if ctx.motor.stop(false).is_err() {
        ctx.fail();
        return;
    }
    ctx.events.push(FeederEvent::StopMotorSucceeded);
    ctx.notify(&ids::STOP_MOTOR_SUCCEEDED);
}

fn switch_off(ctx: &mut FeederContext, _: FeederEvent, _: FeederState) {
    if ctx.motor.stop(false).is_err() {
        ctx.fail();
    }
}

// Already failing; a refused emergency stop is logged by the motor service.
fn handle_error(ctx: &mut FeederContext, _: FeederEvent, _: FeederState) {
    let _ = ctx.motor.stop(true);
    ctx.notify(&ids::ERROR_OCCURRED);
}
