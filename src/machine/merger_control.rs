//! Coordinates both heaters and the feeder motor.
//!
//! ```text
//!  Off ─SwitchOn─▶ SwitchingOn ─▶ Standby ─StartFeeding─▶ HeatingUp
//!                                   ▲                        │ both heaters in range
//!                                   │                        ▼
//!                       MotorStopped│                      Heated ─StartMotor─▶ Starting
//!                                   │                                             │ MotorStarted
//!                                Stopping ◀──────────── StopFeeding ─────────── Running
//! ```
//!
//! Heater range notifications may arrive in either order.  Each one is
//! recorded, and the guarded entry fires once the other heater already
//! reported.

use std::sync::Arc;

use log::{info, warn};
use serde_json::{Value, json};

use super::protocol::{
    FILAMENT_MERGER_CONTROL, HeaterProtocol, MERGER_HEATER, PRE_HEATER, feeder_motor,
    merger_control as ids,
};
use crate::broker::MessageBroker;
use crate::component::property::PROPERTY_VALUE_KEY;
use crate::component::{
    ComponentBuilder, EventPusher, NotificationId, RequestId, Sender, ServiceComponent, Transition,
};
use crate::config::{MachineConfig, SystemConfig};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Off,
    SwitchingOn,
    Standby,
    HeatingUp,
    Heated,
    Starting,
    Running,
    Stopping,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    SwitchOn,
    SwitchOnSucceeded,
    SwitchOff,
    StartFeeding,
    StopFeeding,
    MergerHeaterReached,
    PreHeaterReached,
    StartMotor,
    MotorStarted,
    MotorStopped,
    IncreaseMotorSpeed,
    DecreaseMotorSpeed,
    ErrorOccurred,
}

pub type FilamentMergerControl = ServiceComponent<ControlState, ControlEvent, ControlContext>;

pub struct ControlContext {
    sender: Arc<dyn Sender>,
    events: EventPusher<ControlEvent>,
    merger_heater_reached: bool,
    pre_heater_reached: bool,
    motor_speed: u32,
    motor_speed_max: u32,
    motor_speed_increment: u32,
}

impl ControlContext {
    pub fn new(
        sender: Arc<dyn Sender>,
        events: EventPusher<ControlEvent>,
        config: &MachineConfig,
    ) -> Self {
        Self {
            sender,
            events,
            merger_heater_reached: false,
            pre_heater_reached: false,
            motor_speed: config.motor_speed_default,
            motor_speed_max: config.motor_speed_max,
            motor_speed_increment: config.motor_speed_increment,
        }
    }

    /// Speed the feeder is driven at on the next start.
    pub fn motor_speed(&self) -> u32 {
        self.motor_speed
    }

    fn send(&self, request: &RequestId, parameters: &Value) -> bool {
        match self.sender.send(request, parameters) {
            Ok(_) => true,
            Err(e) => {
                warn!(target: FILAMENT_MERGER_CONTROL, "request {request} failed: {e}");
                false
            }
        }
    }

    fn notify(&self, notification: &NotificationId) {
        if let Err(e) = self.sender.notify(notification, &Value::Null) {
            warn!(target: FILAMENT_MERGER_CONTROL, "failed to notify {notification}: {e}");
        }
    }

    fn fail(&self) {
        self.events.push(ControlEvent::ErrorOccurred);
    }

    fn switch_off_heater(&self, heater: &HeaterProtocol) {
        self.send(&heater.switch_off, &Value::Null);
    }

    fn switch_off_all(&self) {
        self.send(&feeder_motor::SWITCH_OFF, &Value::Null);
        self.switch_off_heater(&MERGER_HEATER);
        self.switch_off_heater(&PRE_HEATER);
    }

    fn record_heater(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::MergerHeaterReached => self.merger_heater_reached = true,
            ControlEvent::PreHeaterReached => self.pre_heater_reached = true,
            _ => {}
        }
    }
}

pub fn transitions() -> Vec<Transition<ControlState, ControlEvent, ControlContext>> {
    use ControlEvent as E;
    use ControlState as S;

    let mut table = vec![
        Transition::new(S::Off, E::SwitchOn, S::SwitchingOn).action(switch_on),
        Transition::new(S::SwitchingOn, E::SwitchOnSucceeded, S::Standby),
        Transition::new(S::Standby, E::StartFeeding, S::HeatingUp).action(heat_up),
        Transition::new(S::HeatingUp, E::MergerHeaterReached, S::Heated)
            .guard(pre_heater_ready)
            .action(heated_up),
        Transition::new(S::HeatingUp, E::MergerHeaterReached, S::HeatingUp).action(record_heater),
        Transition::new(S::HeatingUp, E::PreHeaterReached, S::Heated)
            .guard(merger_heater_ready)
            .action(heated_up),
        Transition::new(S::HeatingUp, E::PreHeaterReached, S::HeatingUp).action(record_heater),
        Transition::new(S::HeatingUp, E::StopFeeding, S::Standby).action(abort_heating),
        Transition::new(S::Heated, E::StartMotor, S::Starting).action(start_motor),
        Transition::new(S::Heated, E::StopFeeding, S::Standby).action(abort_heating),
        Transition::new(S::Starting, E::MotorStarted, S::Running).action(notify_running),
        Transition::new(S::Starting, E::StopFeeding, S::Stopping).action(stop_feeding),
        Transition::new(S::Running, E::StopFeeding, S::Stopping).action(stop_feeding),
        Transition::new(S::Stopping, E::MotorStopped, S::Standby).action(notify_stopped),
        Transition::new(S::Error, E::SwitchOff, S::Off).action(switch_off),
    ];
    for state in [S::Standby, S::Running] {
        table.push(Transition::new(state, E::IncreaseMotorSpeed, state).action(change_speed));
        table.push(Transition::new(state, E::DecreaseMotorSpeed, state).action(change_speed));
    }
    for from in [
        S::SwitchingOn,
        S::Standby,
        S::HeatingUp,
        S::Heated,
        S::Starting,
        S::Running,
        S::Stopping,
    ] {
        table.push(Transition::new(from, E::SwitchOff, S::Off).action(switch_off));
        table.push(Transition::new(from, E::ErrorOccurred, S::Error).action(handle_error));
    }
    table
}

/// Wire the merger control component onto `broker`.
pub fn build(broker: Arc<MessageBroker>, config: &SystemConfig) -> Result<FilamentMergerControl> {
    use ControlEvent as E;

    let builder = ComponentBuilder::new(broker, &config.component)
        .command(ids::SWITCH_ON, E::SwitchOn)
        .command(ids::SWITCH_OFF, E::SwitchOff)
        .command(ids::START_FEEDING, E::StartFeeding)
        .command(ids::STOP_FEEDING, E::StopFeeding)
        .command(ids::INCREASE_MOTOR_SPEED, E::IncreaseMotorSpeed)
        .command(ids::DECREASE_MOTOR_SPEED, E::DecreaseMotorSpeed)
        .state_query(ids::GET_STATE)
        .notification(MERGER_HEATER.target_temperature_range_reached, E::MergerHeaterReached)
        .notification(PRE_HEATER.target_temperature_range_reached, E::PreHeaterReached)
        .notification(feeder_motor::START_MOTOR_SUCCEEDED, E::MotorStarted)
        .notification(feeder_motor::STOP_MOTOR_SUCCEEDED, E::MotorStopped)
        .notification(feeder_motor::ERROR_OCCURRED, E::ErrorOccurred)
        .notification(MERGER_HEATER.error_occurred, E::ErrorOccurred)
        .notification(PRE_HEATER.error_occurred, E::ErrorOccurred);

    let handle = builder.handle();
    let context = ControlContext::new(Arc::new(handle.clone()), handle.pusher(), &config.machine);
    builder.build(ControlState::Off, transitions(), context)
}

// ── Guards ────────────────────────────────────────────────────

fn pre_heater_ready(ctx: &ControlContext) -> bool {
    ctx.pre_heater_reached
}

fn merger_heater_ready(ctx: &ControlContext) -> bool {
    ctx.merger_heater_reached
}

// ── Actions ───────────────────────────────────────────────────

fn switch_on(ctx: &mut ControlContext, _: ControlEvent, _: ControlState) {
    ctx.merger_heater_reached = false;
    ctx.pre_heater_reached = false;
    if ctx.send(&feeder_motor::SWITCH_ON, &Value::Null) {
        ctx.events.push(ControlEvent::SwitchOnSucceeded);
    } else {
        ctx.fail();
    }
}

fn heat_up(ctx: &mut ControlContext, _: ControlEvent, _: ControlState) {
    ctx.merger_heater_reached = false;
    ctx.pre_heater_reached = false;
    let pre = ctx.send(&PRE_HEATER.switch_on, &Value::Null);
    let merger = ctx.send(&MERGER_HEATER.switch_on, &Value::Null);
    if !(pre && merger) {
        ctx.fail();
    }
}

fn record_heater(ctx: &mut ControlContext, event: ControlEvent, _: ControlState) {
    ctx.record_heater(event);
}

fn heated_up(ctx: &mut ControlContext, event: ControlEvent, _: ControlState) {
    ctx.record_heater(event);
    info!(target: FILAMENT_MERGER_CONTROL, "both heaters in target range");
    ctx.notify(&ids::HEATED_UP);
    ctx.events.push(ControlEvent::StartMotor);
}

fn start_motor(ctx: &mut ControlContext, _: ControlEvent, _: ControlState) {
    let speed = json!({ PROPERTY_VALUE_KEY: ctx.motor_speed });
    if !ctx.send(&feeder_motor::SET_MOTOR_SPEED, &speed)
        || !ctx.send(&feeder_motor::START_MOTOR, &Value::Null)
    {
        ctx.fail();
    }
}

fn notify_running(ctx: &mut ControlContext, _: ControlEvent, _: ControlState) {
    ctx.notify(&ids::FEEDING_RUNNING);
}

fn stop_feeding(ctx: &mut ControlContext, _: ControlEvent, _: ControlState) {
    ctx.switch_off_heater(&MERGER_HEATER);
    ctx.switch_off_heater(&PRE_HEATER);
    if !ctx.send(&feeder_motor::STOP_MOTOR, &Value::Null) {
        ctx.fail();
    }
}

fn abort_heating(ctx: &mut ControlContext, _: ControlEvent, _: ControlState) {
    ctx.switch_off_heater(&MERGER_HEATER);
    ctx.switch_off_heater(&PRE_HEATER);
    ctx.notify(&ids::FEEDING_STOPPED);
}

fn notify_stopped(ctx: &mut ControlContext, _: ControlEvent, _: ControlState) {
    ctx.notify(&ids::FEEDING_STOPPED);
}

fn change_speed(ctx: &mut ControlContext, event: ControlEvent, _: ControlState) {
    let speed = match event {
        ControlEvent::IncreaseMotorSpeed => ctx
            .motor_speed
            .saturating_add(ctx.motor_speed_increment)
            .min(ctx.motor_speed_max),
        _ => ctx.motor_speed.saturating_sub(ctx.motor_speed_increment),
    };
    if speed == ctx.motor_speed {
        return;
    }
    if ctx.send(&feeder_motor::SET_MOTOR_SPEED, &json!({ PROPERTY_VALUE_KEY: speed })) {
        ctx.motor_speed = speed;
    }
}

fn switch_off(ctx: &mut ControlContext, _: ControlEvent, _: ControlState) {
    ctx.switch_off_all();
}

fn handle_error(ctx: &mut ControlContext, _: ControlEvent, _: ControlState) {
    ctx.switch_off_all();
    ctx.notify(&ids::ERROR_OCCURRED);
}
