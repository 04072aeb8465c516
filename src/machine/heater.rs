//! Filament heaters (merger heater and pre-heater share this component).
//!
//! ```text
//!  Off ──SwitchOn──▶ SwitchingOn ──SwitchOnSucceeded──▶ Heating ◀──MinTemperatureReached──┐
//!                                                          │                              │
//!                                                          └──MaxTemperatureReached──▶ Idle
//! ```
//!
//! `Heating → Idle` notifies TargetTemperatureRangeReached, `Idle → Heating`
//! notifies TargetTemperatureRangeLeft.  A relay that cannot be released
//! on SwitchOff sends the heater from Off straight on to Error.

use std::sync::Arc;

use log::{debug, warn};
use serde_json::{Value, json};

use super::heater_service::{HeaterService, HeaterSignal};
use super::protocol::{HeaterProtocol, TEMPERATURE_KEY};
use crate::broker::MessageBroker;
use crate::component::{
    ComponentBuilder, EventPusher, NotificationId, Sender, ServiceComponent, Transition,
};
use crate::config::SystemConfig;
use crate::error::Result;
use crate::hal::{GpioPin, TemperatureSensor};
use crate::message::create_response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterState {
    Off,
    SwitchingOn,
    Heating,
    Idle,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterEvent {
    SwitchOn,
    SwitchOnSucceeded,
    SwitchOff,
    MaxTemperatureReached,
    MinTemperatureReached,
    ErrorOccurred,
}

pub type HeaterComponent = ServiceComponent<HeaterState, HeaterEvent, HeaterContext>;

pub struct HeaterContext {
    protocol: HeaterProtocol,
    sender: Arc<dyn Sender>,
    events: EventPusher<HeaterEvent>,
    service: HeaterService,
}

impl HeaterContext {
    pub fn new(
        protocol: HeaterProtocol,
        sender: Arc<dyn Sender>,
        events: EventPusher<HeaterEvent>,
        service: HeaterService,
    ) -> Self {
        Self {
            protocol,
            sender,
            events,
            service,
        }
    }

    fn notify(&self, notification: &NotificationId) {
        if let Err(e) = self.sender.notify(notification, &Value::Null) {
            warn!(target: self.protocol.address, "failed to notify {notification}: {e}");
        }
    }

    fn fail(&self) {
        self.events.push(HeaterEvent::ErrorOccurred);
    }
}

pub fn transitions() -> Vec<Transition<HeaterState, HeaterEvent, HeaterContext>> {
    use HeaterEvent as E;
    use HeaterState as S;

    let mut table = vec![
        Transition::new(S::Off, E::SwitchOn, S::SwitchingOn).action(switch_on),
        Transition::new(S::SwitchingOn, E::SwitchOnSucceeded, S::Heating).action(start_heating),
        Transition::new(S::Heating, E::MaxTemperatureReached, S::Idle).action(stop_heating),
        Transition::new(S::Idle, E::MinTemperatureReached, S::Heating).action(start_heating),
        Transition::new(S::Error, E::SwitchOff, S::Off).action(switch_off),
    ];
    for from in [S::SwitchingOn, S::Heating, S::Idle] {
        table.push(Transition::new(from, E::SwitchOff, S::Off).action(switch_off));
    }
    for from in [S::Off, S::SwitchingOn, S::Heating, S::Idle] {
        table.push(Transition::new(from, E::ErrorOccurred, S::Error).action(handle_error));
    }
    table
}

/// Wire a heater component onto `broker`, driving `relay` and reading
/// `sensor`.
pub fn build(
    broker: Arc<MessageBroker>,
    protocol: HeaterProtocol,
    relay: Arc<dyn GpioPin>,
    sensor: Arc<dyn TemperatureSensor>,
    config: &SystemConfig,
) -> Result<HeaterComponent> {
    let machine = &config.machine;
    let service = HeaterService::new(
        protocol.address,
        relay,
        sensor,
        (machine.heater_min_temperature, machine.heater_max_temperature),
        machine.temperature_observation_interval(),
    );
    let reading = service.reading();

    let builder = ComponentBuilder::new(broker, &config.component)
        .command(protocol.switch_on, HeaterEvent::SwitchOn)
        .command(protocol.switch_off, HeaterEvent::SwitchOff)
        .state_query(protocol.get_state)
        .request(protocol.get_temperature, move |message| {
            create_response(message, &json!({ TEMPERATURE_KEY: reading.get() }))
        });

    let handle = builder.handle();
    let context = HeaterContext::new(protocol, Arc::new(handle.clone()), handle.pusher(), service);
    builder.build(HeaterState::Off, transitions(), context)
}

// ── Actions ───────────────────────────────────────────────────

fn switch_on(ctx: &mut HeaterContext, _: HeaterEvent, _: HeaterState) {
    if ctx.service.update_temperature().is_err() {
        ctx.fail();
        return;
    }
    ctx.events.push(HeaterEvent::SwitchOnSucceeded);

    let events = ctx.events.clone();
    let id = ctx.protocol.address;
    let observed = ctx.service.start_observation(move |signal| {
        let event = match signal {
            HeaterSignal::MaxTemperatureReached => HeaterEvent::MaxTemperatureReached,
            HeaterSignal::MinTemperatureReached => HeaterEvent::MinTemperatureReached,
            HeaterSignal::SensorFailed => HeaterEvent::ErrorOccurred,
        };
        if !events.push(event) {
            debug!(target: id, "dropped {event:?}");
        }
    });
    if observed.is_err() {
        ctx.fail();
    }
}

fn start_heating(ctx: &mut HeaterContext, event: HeaterEvent, _: HeaterState) {
    if ctx.service.switch_heater(true).is_err() {
        ctx.fail();
        return;
    }
    if event == HeaterEvent::MinTemperatureReached {
        ctx.notify(&ctx.protocol.target_temperature_range_left);
    }
}

fn stop_heating(ctx: &mut HeaterContext, event: HeaterEvent, _: HeaterState) {
    if ctx.service.switch_heater(false).is_err() {
        ctx.fail();
        return;
    }
    if event == HeaterEvent::MaxTemperatureReached {
        ctx.notify(&ctx.protocol.target_temperature_range_reached);
    }
}

fn switch_off(ctx: &mut HeaterContext, _: HeaterEvent, _: HeaterState) {
    ctx.service.stop_observation();
    if ctx.service.switch_heater(false).is_err() {
        ctx.fail();
    }
}

// The relay failure itself is logged by the heater service.
fn handle_error(ctx: &mut HeaterContext, _: HeaterEvent, _: HeaterState) {
    ctx.service.stop_observation();
    let _ = ctx.service.switch_heater(false);
    ctx.notify(&ctx.protocol.error_occurred);
}
