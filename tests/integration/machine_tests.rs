//! End-to-end machine scenarios on simulated and mock devices.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use filamachine::broker::MessageBroker;
use filamachine::component::NotificationId;
use filamachine::config::SystemConfig;
use filamachine::execution::{ExecutionBundle, ExecutionGroup};
use filamachine::hal::sim::{SimMachine, SimTemperatureSensor};
use filamachine::hal::{PinState, StepperMotor};
use filamachine::machine::protocol::{TEMPERATURE_KEY, feeder_motor, merger_control};
use filamachine::machine::{
    self, FILAMENT_MERGER_HEATER, HeaterComponent, MERGER_HEATER, PRE_HEATER, heater,
};
use filamachine::message::{Message, MessageId};
use filamachine::process::Runnable;
use filamachine::transport::InprocRegistry;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::mock_hal::RecordingRelay;
use super::support::{WAIT, broker, config, request, state_of, wait_for_state, wait_until};

/// Operator broker that records the ids of every notification it hears.
struct Listener {
    broker: Arc<MessageBroker>,
    heard: Arc<Mutex<Vec<MessageId>>>,
}

impl Listener {
    fn new(registry: &InprocRegistry, cfg: &SystemConfig, topics: &[NotificationId]) -> Self {
        let broker = broker(registry, "Operator", cfg);
        let heard = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&heard);
        broker.set_notification_handler(move |m: &Message| log.lock().push(m.id));
        broker.start().unwrap();
        for id in topics {
            broker.subscribe(id.address(), id.topic()).unwrap();
        }
        Self { broker, heard }
    }

    fn heard(&self, id: &NotificationId) -> bool {
        self.heard.lock().contains(&id.message_id())
    }

    fn heard_in_order(&self) -> Vec<MessageId> {
        self.heard.lock().clone()
    }

    fn times_heard(&self, id: &NotificationId) -> usize {
        self.heard.lock().iter().filter(|m| **m == id.message_id()).count()
    }
}

fn speed_of(broker: &MessageBroker) -> Value {
    request(broker, &feeder_motor::GET_MOTOR_SPEED, &Value::Null)
        .payload_json()
        .unwrap()["value"]
        .clone()
}

// ── Full machine ──────────────────────────────────────────────

#[test]
fn full_feed_cycle() {
    let registry = InprocRegistry::new();
    let cfg = config();
    let sim = SimMachine::new(cfg.machine.motor_speed_max, 20, 15);
    let group = machine::build_group(&registry, &sim.hal(), &cfg).unwrap();
    assert!(group.start());

    let operator = Listener::new(
        &registry,
        &cfg,
        &[
            merger_control::HEATED_UP,
            merger_control::FEEDING_RUNNING,
            merger_control::FEEDING_STOPPED,
        ],
    );
    let op = &operator.broker;

    request(op, &merger_control::SWITCH_ON, &Value::Null);
    assert!(wait_for_state(op, &merger_control::GET_STATE, "Standby"));
    assert_eq!(state_of(op, &feeder_motor::GET_STATE), "Standby");

    request(op, &merger_control::START_FEEDING, &Value::Null);
    assert!(wait_for_state(op, &merger_control::GET_STATE, "Running"));
    assert!(sim.feeder_motor.is_rotating());
    assert_eq!(state_of(op, &feeder_motor::GET_STATE), "Running");
    for heater in [MERGER_HEATER, PRE_HEATER] {
        let reading = request(op, &heater.get_temperature, &Value::Null).payload_json().unwrap();
        // the plant swings around the window once heated
        assert!(reading[TEMPERATURE_KEY].as_i64().unwrap() > 150, "{reading}");
    }

    assert_eq!(speed_of(op), json!(cfg.machine.motor_speed_default));
    request(op, &merger_control::INCREASE_MOTOR_SPEED, &Value::Null);
    let faster = cfg.machine.motor_speed_default + cfg.machine.motor_speed_increment;
    assert!(wait_until(WAIT, || speed_of(op) == json!(faster)));
    assert!(wait_until(WAIT, || sim.feeder_motor.speed().value == faster));

    request(op, &merger_control::STOP_FEEDING, &Value::Null);
    assert!(wait_for_state(op, &merger_control::GET_STATE, "Standby"));
    assert!(!sim.feeder_motor.is_rotating());
    assert!(wait_for_state(op, &MERGER_HEATER.get_state, "Off"));
    assert!(wait_for_state(op, &PRE_HEATER.get_state, "Off"));
    assert!(!sim.merger_relay.is_high());
    assert!(!sim.feeder_relay.is_high());

    assert!(wait_until(WAIT, || operator.heard(&merger_control::FEEDING_STOPPED)));
    assert_eq!(
        operator.heard_in_order(),
        vec![
            merger_control::HEATED_UP.message_id(),
            merger_control::FEEDING_RUNNING.message_id(),
            merger_control::FEEDING_STOPPED.message_id(),
        ]
    );

    request(op, &merger_control::SWITCH_OFF, &Value::Null);
    assert!(wait_for_state(op, &merger_control::GET_STATE, "Off"));
    assert!(wait_for_state(op, &feeder_motor::GET_STATE, "Off"));

    operator.broker.stop();
    group.stop();
    group.wait_until_finished();
}

#[test]
fn motor_failure_puts_the_machine_into_error() {
    let registry = InprocRegistry::new();
    let cfg = config();
    let sim = SimMachine::new(cfg.machine.motor_speed_max, 20, 15);
    let group = machine::build_group(&registry, &sim.hal(), &cfg).unwrap();
    assert!(group.start());
    let operator = Listener::new(
        &registry,
        &cfg,
        &[merger_control::ERROR_OCCURRED, feeder_motor::ERROR_OCCURRED],
    );
    let op = &operator.broker;

    request(op, &merger_control::SWITCH_ON, &Value::Null);
    assert!(wait_for_state(op, &merger_control::GET_STATE, "Standby"));
    request(op, &merger_control::START_FEEDING, &Value::Null);
    assert!(wait_for_state(op, &merger_control::GET_STATE, "Running"));

    sim.feeder_motor.set_failing(true);
    request(op, &merger_control::INCREASE_MOTOR_SPEED, &Value::Null);

    assert!(wait_for_state(op, &merger_control::GET_STATE, "Error"));
    assert!(wait_until(WAIT, || operator.heard(&merger_control::ERROR_OCCURRED)));
    // the control shut everything down on its way into Error; the broken
    // motor refuses to stop, so the feeder stays in Error
    assert!(wait_for_state(op, &MERGER_HEATER.get_state, "Off"));
    assert!(wait_until(WAIT, || operator.times_heard(&feeder_motor::ERROR_OCCURRED) >= 2));
    assert!(wait_for_state(op, &feeder_motor::GET_STATE, "Error"));

    sim.feeder_motor.set_failing(false);
    request(op, &merger_control::SWITCH_OFF, &Value::Null);
    assert!(wait_for_state(op, &merger_control::GET_STATE, "Off"));
    assert!(wait_for_state(op, &feeder_motor::GET_STATE, "Off"));

    operator.broker.stop();
    group.stop();
}

#[test]
fn start_feeding_is_ignored_while_switched_off() {
    let registry = InprocRegistry::new();
    let cfg = config();
    let sim = SimMachine::new(cfg.machine.motor_speed_max, 20, 15);
    let group = machine::build_group(&registry, &sim.hal(), &cfg).unwrap();
    assert!(group.start());
    let op = broker(&registry, "Operator", &cfg);

    assert!(request(&op, &merger_control::START_FEEDING, &Value::Null).is_success());
    thread::sleep(Duration::from_millis(100));
    assert_eq!(state_of(&op, &merger_control::GET_STATE), "Off");
    assert!(!sim.merger_relay.is_high());

    group.stop();
}

// ── Single heater ─────────────────────────────────────────────

struct HeaterRig {
    group: ExecutionGroup,
    relay: Arc<RecordingRelay>,
    sensor: Arc<SimTemperatureSensor>,
    operator: Listener,
}

fn heater_rig(registry: &InprocRegistry, relay: RecordingRelay) -> HeaterRig {
    let cfg = config();
    let relay = Arc::new(relay);
    let sensor = Arc::new(SimTemperatureSensor::fixed(20));
    let bundle: ExecutionBundle<HeaterComponent> = {
        let (relay, sensor) = (relay.clone(), sensor.clone());
        ExecutionBundle::new(FILAMENT_MERGER_HEATER, registry, &cfg, |broker| {
            heater::build(broker, MERGER_HEATER, relay, sensor, &cfg)
        })
        .unwrap()
    };
    let group = ExecutionGroup::new().with(bundle);
    assert!(group.start());
    let operator = Listener::new(
        registry,
        &cfg,
        &[
            MERGER_HEATER.target_temperature_range_reached,
            MERGER_HEATER.target_temperature_range_left,
            MERGER_HEATER.error_occurred,
        ],
    );
    HeaterRig {
        group,
        relay,
        sensor,
        operator,
    }
}

#[test]
fn heater_holds_the_target_window() {
    let registry = InprocRegistry::new();
    let rig = heater_rig(&registry, RecordingRelay::new());
    let op = &rig.operator.broker;

    request(op, &MERGER_HEATER.switch_on, &Value::Null);
    assert!(wait_for_state(op, &MERGER_HEATER.get_state, "Heating"));
    assert!(rig.relay.is_on());

    rig.sensor.set(210);
    assert!(wait_for_state(op, &MERGER_HEATER.get_state, "Idle"));
    assert!(!rig.relay.is_on());
    assert!(wait_until(WAIT, || rig
        .operator
        .heard(&MERGER_HEATER.target_temperature_range_reached)));

    rig.sensor.set(190);
    assert!(wait_for_state(op, &MERGER_HEATER.get_state, "Heating"));
    assert!(wait_until(WAIT, || rig
        .operator
        .heard(&MERGER_HEATER.target_temperature_range_left)));
    let reading = request(op, &MERGER_HEATER.get_temperature, &Value::Null);
    assert_eq!(reading.payload_json().unwrap(), json!({ TEMPERATURE_KEY: 190 }));

    request(op, &MERGER_HEATER.switch_off, &Value::Null);
    assert!(wait_for_state(op, &MERGER_HEATER.get_state, "Off"));
    assert_eq!(
        rig.relay.writes(),
        vec![PinState::High, PinState::Low, PinState::High, PinState::Low]
    );

    rig.operator.broker.stop();
    rig.group.stop();
}

#[test]
fn broken_relay_reports_an_error() {
    let registry = InprocRegistry::new();
    let rig = heater_rig(&registry, RecordingRelay::broken());
    let op = &rig.operator.broker;

    request(op, &MERGER_HEATER.switch_on, &Value::Null);
    assert!(wait_for_state(op, &MERGER_HEATER.get_state, "Error"));
    assert!(wait_until(WAIT, || rig.operator.heard(&MERGER_HEATER.error_occurred)));
    assert!(rig.relay.writes().is_empty());

    // a relay that cannot be released keeps the heater in Error
    request(op, &MERGER_HEATER.switch_off, &Value::Null);
    assert!(wait_until(WAIT, || rig
        .operator
        .times_heard(&MERGER_HEATER.error_occurred)
        >= 2));
    assert!(wait_for_state(op, &MERGER_HEATER.get_state, "Error"));

    rig.operator.broker.stop();
    rig.group.stop();
}
