//! ServiceComponent routing and lifecycle on a small lamp component.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use filamachine::broker::MessageBroker;
use filamachine::component::{
    ComponentBuilder, EventPusher, NotificationId, Property, RequestId, ServiceComponent,
    Transition,
};
use filamachine::config::SystemConfig;
use filamachine::message::{Message, ResultCode, create_response};
use filamachine::process::Runnable;
use filamachine::transport::InprocRegistry;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::support::{WAIT, broker, config, request, state_of, wait_for_state, wait_until};

const LAMP: &str = "Lamp";
const TOGGLE: RequestId = RequestId::new(LAMP, "Toggle");
const GET_STATE: RequestId = RequestId::new(LAMP, "GetState");
const GET_BRIGHTNESS: RequestId = RequestId::new(LAMP, "GetBrightness");
const SET_BRIGHTNESS: RequestId = RequestId::new(LAMP, "SetBrightness");
const PING: RequestId = RequestId::new(LAMP, "Ping");
const UNKNOWN: RequestId = RequestId::new(LAMP, "Dance");
const FLIPPED: NotificationId = NotificationId::new("WallSwitch", "Flipped");
const KNOB_TURNED: NotificationId = NotificationId::new("Knob", "Turned");
const KNOB_PRESSED: NotificationId = NotificationId::new("Knob", "Pressed");
const NOWHERE: RequestId = RequestId::new("Nowhere", "SetBrightness");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LampState {
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LampEvent {
    Toggle,
    BrightnessChanged,
}

struct LampContext {
    brightness: Arc<Property<u32>>,
    applied: Arc<AtomicU32>,
}

type Lamp = ServiceComponent<LampState, LampEvent, LampContext>;

fn apply_brightness(ctx: &mut LampContext, _: LampEvent, _: LampState) {
    ctx.applied.store(ctx.brightness.get(), Ordering::SeqCst);
}

fn lamp(broker: Arc<MessageBroker>, config: &SystemConfig) -> (Lamp, Arc<AtomicU32>) {
    let brightness = Arc::new(Property::new("Brightness", 50, 0, 100));
    let applied = Arc::new(AtomicU32::new(0));
    let builder = ComponentBuilder::new(broker, &config.component)
        .command(TOGGLE, LampEvent::Toggle)
        .state_query(GET_STATE)
        .get_property(GET_BRIGHTNESS, brightness.clone())
        .set_property(SET_BRIGHTNESS, brightness.clone(), Some(LampEvent::BrightnessChanged))
        .request(PING, |m: &Message| create_response(m, &json!({ "pong": true })))
        .notification(FLIPPED, LampEvent::Toggle);
    let table = vec![
        Transition::new(LampState::Off, LampEvent::Toggle, LampState::On),
        Transition::new(LampState::On, LampEvent::Toggle, LampState::Off),
        Transition::new(LampState::On, LampEvent::BrightnessChanged, LampState::On)
            .action(apply_brightness),
    ];
    let context = LampContext {
        brightness,
        applied: Arc::clone(&applied),
    };
    let component = builder.build(LampState::Off, table, context).unwrap();
    (component, applied)
}

struct Rig {
    lamp: Lamp,
    applied: Arc<AtomicU32>,
    caller: Arc<MessageBroker>,
}

fn rig(registry: &InprocRegistry) -> Rig {
    let cfg = config();
    let (lamp, applied) = lamp(broker(registry, LAMP, &cfg), &cfg);
    lamp.start().unwrap();
    Rig {
        lamp,
        applied,
        caller: broker(registry, "Caller", &cfg),
    }
}

#[test]
fn command_drives_the_state_machine() {
    let registry = InprocRegistry::new();
    let rig = rig(&registry);
    assert_eq!(state_of(&rig.caller, &GET_STATE), "Off");

    assert!(request(&rig.caller, &TOGGLE, &Value::Null).is_success());
    assert!(wait_for_state(&rig.caller, &GET_STATE, "On"));
    assert_eq!(rig.lamp.current_state(), LampState::On);
    rig.lamp.stop();
}

#[test]
fn property_updates_are_range_checked() {
    let registry = InprocRegistry::new();
    let rig = rig(&registry);
    request(&rig.caller, &TOGGLE, &Value::Null);
    assert!(wait_for_state(&rig.caller, &GET_STATE, "On"));

    let rejected = request(&rig.caller, &SET_BRIGHTNESS, &json!({ "value": 150 }));
    assert_eq!(rejected.result, ResultCode::InvalidPayload);
    let malformed = request(&rig.caller, &SET_BRIGHTNESS, &json!({ "level": 10 }));
    assert_eq!(malformed.result, ResultCode::InvalidPayload);

    let accepted = request(&rig.caller, &SET_BRIGHTNESS, &json!({ "value": 80 }));
    assert!(accepted.is_success());
    let current = request(&rig.caller, &GET_BRIGHTNESS, &Value::Null);
    assert_eq!(current.payload_json().unwrap(), json!({ "value": 80 }));
    assert!(wait_until(WAIT, || rig.applied.load(Ordering::SeqCst) == 80));
    rig.lamp.stop();
}

#[test]
fn custom_and_unknown_requests() {
    let registry = InprocRegistry::new();
    let rig = rig(&registry);

    let pong = request(&rig.caller, &PING, &Value::Null);
    assert_eq!(pong.payload_json().unwrap()["pong"], true);

    let unknown = request(&rig.caller, &UNKNOWN, &Value::Null);
    assert_eq!(unknown.result, ResultCode::UnsupportedRequest);
    rig.lamp.stop();
}

#[test]
fn subscribed_notification_becomes_an_event() {
    let registry = InprocRegistry::new();
    let cfg = config();
    let wall_switch = broker(&registry, "WallSwitch", &cfg);
    wall_switch.start().unwrap();
    let rig = rig(&registry);

    let mut flip = Message::new(FLIPPED.message_id());
    wall_switch.notify(&mut flip, FLIPPED.topic()).unwrap();
    assert!(wait_for_state(&rig.caller, &GET_STATE, "On"));

    rig.lamp.stop();
    wall_switch.stop();
}

#[test]
fn restart_after_stop_keeps_state_and_serves_again() {
    let registry = InprocRegistry::new();
    let mut rig = rig(&registry);
    request(&rig.caller, &TOGGLE, &Value::Null);
    assert!(wait_for_state(&rig.caller, &GET_STATE, "On"));

    rig.lamp.stop();
    assert!(!rig.lamp.is_running());
    let mut cfg = config();
    cfg.broker.send_attempts = 1;
    rig.caller = broker(&registry, "Caller2", &cfg);
    let mut query = Message::new(GET_STATE.message_id());
    assert!(rig.caller.send(&mut query, LAMP).is_err());

    rig.lamp.start().unwrap();
    assert_eq!(state_of(&rig.caller, &GET_STATE), "On");
    request(&rig.caller, &TOGGLE, &Value::Null);
    assert!(wait_for_state(&rig.caller, &GET_STATE, "Off"));
    rig.lamp.stop();
    rig.lamp.wait_until_finished();
    assert!(!rig.lamp.is_running());
}

#[test]
fn commands_right_after_a_restart_are_queued() {
    let registry = InprocRegistry::new();
    let rig = rig(&registry);
    let mut cfg = config();
    cfg.broker.send_attempts = 1;
    let eager = broker(&registry, "Eager", &cfg);

    for _ in 0..20 {
        rig.lamp.stop();
        let racer = std::thread::scope(|scope| {
            let racer = scope.spawn(|| loop {
                let mut toggle = Message::new(TOGGLE.message_id());
                if let Ok(response) = eager.send(&mut toggle, LAMP) {
                    break response;
                }
            });
            rig.lamp.start().unwrap();
            racer.join().unwrap()
        });
        assert!(racer.is_success(), "first command after restart: {racer}");
    }
    rig.lamp.stop();
}

/// Dimmer relays knob notifications to the lamp as requests.
#[test]
fn notification_route_forwards_to_another_component() {
    let registry = InprocRegistry::new();
    let cfg = config();
    let knob = broker(&registry, "Knob", &cfg);
    knob.start().unwrap();
    let rig = rig(&registry);

    let builder = ComponentBuilder::new(broker(&registry, "Dimmer", &cfg), &cfg.component);
    let handle = builder.handle();
    let answers = Arc::new(Mutex::new(Vec::new()));
    let (turned, pressed) = (Arc::clone(&answers), Arc::clone(&answers));
    let (to_lamp, to_nowhere) = (handle.clone(), handle);
    let dimmer = builder
        .notification_fn(KNOB_TURNED, move |m: &Message, _: &EventPusher<LampEvent>| {
            turned.lock().push(to_lamp.forward(&SET_BRIGHTNESS, m).result);
        })
        .notification_fn(KNOB_PRESSED, move |m: &Message, _: &EventPusher<LampEvent>| {
            pressed.lock().push(to_nowhere.forward(&NOWHERE, m).result);
        })
        .build(LampState::Off, Vec::new(), ())
        .unwrap();
    dimmer.start().unwrap();

    let mut turn = Message::with_json(KNOB_TURNED.message_id(), &json!({ "value": 30 }));
    knob.notify(&mut turn, KNOB_TURNED.topic()).unwrap();
    assert!(wait_until(WAIT, || answers.lock().len() == 1));
    let brightness = request(&rig.caller, &GET_BRIGHTNESS, &Value::Null);
    assert_eq!(brightness.payload_json().unwrap(), json!({ "value": 30 }));

    let mut press = Message::new(KNOB_PRESSED.message_id());
    knob.notify(&mut press, KNOB_PRESSED.topic()).unwrap();
    assert!(wait_until(WAIT, || answers.lock().len() == 2));
    assert_eq!(*answers.lock(), vec![ResultCode::Success, ResultCode::Error]);

    dimmer.stop();
    rig.lamp.stop();
    knob.stop();
}
