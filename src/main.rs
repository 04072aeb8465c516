//! Filamachine host entry point.
//!
//! Runs the machine group against the simulated HAL and drives one feed
//! cycle from an operator broker, the way a front panel would.
//!
//! ```text
//!  Operator ──send──▶ FilamentMergerControl ──▶ FeederMotor / Heaters
//!     │                       │
//!     └──── GetState polls ◀──┘
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use log::{info, warn};
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use filamachine::broker::MessageBroker;
use filamachine::component::property::PROPERTY_VALUE_KEY;
use filamachine::component::{RequestId, STATE_KEY};
use filamachine::config::SystemConfig;
use filamachine::hal::sim::SimMachine;
use filamachine::machine::protocol::{TEMPERATURE_KEY, feeder_motor, merger_control};
use filamachine::machine::{self, MERGER_HEATER, PRE_HEATER};
use filamachine::message::Message;
use filamachine::process::Runnable;
use filamachine::transport::{InprocRegistry, IoContext};

const OPERATOR: &str = "Operator";

/// Log filter directives, e.g. `info,FilamentFeederMotor=debug`.
const LOG_FILTER_ENV: &str = "FILAMACHINE_LOG";
const DEFAULT_LOG_FILTER: &str = "info";

// Simulated plant: heats from ambient in steps per sensor read.
const AMBIENT_TEMPERATURE: i32 = 20;
const HEATING_STEP: i32 = 15;

const STATE_POLL: Duration = Duration::from_millis(20);
const STATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends requests on behalf of a human operator.
struct Operator {
    broker: Arc<MessageBroker>,
}

impl Operator {
    fn request(&self, request: &RequestId) -> Result<Value> {
        let mut message = Message::new(request.message_id());
        let response = self
            .broker
            .send(&mut message, request.address())
            .with_context(|| format!("request {request}"))?;
        if !response.is_success() {
            bail!(
                "{request} answered {}: {}",
                response.result.name(),
                response.error_reason().unwrap_or_default()
            );
        }
        Ok(response.payload_json()?)
    }

    fn await_state(&self, query: &RequestId, state: &str) -> Result<()> {
        let deadline = Instant::now() + STATE_TIMEOUT;
        loop {
            let reply = self.request(query)?;
            if reply.get(STATE_KEY).and_then(Value::as_str) == Some(state) {
                info!("{} is {state}", query.address());
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("{} did not reach {state} (last reply {reply})", query.address());
            }
            thread::sleep(STATE_POLL);
        }
    }
}

/// Parsed `FILAMACHINE_LOG` directives; unset or unparsable falls back to `info`.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Route `log` records through a tracing fmt subscriber.
fn init_logging() -> Result<String> {
    let filter = log_filter(std::env::var(LOG_FILTER_ENV).ok());
    let directives = filter.to_string();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .context("installing log subscriber")?;
    Ok(directives)
}

fn simulation_config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.machine.temperature_observation_interval_ms = 50;
    config
}

fn run_feed_cycle(operator: &Operator, sim: &SimMachine) -> Result<()> {
    operator.request(&merger_control::SWITCH_ON)?;
    operator.await_state(&merger_control::GET_STATE, "Standby")?;

    operator.request(&merger_control::START_FEEDING)?;
    operator.await_state(&merger_control::GET_STATE, "Running")?;
    for heater in [MERGER_HEATER, PRE_HEATER] {
        let reading = operator.request(&heater.get_temperature)?;
        info!("{} at {} °C", heater.address, reading[TEMPERATURE_KEY]);
    }

    operator.request(&merger_control::INCREASE_MOTOR_SPEED)?;
    thread::sleep(STATE_POLL * 5);
    let speed = operator.request(&feeder_motor::GET_MOTOR_SPEED)?;
    info!(
        "feeder at {} rpm, rotating: {}",
        speed[PROPERTY_VALUE_KEY],
        sim.feeder_motor.is_rotating()
    );

    operator.request(&merger_control::STOP_FEEDING)?;
    operator.await_state(&merger_control::GET_STATE, "Standby")?;
    operator.request(&merger_control::SWITCH_OFF)?;
    operator.await_state(&merger_control::GET_STATE, "Off")?;
    Ok(())
}

fn main() -> Result<()> {
    let filter = init_logging()?;

    info!("========================================");
    info!("  Filamachine v{}", env!("CARGO_PKG_VERSION"));
    info!("  log filter: {filter}");
    info!("========================================");

    let config = simulation_config();
    let sim = SimMachine::new(
        config.machine.motor_speed_max,
        AMBIENT_TEMPERATURE,
        HEATING_STEP,
    );
    let registry = InprocRegistry::new();

    let group = machine::build_group(&registry, &sim.hal(), &config)
        .context("building machine group")?;
    if !group.start() {
        group.stop();
        bail!("not all machine components started");
    }

    let io = Arc::new(IoContext::new(
        OPERATOR,
        &registry,
        config.component.io_poll_interval(),
    ));
    let operator = Operator {
        broker: MessageBroker::new(OPERATOR, io, &config.broker),
    };
    let outcome = operator
        .broker
        .start()
        .context("starting operator broker")
        .and_then(|()| run_feed_cycle(&operator, &sim));

    if let Err(e) = &outcome {
        warn!("feed cycle aborted: {e:#}");
    }
    operator.broker.stop();
    group.stop();
    group.wait_until_finished();

    outcome?;
    info!("feed cycle complete, machine off");
    Ok(())
}
