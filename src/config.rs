//! System configuration parameters
//!
//! All tunable parameters of the control core.  Values are resolved before
//! any component starts; `from_json` accepts partial documents and fills
//! the rest from defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Core system configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub broker: BrokerConfig,
    pub component: ComponentConfig,
    pub machine: MachineConfig,
}

/// Message broker send path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Send and receive timeout of one request attempt (milliseconds)
    pub max_transmission_time_ms: u64,
    /// Attempts per request, first try included
    pub send_attempts: u32,
    /// Delay before the first retry (milliseconds), doubled per retry
    pub retry_backoff_ms: u64,
    /// Upper bound of the retry delay (milliseconds)
    pub retry_backoff_max_ms: u64,
}

impl BrokerConfig {
    pub fn transmission_timeout(&self) -> Duration {
        Duration::from_millis(self.max_transmission_time_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_transmission_time_ms: 50,
            send_attempts: 3,
            retry_backoff_ms: 10,
            retry_backoff_max_ms: 200,
        }
    }
}

/// Service component runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// Event queue size; one slot is reserved, so the queue holds size - 1
    pub event_queue_size: usize,
    /// Poll period of io threads and socket loops (milliseconds)
    pub io_poll_interval_ms: u64,
}

impl ComponentConfig {
    pub fn io_poll_interval(&self) -> Duration {
        Duration::from_millis(self.io_poll_interval_ms)
    }
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            event_queue_size: 10,
            io_poll_interval_ms: 10,
        }
    }
}

/// Filament machine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    // --- Feeder motor ---
    /// Speed applied on start (rpm)
    pub motor_speed_default: u32,
    /// Highest accepted speed (rpm)
    pub motor_speed_max: u32,
    /// Step of increase/decrease requests (rpm)
    pub motor_speed_increment: u32,

    // --- Heaters ---
    /// Heating resumes below this temperature (°C)
    pub heater_min_temperature: i32,
    /// Heating pauses above this temperature (°C)
    pub heater_max_temperature: i32,

    // --- Observation ---
    /// Temperature sampling period (milliseconds)
    pub temperature_observation_interval_ms: u64,
}

impl MachineConfig {
    pub fn temperature_observation_interval(&self) -> Duration {
        Duration::from_millis(self.temperature_observation_interval_ms)
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            motor_speed_default: 50,
            motor_speed_max: 100,
            motor_speed_increment: 10,

            heater_min_temperature: 195,
            heater_max_temperature: 205,

            temperature_observation_interval_ms: 1000,
        }
    }
}

impl SystemConfig {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        let b = &self.broker;
        if b.max_transmission_time_ms == 0 {
            return Err(Error::Config("max_transmission_time_ms must be positive"));
        }
        if b.send_attempts == 0 {
            return Err(Error::Config("send_attempts must be at least 1"));
        }
        if b.retry_backoff_ms > b.retry_backoff_max_ms {
            return Err(Error::Config("retry_backoff_ms exceeds retry_backoff_max_ms"));
        }

        let c = &self.component;
        if c.event_queue_size < 2 {
            return Err(Error::Config("event_queue_size must be at least 2"));
        }
        if c.io_poll_interval_ms == 0 {
            return Err(Error::Config("io_poll_interval_ms must be positive"));
        }

        let m = &self.machine;
        if m.motor_speed_max == 0 || m.motor_speed_default > m.motor_speed_max {
            return Err(Error::Config("motor_speed_default must lie in 0..=motor_speed_max"));
        }
        if m.motor_speed_increment == 0 {
            return Err(Error::Config("motor_speed_increment must be positive"));
        }
        if m.heater_min_temperature >= m.heater_max_temperature {
            return Err(Error::Config("heater_min_temperature must be below heater_max_temperature"));
        }
        if m.temperature_observation_interval_ms == 0 {
            return Err(Error::Config("temperature_observation_interval_ms must be positive"));
        }
        Ok(())
    }

    /// Parse a JSON document and validate it.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|_| Error::Config("malformed configuration"))?;
        config.validate()?;
        Ok(config)
    }
}
