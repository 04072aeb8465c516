//! Component identifiers and the requests/notifications they serve.

use crate::component::{NotificationId, RequestId};

pub const FILAMENT_FEEDER_MOTOR: &str = "FilamentFeederMotor";
pub const FILAMENT_MERGER_HEATER: &str = "FilamentMergerHeater";
pub const FILAMENT_PRE_HEATER: &str = "FilamentPreHeater";
pub const FILAMENT_MERGER_CONTROL: &str = "FilamentMergerControl";

/// JSON key of a temperature reading.
pub const TEMPERATURE_KEY: &str = "temperature";

pub mod feeder_motor {
    use super::*;

    const ID: &str = FILAMENT_FEEDER_MOTOR;

    pub const SWITCH_ON: RequestId = RequestId::new(ID, "SwitchOn");
    pub const SWITCH_OFF: RequestId = RequestId::new(ID, "SwitchOff");
    pub const START_MOTOR: RequestId = RequestId::new(ID, "StartMotor");
    pub const STOP_MOTOR: RequestId = RequestId::new(ID, "StopMotor");
    pub const GET_STATE: RequestId = RequestId::new(ID, "GetState");
    pub const GET_MOTOR_SPEED: RequestId = RequestId::new(ID, "GetMotorSpeed");
    pub const SET_MOTOR_SPEED: RequestId = RequestId::new(ID, "SetMotorSpeed");

    pub const START_MOTOR_SUCCEEDED: NotificationId = NotificationId::new(ID, "StartMotorSucceeded");
    pub const STOP_MOTOR_SUCCEEDED: NotificationId = NotificationId::new(ID, "StopMotorSucceeded");
    pub const ERROR_OCCURRED: NotificationId = NotificationId::new(ID, "ErrorOccurred");
}

/// Ids of one heater component; both heaters share the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaterProtocol {
    pub address: &'static str,
    pub switch_on: RequestId,
    pub switch_off: RequestId,
    pub get_temperature: RequestId,
    pub get_state: RequestId,
    pub target_temperature_range_reached: NotificationId,
    pub target_temperature_range_left: NotificationId,
    pub error_occurred: NotificationId,
}

impl HeaterProtocol {
    pub const fn new(address: &'static str) -> Self {
        Self {
            address,
            switch_on: RequestId::new(address, "SwitchOn"),
            switch_off: RequestId::new(address, "SwitchOff"),
            get_temperature: RequestId::new(address, "GetTemperature"),
            get_state: RequestId::new(address, "GetState"),
            target_temperature_range_reached: NotificationId::new(
                address,
                "TargetTemperatureRangeReached",
            ),
            target_temperature_range_left: NotificationId::new(
                address,
                "TargetTemperatureRangeLeft",
            ),
            error_occurred: NotificationId::new(address, "ErrorOccurred"),
        }
    }
}

pub const MERGER_HEATER: HeaterProtocol = HeaterProtocol::new(FILAMENT_MERGER_HEATER);
pub const PRE_HEATER: HeaterProtocol = HeaterProtocol::new(FILAMENT_PRE_HEATER);

pub mod merger_control {
    use super::*;

    const ID: &str = FILAMENT_MERGER_CONTROL;

    pub const SWITCH_ON: RequestId = RequestId::new(ID, "SwitchOn");
    pub const SWITCH_OFF: RequestId = RequestId::new(ID, "SwitchOff");
    pub const START_FEEDING: RequestId = RequestId::new(ID, "StartFeeding");
    pub const STOP_FEEDING: RequestId = RequestId::new(ID, "StopFeeding");
    pub const GET_STATE: RequestId = RequestId::new(ID, "GetState");
    pub const INCREASE_MOTOR_SPEED: RequestId = RequestId::new(ID, "IncreaseMotorSpeed");
    pub const DECREASE_MOTOR_SPEED: RequestId = RequestId::new(ID, "DecreaseMotorSpeed");

    pub const HEATED_UP: NotificationId = NotificationId::new(ID, "HeatedUp");
    pub const FEEDING_RUNNING: NotificationId = NotificationId::new(ID, "FeedingRunning");
    pub const FEEDING_STOPPED: NotificationId = NotificationId::new(ID, "FeedingStopped");
    pub const ERROR_OCCURRED: NotificationId = NotificationId::new(ID, "ErrorOccurred");
}
