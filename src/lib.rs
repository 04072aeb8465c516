//! Filamachine control core.
//!
//! Service components exchange requests and notifications through a
//! message broker; each component runs a table-driven state machine on
//! its own worker thread.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  machine      FeederMotor · Heaters · MergerControl          │
//! │  ──────────── Sender / EventPusher boundary ──────────────   │
//! │  component    ServiceComponent = Dispatcher + StateMachine   │
//! │  broker       send (retry) · notify · subscribe              │
//! │  transport    Client/Server · Publisher/Subscriber           │
//! │               inproc:// registry · tcp://host:port           │
//! │  message      Message · ResponseMessage · StreamBuffer       │
//! └──────────────────────────────────────────────────────────────┘
//!   hal: GpioPin · StepperMotor · TemperatureSensor (sim + embedded-hal)
//! ```

#![deny(unused_must_use)]

pub mod broker;
pub mod component;
pub mod config;
pub mod error;
pub mod execution;
pub mod hal;
pub mod machine;
pub mod message;
pub mod process;
pub mod transport;
