//! Unified error types for the control core.
//!
//! One `Error` enum that every subsystem converts into, so transport,
//! protocol and application failures surface through the same `Result`
//! from `send`, `notify` and `subscribe`.  Nothing in here panics across a
//! thread or transport boundary; handlers turn failures into response codes.

use core::fmt;
use std::io;

use crate::message::ResultCode;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Connect, send or receive failed (retried by the broker).
    Transport(TransportError),
    /// A message or frame could not be encoded or decoded.
    Protocol(ProtocolError),
    /// The peer handled the request but answered with a non-success result.
    Response { result: ResultCode, reason: String },
    /// Subscribe/unsubscribe bookkeeping failed.
    Subscription(SubscriptionError),
    /// Transition table rejected at construction.
    StateMachine(StateMachineError),
    /// A hardware collaborator call failed.
    Hal(HalError),
    /// Configuration is invalid.
    Config(&'static str),
    /// A worker thread could not be spawned.
    Spawn(String),
    /// The operation requires a started component or broker.
    NotRunning,
}

impl Error {
    /// Transport failures are the only class the broker retries.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Response { result, reason } => {
                write!(f, "response: {} ({reason})", result.name())
            }
            Self::Subscription(e) => write!(f, "subscription: {e}"),
            Self::StateMachine(e) => write!(f, "state machine: {e}"),
            Self::Hal(e) => write!(f, "hal: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::NotRunning => write!(f, "not running"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Address has no scheme we understand.
    InvalidAddress(String),
    /// Nobody is bound to the address.
    NotBound(String),
    /// Another endpoint already owns the address.
    AddressInUse(String),
    /// Client used without a prior `connect`.
    NotConnected,
    /// No reply within the receive timeout.
    Timeout,
    /// Peer or io context went away mid-exchange.
    Disconnected,
    /// Socket-level failure.
    Io(io::ErrorKind),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress(a) => write!(f, "invalid address {a}"),
            Self::NotBound(a) => write!(f, "no endpoint bound to {a}"),
            Self::AddressInUse(a) => write!(f, "address {a} already in use"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Timeout => write!(f, "timed out"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Io(kind) => write!(f, "I/O error: {kind}"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                Self::Transport(TransportError::Timeout)
            }
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::Transport(TransportError::Disconnected),
            io::ErrorKind::AddrInUse => {
                Self::Transport(TransportError::AddressInUse(e.to_string()))
            }
            kind => Self::Transport(TransportError::Io(kind)),
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended before the message was complete.
    Truncated,
    /// Input decoded to something that is not a message.
    Malformed,
    /// Message could not be encoded.
    Serialize,
    /// Frame length prefix exceeds the allowed maximum.
    FrameTooLarge(usize),
    /// Payload is not the JSON document the receiver expects.
    InvalidPayload,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated input"),
            Self::Malformed => write!(f, "malformed message"),
            Self::Serialize => write!(f, "serialization failed"),
            Self::FrameTooLarge(len) => write!(f, "frame of {len} bytes too large"),
            Self::InvalidPayload => write!(f, "invalid payload"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        match e {
            postcard::Error::DeserializeUnexpectedEnd => Self::Protocol(ProtocolError::Truncated),
            postcard::Error::SerializeBufferFull
            | postcard::Error::SerializeSeqLengthUnknown
            | postcard::Error::SerdeSerCustom => Self::Protocol(ProtocolError::Serialize),
            _ => Self::Protocol(ProtocolError::Malformed),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Self::Protocol(ProtocolError::InvalidPayload)
    }
}

// ---------------------------------------------------------------------------
// Subscription errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Topic already subscribed on this publisher address.
    AlreadySubscribed,
    /// Topic was never subscribed on this publisher address.
    NotSubscribed,
    /// Connection pool exhausted.
    NoSocketsAvailable,
    /// Per-connection topic list is full.
    TooManyTopics,
}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadySubscribed => write!(f, "already subscribed"),
            Self::NotSubscribed => write!(f, "not subscribed"),
            Self::NoSocketsAvailable => write!(f, "no more sockets available"),
            Self::TooManyTopics => write!(f, "too many topics on one connection"),
        }
    }
}

impl From<SubscriptionError> for Error {
    fn from(e: SubscriptionError) -> Self {
        Self::Subscription(e)
    }
}

// ---------------------------------------------------------------------------
// State machine construction errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    /// Entry `index` can never fire: an earlier unguarded entry has the
    /// same `(from, event)` pair.
    UnreachableTransition { index: usize, transition: String },
}

impl fmt::Display for StateMachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnreachableTransition { index, transition } => {
                write!(f, "transition #{index} ({transition}) is unreachable")
            }
        }
    }
}

impl From<StateMachineError> for Error {
    fn from(e: StateMachineError) -> Self {
        Self::StateMachine(e)
    }
}

// ---------------------------------------------------------------------------
// HAL errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    /// No device registered under this identifier.
    UnknownDevice(String),
    /// GPIO read returned an error.
    GpioReadFailed,
    /// GPIO set failed.
    GpioWriteFailed,
    /// Pin configured in the other direction.
    WrongDirection,
    /// Stepper motor refused the command.
    MotorFailed,
    /// Requested speed exceeds the configured maximum.
    SpeedOutOfRange,
    /// Temperature could not be sampled.
    SensorReadFailed,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDevice(id) => write!(f, "unknown device {id}"),
            Self::GpioReadFailed => write!(f, "GPIO read failed"),
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
            Self::WrongDirection => write!(f, "wrong pin direction"),
            Self::MotorFailed => write!(f, "motor command failed"),
            Self::SpeedOutOfRange => write!(f, "speed out of range"),
            Self::SensorReadFailed => write!(f, "sensor read failed"),
        }
    }
}

impl From<HalError> for Error {
    fn from(e: HalError) -> Self {
        Self::Hal(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
