//! Socket-style transport beneath the broker.
//!
//! ```text
//!            ┌────────────────────────── IoContext (one thread) ────┐
//!  Client ──▶│ Server: request job ─▶ handler(in, out) ─▶ reply     │
//!            │ Subscriber: notification job ─▶ handler(in)          │
//!            └──────────────────────────────────────────────────────┘
//!  Publisher ──▶ TopicChannel / TCP peers ──▶ Subscriber links
//! ```
//!
//! Two schemes are understood:
//!
//! - `inproc://name`: endpoints live in an [`InprocRegistry`] shared by
//!   every io context of the process.
//! - `tcp://host:port`: length-prefixed frames over `std::net` sockets.
//!
//! Inbound handlers always run on the io thread of the receiving side,
//! never on the caller's thread.

pub mod client;
pub mod inproc;
pub mod io_context;
pub mod publisher;
pub mod server;
pub mod subscriber;
pub mod tcp;

use log::warn;

use crate::error::{Result, TransportError};
use crate::message::StreamBuffer;

pub use client::Client;
pub use inproc::InprocRegistry;
pub use io_context::{IoContext, IoExecutor};
pub use publisher::Publisher;
pub use server::Server;
pub use subscriber::{MAX_SUBSCRIPTION_SOCKETS, MAX_TOPICS_PER_CONNECTION, Subscriber};

pub const INPROC_SCHEME: &str = "inproc://";
pub const TCP_SCHEME: &str = "tcp://";

/// Request handler: reads the request from the first buffer and writes
/// the reply into the second.  `false` marks a failed request; the reply
/// buffer is still sent.
pub type RequestHandler = dyn Fn(&mut StreamBuffer, &mut StreamBuffer) -> bool + Send + Sync;

/// Notification handler: reads one published message.
pub type NotificationHandler = dyn Fn(&mut StreamBuffer) -> bool + Send + Sync;

/// Parsed transport address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `inproc://<name>`
    Inproc(String),
    /// `tcp://<host>:<port>`, stored as `host:port`.
    Tcp(String),
}

impl Endpoint {
    pub fn parse(address: &str) -> Result<Self> {
        if let Some(name) = address.strip_prefix(INPROC_SCHEME) {
            if !name.is_empty() {
                return Ok(Self::Inproc(name.to_owned()));
            }
        } else if let Some(host_port) = address.strip_prefix(TCP_SCHEME) {
            if split_host_port(host_port).is_some() {
                return Ok(Self::Tcp(host_port.to_owned()));
            }
        }
        Err(TransportError::InvalidAddress(address.to_owned()).into())
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub fn split_host_port(host_port: &str) -> Option<(&str, u16)> {
    let (host, port) = host_port.rsplit_once(':')?;
    let port = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    Some((host, port))
}

/// Run `handler` over one request and always produce a reply buffer.
pub(crate) fn dispatch_request(handler: &RequestHandler, request: Vec<u8>) -> Vec<u8> {
    let mut input = StreamBuffer::from(request);
    let mut output = StreamBuffer::new();
    if !handler(&mut input, &mut output) {
        warn!("request handler reported failure, replying with {} bytes", output.len());
    }
    output.into_vec()
}
