//! Request side of request/reply.
//!
//! One outstanding request at a time; the caller blocks until the reply
//! arrives or the receive timeout expires.

use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use log::trace;

use crate::error::{Result, TransportError};
use crate::message::StreamBuffer;
use crate::message::codec::FrameDecoder;

use super::inproc::{InprocRegistry, Responder};
use super::tcp::{self, at_least_1ms};
use super::Endpoint;

enum Connection {
    Inproc(Responder),
    Tcp {
        stream: TcpStream,
        decoder: FrameDecoder,
    },
}

pub struct Client {
    registry: InprocRegistry,
    connection: Option<Connection>,
    receive_timeout: Duration,
}

impl Client {
    pub fn new(registry: &InprocRegistry) -> Self {
        Self {
            registry: registry.clone(),
            connection: None,
            receive_timeout: Duration::ZERO,
        }
    }

    /// Connect to a bound responder.  Any previous connection is dropped.
    pub fn connect(
        &mut self,
        address: &str,
        send_timeout: Duration,
        receive_timeout: Duration,
    ) -> Result<()> {
        self.disconnect();
        let connection = match Endpoint::parse(address)? {
            Endpoint::Inproc(name) => Connection::Inproc(self.registry.responder(&name)?),
            Endpoint::Tcp(host_port) => {
                let stream = tcp::connect(&host_port, send_timeout)?;
                stream.set_write_timeout(Some(at_least_1ms(send_timeout)))?;
                stream.set_read_timeout(Some(at_least_1ms(receive_timeout)))?;
                Connection::Tcp {
                    stream,
                    decoder: FrameDecoder::new(),
                }
            }
        };
        trace!("connected to {address}");
        self.connection = Some(connection);
        self.receive_timeout = receive_timeout;
        Ok(())
    }

    /// Send the unread bytes of `request` and append the reply to `reply`.
    pub fn send(&mut self, request: &StreamBuffer, reply: &mut StreamBuffer) -> Result<()> {
        match self.connection.as_mut() {
            None => Err(TransportError::NotConnected.into()),
            Some(Connection::Inproc(responder)) => {
                let bytes = responder.request(request.unread().to_vec(), self.receive_timeout)?;
                reply.write_bytes(&bytes);
                Ok(())
            }
            Some(Connection::Tcp { stream, decoder }) => {
                tcp::write_frame(stream, request.unread())?;
                let bytes = tcp::read_frame(stream, decoder)?;
                reply.write_bytes(&bytes);
                Ok(())
            }
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(Connection::Tcp { stream, .. }) = self.connection.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}
