//! `tcp://` endpoints over blocking `std::net` sockets.
//!
//! Every frame is `[LE u32 length][payload]` (see [`crate::message::codec`]).
//!
//! ```text
//! request/reply      client ── req ──▶ responder ── rep ──▶ client
//! subscription       subscriber ── 0x01 topic ──▶ publisher     subscribe
//!                    subscriber ── 0x00 topic ──▶ publisher     unsubscribe
//! notification       publisher ── topic ── data ──▶ subscriber
//! ```
//!
//! Threads:
//! - one acceptor per bound endpoint, polling a nonblocking listener;
//! - one thread per accepted connection, with a read timeout equal to the
//!   io poll interval so it notices `stop()`;
//! - one reader per subscription connection.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::error::{Error, Result, TransportError};
use crate::message::codec::{FrameDecoder, HEADER_SIZE, encode_frame};

use super::inproc::{Delivery, Responder};

/// How long an accepted request may wait for its io thread.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Connect timeout for subscription links.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

const SUBSCRIBE: u8 = 0x01;
const UNSUBSCRIBE: u8 = 0x00;

const READ_CHUNK: usize = 1024;

// ---------------------------------------------------------------------------
// Frame I/O
// ---------------------------------------------------------------------------

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(payload, &mut out)?;
    writer.write_all(&out)?;
    Ok(())
}

/// Read until `decoder` yields one frame.  A read timeout surfaces as
/// `TransportError::Timeout` with any partial frame kept in `decoder`.
pub fn read_frame<R: Read>(reader: &mut R, decoder: &mut FrameDecoder) -> Result<Vec<u8>> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(frame) = decoder.next_frame()? {
            return Ok(frame);
        }
        match reader.read(&mut chunk) {
            Ok(0) => return Err(TransportError::Disconnected.into()),
            Ok(n) => decoder.feed(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

pub fn resolve(host_port: &str) -> Result<SocketAddr> {
    host_port
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| TransportError::InvalidAddress(host_port.to_owned()).into())
}

pub fn connect(host_port: &str, timeout: Duration) -> Result<TcpStream> {
    let addr = resolve(host_port)?;
    let stream = TcpStream::connect_timeout(&addr, at_least_1ms(timeout))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Socket timeouts of zero are rejected by the OS layer.
pub fn at_least_1ms(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}

// ---------------------------------------------------------------------------
// Acceptor
// ---------------------------------------------------------------------------

/// Listener thread handing each accepted connection to its own thread.
struct Acceptor {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl Acceptor {
    fn spawn<F>(label: &'static str, host_port: &str, poll: Duration, serve: F) -> Result<Self>
    where
        F: Fn(TcpStream, &AtomicBool) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(resolve(host_port)?)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let serve = Arc::new(serve);

        let handle = thread::Builder::new()
            .name(label.to_owned())
            .spawn(move || {
                let mut connections: Vec<JoinHandle<()>> = Vec::new();
                while flag.load(Ordering::Acquire) {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            if let Err(e) = prepare_accepted(&stream, poll) {
                                warn!("{label} {local_addr}: cannot configure {peer}: {e}");
                                continue;
                            }
                            debug!("{label} {local_addr}: accepted {peer}");
                            let serve = Arc::clone(&serve);
                            let flag = Arc::clone(&flag);
                            match thread::Builder::new()
                                .name(format!("{label}-conn"))
                                .spawn(move || serve(stream, flag.as_ref()))
                            {
                                Ok(h) => connections.push(h),
                                Err(e) => warn!("{label} {local_addr}: no thread for {peer}: {e}"),
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll),
                        Err(e) => {
                            warn!("{label} {local_addr}: accept failed: {e}");
                            thread::sleep(poll);
                        }
                    }
                    connections.retain(|h| !h.is_finished());
                }
                for h in connections {
                    let _ = h.join();
                }
                trace!("{label} {local_addr}: acceptor finished");
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
            local_addr,
        })
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                warn!("acceptor on {} panicked", self.local_addr);
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn prepare_accepted(stream: &TcpStream, poll: Duration) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(at_least_1ms(poll)))?;
    stream.set_write_timeout(Some(REPLY_TIMEOUT))?;
    stream.set_nodelay(true)
}

fn is_timeout(e: &Error) -> bool {
    matches!(e, Error::Transport(TransportError::Timeout))
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// Bound `tcp://` request endpoint.
pub struct TcpResponder {
    acceptor: Acceptor,
}

impl TcpResponder {
    pub fn bind(host_port: &str, responder: Responder, poll: Duration) -> Result<Self> {
        let acceptor = Acceptor::spawn("tcp-rep", host_port, poll, move |mut stream, running| {
            serve_requests(&mut stream, &responder, running);
        })?;
        Ok(Self { acceptor })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr
    }
}

fn serve_requests(stream: &mut TcpStream, responder: &Responder, running: &AtomicBool) {
    let mut decoder = FrameDecoder::new();
    while running.load(Ordering::Acquire) {
        let request = match read_frame(stream, &mut decoder) {
            Ok(frame) => frame,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                trace!("request connection closed: {e}");
                return;
            }
        };
        let reply = match responder.request(request, REPLY_TIMEOUT) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("dropping request connection: {e}");
                return;
            }
        };
        if let Err(e) = write_frame(stream, &reply) {
            debug!("reply not sent: {e}");
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

struct Peer {
    id: u64,
    writer: TcpStream,
    topics: Vec<String>,
}

/// Bound `tcp://` publisher endpoint.
pub struct TcpPublisher {
    acceptor: Acceptor,
    peers: Arc<Mutex<Vec<Peer>>>,
}

impl TcpPublisher {
    pub fn bind(host_port: &str, poll: Duration) -> Result<Self> {
        let peers: Arc<Mutex<Vec<Peer>>> = Arc::new(Mutex::new(Vec::new()));
        let next_peer = AtomicU64::new(0);

        let shared = Arc::clone(&peers);
        let acceptor = Acceptor::spawn("tcp-pub", host_port, poll, move |mut stream, running| {
            let id = next_peer.fetch_add(1, Ordering::Relaxed);
            let writer = match stream.try_clone() {
                Ok(w) => w,
                Err(e) => {
                    warn!("subscriber connection unusable: {e}");
                    return;
                }
            };
            shared.lock().push(Peer {
                id,
                writer,
                topics: Vec::new(),
            });
            serve_commands(&mut stream, id, &shared, running);
            shared.lock().retain(|p| p.id != id);
        })?;

        Ok(Self { acceptor, peers })
    }

    /// Send `topic` + `data` to every peer subscribed to exactly `topic`.
    /// Peers whose socket fails are dropped.
    pub fn publish(&self, topic: &str, data: &[u8]) -> usize {
        let mut sent = 0;
        self.peers.lock().retain_mut(|peer| {
            if !peer.topics.iter().any(|t| t == topic) {
                return true;
            }
            let result = write_frame(&mut peer.writer, topic.as_bytes())
                .and_then(|()| write_frame(&mut peer.writer, data));
            match result {
                Ok(()) => {
                    sent += 1;
                    true
                }
                Err(e) => {
                    debug!("dropping subscriber {}: {e}", peer.id);
                    let _ = peer.writer.shutdown(Shutdown::Both);
                    false
                }
            }
        });
        sent
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr
    }
}

fn serve_commands(
    stream: &mut TcpStream,
    id: u64,
    peers: &Mutex<Vec<Peer>>,
    running: &AtomicBool,
) {
    let mut decoder = FrameDecoder::new();
    while running.load(Ordering::Acquire) {
        let frame = match read_frame(stream, &mut decoder) {
            Ok(frame) => frame,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                trace!("subscriber {id} gone: {e}");
                return;
            }
        };
        let Some((&command, topic)) = frame.split_first() else {
            warn!("subscriber {id}: empty command frame");
            continue;
        };
        let topic = String::from_utf8_lossy(topic).into_owned();
        let mut peers = peers.lock();
        let Some(peer) = peers.iter_mut().find(|p| p.id == id) else {
            return;
        };
        match command {
            SUBSCRIBE => {
                if !peer.topics.contains(&topic) {
                    peer.topics.push(topic);
                }
            }
            UNSUBSCRIBE => peer.topics.retain(|t| *t != topic),
            other => warn!("subscriber {id}: unknown command {other:#04x}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Outgoing connection to one `tcp://` publisher.
pub struct TcpSubscription {
    writer: TcpStream,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TcpSubscription {
    pub fn open(host_port: &str, delivery: Delivery, poll: Duration) -> Result<Self> {
        let writer = connect(host_port, CONNECT_TIMEOUT)?;
        writer.set_read_timeout(Some(at_least_1ms(poll)))?;
        writer.set_write_timeout(Some(REPLY_TIMEOUT))?;
        let mut reader = writer.try_clone()?;

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("tcp-sub".to_owned())
            .spawn(move || {
                let mut decoder = FrameDecoder::new();
                let mut topic: Option<Vec<u8>> = None;
                while flag.load(Ordering::Acquire) {
                    match read_frame(&mut reader, &mut decoder) {
                        Ok(frame) => match topic.take() {
                            None => topic = Some(frame),
                            Some(_) => {
                                if let Err(e) = delivery.deliver(frame) {
                                    trace!("notification dropped: {e}");
                                }
                            }
                        },
                        Err(e) if is_timeout(&e) => {}
                        Err(e) => {
                            debug!("subscription link closed: {e}");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            writer,
            running,
            handle: Some(handle),
        })
    }

    pub fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.command(SUBSCRIBE, topic)
    }

    pub fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        self.command(UNSUBSCRIBE, topic)
    }

    fn command(&mut self, command: u8, topic: &str) -> Result<()> {
        let mut frame = Vec::with_capacity(1 + topic.len());
        frame.push(command);
        frame.extend_from_slice(topic.as_bytes());
        write_frame(&mut self.writer, &frame)
    }

    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.writer.shutdown(Shutdown::Both);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for TcpSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
