/// Single-server connection: socket lifecycle and framed request/reply I/O
///
/// A `Connection` owns at most one blocking socket. Holding a socket is what
/// "connected" means, so a disconnected connection never leaks a descriptor
/// and a connected one always has a usable stream. Every failure an
/// operation hits is also recorded in the connection's error slot.
use super::replset::ReplicaSet;
use super::HostAddress;
use crate::error::{ConnectError, ErrorKind, WireError, WireResult};
use crate::protocol::{MsgHeader, Reply, Request, HEADER_LEN};
use bytes::{BufMut, BytesMut};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Request ids only correlate replies; they are unique per process, not per
/// connection.
pub(crate) fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Socket behaviour for a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Upper bound on establishing a TCP connection; `None` blocks
    pub connect_timeout: Option<Duration>,
    /// Read/write timeout for each socket call; `None` blocks
    pub op_timeout: Option<Duration>,
    /// Documents requested per get-more; 0 lets the server decide
    pub batch_size: i32,
}

impl ConnectionOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Last failure recorded on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
}

/// A connection to one server, or to the primary of a replica set
#[derive(Debug)]
pub struct Connection {
    /// Server currently attached to; the confirmed primary in replica set mode
    pub(crate) primary: Option<HostAddress>,
    pub(crate) replset: Option<ReplicaSet>,
    pub(crate) stream: Option<TcpStream>,
    last_error: Option<LastError>,
    pub(crate) options: ConnectionOptions,
}

impl Connection {
    /// Create a disconnected single-host connection
    pub fn new() -> Self {
        Self::with_options(ConnectionOptions::default())
    }

    pub fn with_options(options: ConnectionOptions) -> Self {
        Self {
            primary: None,
            replset: None,
            stream: None,
            last_error: None,
            options,
        }
    }

    /// Connect to a single server. No retry is attempted.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), ConnectError> {
        if self.replset.is_some() {
            return Err(self.connect_failed(ConnectError::bad_argument(
                "single-host connect on a replica set connection",
            )));
        }

        let addr = HostAddress::new(host, port).map_err(|e| self.connect_failed(e))?;
        self.disconnect();
        self.primary = Some(addr);
        self.establish()
    }

    /// (Re)open the socket to the recorded primary slot
    pub(crate) fn establish(&mut self) -> Result<(), ConnectError> {
        let addr = match &self.primary {
            Some(addr) => addr.clone(),
            None => {
                return Err(self.connect_failed(ConnectError::bad_argument(
                    "no host has been configured",
                )))
            }
        };

        match open_stream(&addr, &self.options) {
            Ok(stream) => {
                debug!("Connected to {}", addr);
                self.stream = Some(stream);
                self.last_error = None;
                Ok(())
            }
            Err(e) => Err(self.connect_failed(e)),
        }
    }

    /// Close the socket if one is open. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            match stream.shutdown(Shutdown::Both) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
                Err(e) => debug!("Error shutting down socket: {}", e),
            }
            if let Some(addr) = &self.primary {
                debug!("Disconnected from {}", addr);
            }
        }
    }

    /// Disconnect, then repeat the establishment procedure this connection
    /// was set up with. Session state such as authentication is not
    /// restored.
    pub fn reconnect(&mut self) -> Result<(), ConnectError> {
        self.disconnect();
        self.open()
    }

    /// Connect using the recorded host, or by discovery over the seeds in
    /// replica set mode
    pub fn open(&mut self) -> Result<(), ConnectError> {
        if self.replset.is_some() {
            self.connect_replica_set()
        } else {
            self.establish()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Server currently attached to, if any has been confirmed
    pub fn primary(&self) -> Option<&HostAddress> {
        self.primary.as_ref()
    }

    pub fn is_replica_set(&self) -> bool {
        self.replset.is_some()
    }

    pub fn replica_set_state(&self) -> Option<&ReplicaSet> {
        self.replset.as_ref()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub(crate) fn record(&mut self, kind: ErrorKind, message: String) {
        self.last_error = Some(LastError { kind, message });
    }

    pub(crate) fn connect_failed(&mut self, err: ConnectError) -> ConnectError {
        self.record(err.kind(), err.to_string());
        err
    }

    /// Record an operation failure. Socket and framing failures leave the
    /// stream at an unknown position, so the socket is dropped too.
    pub(crate) fn fail(&mut self, err: WireError) -> WireError {
        let desynced = matches!(err, WireError::Network(_) | WireError::Protocol(_));
        if desynced && self.stream.is_some() {
            warn!("Dropping connection after failure: {}", err);
            self.stream = None;
        }
        self.note(err)
    }

    /// Record a failure that leaves the socket usable
    pub(crate) fn note(&mut self, err: WireError) -> WireError {
        self.record(err.kind(), err.to_string());
        err
    }

    /// Write one complete frame
    pub fn send_frame(&mut self, frame: &[u8]) -> WireResult<()> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(self.fail(WireError::NotConnected)),
        };

        let result = stream.write_all(frame).and_then(|_| stream.flush());
        match result {
            Ok(()) => {
                trace!("Sent {} byte frame", frame.len());
                Ok(())
            }
            Err(e) => Err(self.fail(WireError::Network(e))),
        }
    }

    /// Read one complete reply frame answering `request_id`
    pub fn receive_frame(&mut self, request_id: i32) -> WireResult<Reply> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(self.fail(WireError::NotConnected)),
        };

        match read_reply(stream, request_id) {
            Ok(reply) => {
                trace!(
                    "Received reply to {} with {} documents",
                    request_id,
                    reply.len()
                );
                Ok(reply)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Encode and send a request, returning its request id
    pub fn send_request(&mut self, request: &Request<'_>) -> WireResult<i32> {
        let request_id = next_request_id();
        let frame = request.encode(request_id).map_err(|e| self.fail(e))?;
        debug!(
            "Sending {} ({} bytes) as request {}",
            request.op_code(),
            frame.len(),
            request_id
        );
        self.send_frame(&frame)?;
        Ok(request_id)
    }

    /// Send a request and block for its reply
    pub fn call(&mut self, request: &Request<'_>) -> WireResult<Reply> {
        let request_id = self.send_request(request)?;
        self.receive_frame(request_id)
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn read_reply(stream: &mut TcpStream, request_id: i32) -> WireResult<Reply> {
    let mut head = [0u8; HEADER_LEN];
    stream.read_exact(&mut head)?;
    let header = MsgHeader::parse(&head)?;

    let mut frame = BytesMut::with_capacity(header.length as usize);
    frame.put_slice(&head);
    frame.resize(header.length as usize, 0);
    stream.read_exact(&mut frame[HEADER_LEN..])?;

    Ok(Reply::parse_for(frame.freeze(), request_id)?)
}

/// Resolve `addr`, create a socket with Nagle disabled and connect it.
/// Each resolved address is tried once, in resolver order.
pub(crate) fn open_stream(
    addr: &HostAddress,
    options: &ConnectionOptions,
) -> Result<TcpStream, ConnectError> {
    let resolved = addr.resolve().map_err(|source| ConnectError::ConnectFailed {
        addr: addr.to_string(),
        source,
    })?;

    let mut last_error = None;
    for sock_addr in resolved {
        let socket = Socket::new(Domain::for_address(sock_addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(ConnectError::NoSocket)?;

        if let Err(e) = socket.set_nodelay(true) {
            warn!("Failed to disable Nagle on socket for {}: {}", addr, e);
        }

        let target = SockAddr::from(sock_addr);
        let connected = match options.connect_timeout {
            Some(timeout) => socket.connect_timeout(&target, timeout),
            None => socket.connect(&target),
        };

        match connected {
            Ok(()) => {
                let stream: TcpStream = socket.into();
                configure_stream(&stream, options).map_err(|source| {
                    ConnectError::ConnectFailed {
                        addr: addr.to_string(),
                        source,
                    }
                })?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} ({}) failed: {}", addr, sock_addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(ConnectError::ConnectFailed {
        addr: addr.to_string(),
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address to connect to")),
    })
}

fn configure_stream(stream: &TcpStream, options: &ConnectionOptions) -> io::Result<()> {
    stream.set_read_timeout(options.op_timeout)?;
    stream.set_write_timeout(options.op_timeout)?;
    Ok(())
}
