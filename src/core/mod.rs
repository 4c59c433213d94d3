/// Core connection abstractions: host addresses, the connection itself,
/// replica set discovery and result cursors
pub mod connection;
pub mod cursor;
pub mod operations;
pub mod replset;

pub use connection::{Connection, ConnectionOptions, LastError};
pub use cursor::Cursor;
pub use replset::{IsMaster, ReplicaSet};

use crate::error::ConnectError;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// Port used when a host string carries none
pub const DEFAULT_PORT: u16 = 27017;

/// A server address: host name or numeric address plus port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddress {
    host: String,
    port: u16,
}

impl HostAddress {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Result<Self, ConnectError> {
        let host = host.into();
        let trimmed = host.trim();
        if trimmed.is_empty() {
            return Err(ConnectError::bad_argument("host cannot be empty"));
        }
        if port == 0 {
            return Err(ConnectError::bad_argument(format!(
                "invalid port 0 for host '{trimmed}'"
            )));
        }

        Ok(Self {
            host: trimmed.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve through the platform resolver
    pub fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{self} did not resolve to any address"),
            ));
        }
        Ok(addrs)
    }
}

impl FromStr for HostAddress {
    type Err = ConnectError;

    /// Accepts `host`, `host:port` and `[v6addr]:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| ConnectError::bad_argument(format!("unterminated '[' in '{s}'")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port, s)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(ConnectError::bad_argument(format!("invalid address '{s}'"))),
            };
            return Self::new(host, port);
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => Self::new(host, parse_port(port, s)?),
            Some(_) => Self::new(s, DEFAULT_PORT),
            None => Self::new(s, DEFAULT_PORT),
        }
    }
}

fn parse_port(port: &str, whole: &str) -> Result<u16, ConnectError> {
    port.parse::<u16>()
        .map_err(|_| ConnectError::bad_argument(format!("invalid port in '{whole}'")))
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
