//! mongowire - synchronous client driver for the MongoDB legacy wire protocol
//!
//! A [`Connection`] talks to one server, or to the primary of a replica set
//! found by discovery over a seed list. Requests are framed as `OP_*`
//! messages, one in flight at a time, and query results stream through a
//! [`Cursor`] that fetches further batches on demand.
//!
//! Documents cross the API as `bson` raw documents; the driver itself only
//! looks inside command replies.

pub mod commands;
pub mod config;
pub mod error;
pub mod core;
pub mod protocol;
pub mod utils;

#[cfg(test)]
mod testing;

pub use crate::commands::command_succeeded;
pub use crate::config::Config;
pub use crate::core::{
    Connection, ConnectionOptions, Cursor, HostAddress, IsMaster, LastError, ReplicaSet,
    DEFAULT_PORT,
};
pub use crate::error::{
    ConnectError, ConnectStatus, ErrorKind, ProtocolError, WireError, WireResult,
};
pub use crate::protocol::{IndexOptions, QueryOptions, ResponseFlags, UpdateFlags};
