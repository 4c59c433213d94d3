/// MongoDB legacy wire protocol framing
///
/// Every message starts with a 16-byte header of four little-endian `i32`
/// fields: total length, request id, response-to and op code. The header is
/// written and read field by field; nothing here depends on struct layout.
pub mod message;
pub mod reply;

pub use message::{Request, RequestBody, RequestFrame};
pub use reply::{Reply, ReplyFields};

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;
use std::ops::BitOr;

/// Size of the message header in bytes
pub const HEADER_LEN: usize = 16;

/// Size of the reply fields following the header of an `OP_REPLY`
pub const REPLY_FIELDS_LEN: usize = 20;

/// Largest message the driver will send or accept
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

/// Smallest well-formed document: length prefix plus terminator
pub const MIN_DOCUMENT_LEN: usize = 5;

/// Operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Msg = 1000,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
}

impl OpCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Whether the server answers this operation with an `OP_REPLY`
    pub fn expects_reply(self) -> bool {
        matches!(self, OpCode::Query | OpCode::GetMore)
    }
}

impl TryFrom<i32> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OpCode::Reply),
            1000 => Ok(OpCode::Msg),
            2001 => Ok(OpCode::Update),
            2002 => Ok(OpCode::Insert),
            2004 => Ok(OpCode::Query),
            2005 => Ok(OpCode::GetMore),
            2006 => Ok(OpCode::Delete),
            2007 => Ok(OpCode::KillCursors),
            other => Err(ProtocolError::UnexpectedOpCode(other)),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::Reply => "OP_REPLY",
            OpCode::Msg => "OP_MSG",
            OpCode::Update => "OP_UPDATE",
            OpCode::Insert => "OP_INSERT",
            OpCode::Query => "OP_QUERY",
            OpCode::GetMore => "OP_GET_MORE",
            OpCode::Delete => "OP_DELETE",
            OpCode::KillCursors => "OP_KILL_CURSORS",
        };
        f.write_str(name)
    }
}

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    /// Total message length including this header
    pub length: i32,
    pub request_id: i32,
    /// Zero for requests; the originating request id for replies
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MsgHeader {
    pub fn new(length: i32, request_id: i32, response_to: i32, op_code: OpCode) -> Self {
        Self {
            length,
            request_id,
            response_to,
            op_code,
        }
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.length);
        buf.put_i32_le(self.request_id);
        buf.put_i32_le(self.response_to);
        buf.put_i32_le(self.op_code.as_i32());
    }

    /// Parse the first 16 bytes of `data`
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN,
                available: data.len(),
            });
        }

        let mut cur = &data[..HEADER_LEN];
        let length = cur.get_i32_le();
        let request_id = cur.get_i32_le();
        let response_to = cur.get_i32_le();
        let op_code = OpCode::try_from(cur.get_i32_le())?;

        if length < HEADER_LEN as i32 || length as usize > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::InvalidLength(length));
        }

        Ok(Self {
            length,
            request_id,
            response_to,
            op_code,
        })
    }

    pub fn body_len(&self) -> usize {
        self.length as usize - HEADER_LEN
    }
}

macro_rules! wire_flags {
    ($(#[$meta:meta])* $name:ident { $($(#[$cmeta:meta])* $flag:ident = $bit:expr;)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name(i32);

        impl $name {
            $($(#[$cmeta])* pub const $flag: $name = $name($bit);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn from_bits(bits: i32) -> Self {
                $name(bits)
            }

            pub const fn bits(self) -> i32 {
                self.0
            }

            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

wire_flags! {
    /// `OP_QUERY` option bits
    QueryOptions {
        TAILABLE_CURSOR = 1 << 1;
        SLAVE_OK = 1 << 2;
        OPLOG_REPLAY = 1 << 3;
        NO_CURSOR_TIMEOUT = 1 << 4;
        AWAIT_DATA = 1 << 5;
        EXHAUST = 1 << 6;
        PARTIAL = 1 << 7;
    }
}

wire_flags! {
    /// `OP_UPDATE` flag bits
    UpdateFlags {
        UPSERT = 1 << 0;
        MULTI = 1 << 1;
    }
}

wire_flags! {
    /// Index creation option bits
    IndexOptions {
        UNIQUE = 1 << 0;
        DROP_DUPS = 1 << 1;
    }
}

wire_flags! {
    /// `OP_REPLY` response flag bits; any set bit other than
    /// `AWAIT_CAPABLE` signals a batch-level failure
    ResponseFlags {
        CURSOR_NOT_FOUND = 1 << 0;
        QUERY_FAILURE = 1 << 1;
        SHARD_CONFIG_STALE = 1 << 2;
        AWAIT_CAPABLE = 1 << 3;
    }
}

impl ResponseFlags {
    pub fn is_failure(self) -> bool {
        self.contains(ResponseFlags::CURSOR_NOT_FOUND)
            || self.contains(ResponseFlags::QUERY_FAILURE)
            || self.contains(ResponseFlags::SHARD_CONFIG_STALE)
    }
}

/// Append a NUL-terminated string
pub(crate) fn put_cstring(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

/// Read a NUL-terminated string, advancing `cur` past the terminator
pub(crate) fn get_cstring(cur: &mut &[u8]) -> Result<String, ProtocolError> {
    let end = cur
        .iter()
        .position(|b| *b == 0)
        .ok_or(ProtocolError::UnterminatedString)?;
    let value = String::from_utf8_lossy(&cur[..end]).into_owned();
    cur.advance(end + 1);
    Ok(value)
}

/// Ensure `cur` holds at least `needed` more bytes
pub(crate) fn require(cur: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if cur.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: cur.len(),
        });
    }
    Ok(())
}

/// Split one length-prefixed document off the front of `cur`.
/// `offset` is only used for error reporting.
pub(crate) fn take_document<'a>(
    cur: &mut &'a [u8],
    offset: usize,
) -> Result<&'a [u8], ProtocolError> {
    if cur.len() < 4 {
        return Err(ProtocolError::DocumentOverrun {
            offset,
            length: 0,
        });
    }
    let length = i32::from_le_bytes([cur[0], cur[1], cur[2], cur[3]]);
    if length < MIN_DOCUMENT_LEN as i32 || length as usize > cur.len() {
        return Err(ProtocolError::DocumentOverrun { offset, length });
    }

    let doc = &cur[..length as usize];
    if doc[doc.len() - 1] != 0 {
        return Err(ProtocolError::DocumentOverrun { offset, length });
    }
    cur.advance(length as usize);
    Ok(doc)
}
