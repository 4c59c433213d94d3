/// Request messages: encoding for the driver, decoding for servers and tests
use super::{
    get_cstring, put_cstring, require, take_document, MsgHeader, OpCode, QueryOptions,
    UpdateFlags, HEADER_LEN, MAX_MESSAGE_SIZE,
};
use crate::error::{ProtocolError, WireError, WireResult};
use bson::{RawDocument, RawDocumentBuf};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// An outgoing operation, borrowing its namespace and documents from the caller
#[derive(Debug, Clone)]
pub enum Request<'a> {
    /// Generic diagnostic message
    Msg { message: &'a str },
    Update {
        ns: &'a str,
        flags: UpdateFlags,
        selector: &'a RawDocument,
        update: &'a RawDocument,
    },
    Insert {
        ns: &'a str,
        documents: Vec<&'a RawDocument>,
    },
    Query {
        ns: &'a str,
        options: QueryOptions,
        skip: i32,
        limit: i32,
        query: &'a RawDocument,
        fields: Option<&'a RawDocument>,
    },
    GetMore {
        ns: &'a str,
        batch_size: i32,
        cursor_id: i64,
    },
    Delete {
        ns: &'a str,
        selector: &'a RawDocument,
    },
    KillCursors { cursor_ids: &'a [i64] },
}

impl<'a> Request<'a> {
    pub fn op_code(&self) -> OpCode {
        match self {
            Request::Msg { .. } => OpCode::Msg,
            Request::Update { .. } => OpCode::Update,
            Request::Insert { .. } => OpCode::Insert,
            Request::Query { .. } => OpCode::Query,
            Request::GetMore { .. } => OpCode::GetMore,
            Request::Delete { .. } => OpCode::Delete,
            Request::KillCursors { .. } => OpCode::KillCursors,
        }
    }

    fn namespace(&self) -> Option<&'a str> {
        match self {
            Request::Update { ns, .. }
            | Request::Insert { ns, .. }
            | Request::Query { ns, .. }
            | Request::GetMore { ns, .. }
            | Request::Delete { ns, .. } => Some(*ns),
            Request::Msg { .. } | Request::KillCursors { .. } => None,
        }
    }

    /// Serialize into a complete frame. The header length is patched in
    /// once the body has been assembled.
    pub fn encode(&self, request_id: i32) -> WireResult<Bytes> {
        if let Some(ns) = self.namespace() {
            if ns.is_empty() || ns.contains('\0') {
                return Err(WireError::argument(format!("invalid namespace '{ns}'")));
            }
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + 64);
        MsgHeader::new(0, request_id, 0, self.op_code()).write_to(&mut buf);

        match self {
            Request::Msg { message } => {
                if message.contains('\0') {
                    return Err(WireError::argument("message contains NUL"));
                }
                put_cstring(&mut buf, message);
            }
            Request::Update {
                ns,
                flags,
                selector,
                update,
            } => {
                buf.put_i32_le(0);
                put_cstring(&mut buf, ns);
                buf.put_i32_le(flags.bits());
                buf.put_slice(selector.as_bytes());
                buf.put_slice(update.as_bytes());
            }
            Request::Insert { ns, documents } => {
                if documents.is_empty() {
                    return Err(WireError::argument("insert requires at least one document"));
                }
                buf.put_i32_le(0);
                put_cstring(&mut buf, ns);
                for doc in documents {
                    buf.put_slice(doc.as_bytes());
                }
            }
            Request::Query {
                ns,
                options,
                skip,
                limit,
                query,
                fields,
            } => {
                buf.put_i32_le(options.bits());
                put_cstring(&mut buf, ns);
                buf.put_i32_le(*skip);
                buf.put_i32_le(*limit);
                buf.put_slice(query.as_bytes());
                if let Some(fields) = fields {
                    buf.put_slice(fields.as_bytes());
                }
            }
            Request::GetMore {
                ns,
                batch_size,
                cursor_id,
            } => {
                buf.put_i32_le(0);
                put_cstring(&mut buf, ns);
                buf.put_i32_le(*batch_size);
                buf.put_i64_le(*cursor_id);
            }
            Request::Delete { ns, selector } => {
                buf.put_i32_le(0);
                put_cstring(&mut buf, ns);
                buf.put_i32_le(0);
                buf.put_slice(selector.as_bytes());
            }
            Request::KillCursors { cursor_ids } => {
                if cursor_ids.is_empty() {
                    return Err(WireError::argument("kill-cursors requires at least one id"));
                }
                buf.put_i32_le(0);
                buf.put_i32_le(cursor_ids.len() as i32);
                for id in cursor_ids.iter() {
                    buf.put_i64_le(*id);
                }
            }
        }

        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(WireError::argument(format!(
                "message of {} bytes exceeds the {} byte limit",
                buf.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        let length = (buf.len() as i32).to_le_bytes();
        buf[0..4].copy_from_slice(&length);
        Ok(buf.freeze())
    }
}

/// Owned form of a decoded request body
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Msg {
        message: String,
    },
    Update {
        ns: String,
        flags: UpdateFlags,
        selector: RawDocumentBuf,
        update: RawDocumentBuf,
    },
    Insert {
        ns: String,
        documents: Vec<RawDocumentBuf>,
    },
    Query {
        ns: String,
        options: QueryOptions,
        skip: i32,
        limit: i32,
        query: RawDocumentBuf,
        fields: Option<RawDocumentBuf>,
    },
    GetMore {
        ns: String,
        batch_size: i32,
        cursor_id: i64,
    },
    Delete {
        ns: String,
        flags: i32,
        selector: RawDocumentBuf,
    },
    KillCursors {
        cursor_ids: Vec<i64>,
    },
}

/// A decoded request frame
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    pub header: MsgHeader,
    pub body: RequestBody,
}

impl RequestFrame {
    /// Parse a complete request frame. The header's declared length must
    /// match `data` exactly.
    pub fn parse(data: &[u8]) -> WireResult<Self> {
        let header = MsgHeader::parse(data)?;
        if header.length as usize != data.len() {
            return Err(ProtocolError::LengthMismatch {
                declared: header.length as usize,
                available: data.len(),
            }
            .into());
        }

        let mut cur = &data[HEADER_LEN..];
        let body = match header.op_code {
            OpCode::Msg => RequestBody::Msg {
                message: get_cstring(&mut cur)?,
            },
            OpCode::Update => {
                require(cur, 4)?;
                cur.advance(4);
                let ns = get_cstring(&mut cur)?;
                require(cur, 4)?;
                let flags = UpdateFlags::from_bits(cur.get_i32_le());
                let selector = owned_document(&mut cur, data.len())?;
                let update = owned_document(&mut cur, data.len())?;
                RequestBody::Update {
                    ns,
                    flags,
                    selector,
                    update,
                }
            }
            OpCode::Insert => {
                require(cur, 4)?;
                cur.advance(4);
                let ns = get_cstring(&mut cur)?;
                let mut documents = Vec::new();
                while !cur.is_empty() {
                    documents.push(owned_document(&mut cur, data.len())?);
                }
                RequestBody::Insert { ns, documents }
            }
            OpCode::Query => {
                require(cur, 4)?;
                let options = QueryOptions::from_bits(cur.get_i32_le());
                let ns = get_cstring(&mut cur)?;
                require(cur, 8)?;
                let skip = cur.get_i32_le();
                let limit = cur.get_i32_le();
                let query = owned_document(&mut cur, data.len())?;
                let fields = if cur.is_empty() {
                    None
                } else {
                    Some(owned_document(&mut cur, data.len())?)
                };
                RequestBody::Query {
                    ns,
                    options,
                    skip,
                    limit,
                    query,
                    fields,
                }
            }
            OpCode::GetMore => {
                require(cur, 4)?;
                cur.advance(4);
                let ns = get_cstring(&mut cur)?;
                require(cur, 12)?;
                let batch_size = cur.get_i32_le();
                let cursor_id = cur.get_i64_le();
                RequestBody::GetMore {
                    ns,
                    batch_size,
                    cursor_id,
                }
            }
            OpCode::Delete => {
                require(cur, 4)?;
                cur.advance(4);
                let ns = get_cstring(&mut cur)?;
                require(cur, 4)?;
                let flags = cur.get_i32_le();
                let selector = owned_document(&mut cur, data.len())?;
                RequestBody::Delete {
                    ns,
                    flags,
                    selector,
                }
            }
            OpCode::KillCursors => {
                require(cur, 8)?;
                cur.advance(4);
                let count = cur.get_i32_le();
                if count < 0 {
                    return Err(ProtocolError::InvalidLength(count).into());
                }
                require(cur, count as usize * 8)?;
                let cursor_ids = (0..count).map(|_| cur.get_i64_le()).collect();
                RequestBody::KillCursors { cursor_ids }
            }
            OpCode::Reply => return Err(ProtocolError::UnexpectedOpCode(1).into()),
        };

        if !cur.is_empty() {
            return Err(ProtocolError::LengthMismatch {
                declared: header.length as usize,
                available: data.len() - cur.len(),
            }
            .into());
        }

        Ok(Self { header, body })
    }
}

fn owned_document(cur: &mut &[u8], total: usize) -> WireResult<RawDocumentBuf> {
    let offset = total - cur.len();
    let bytes = take_document(cur, offset)?;
    Ok(RawDocumentBuf::from_bytes(bytes.to_vec())?)
}
