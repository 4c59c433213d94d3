/// `OP_REPLY` parsing and encoding
use super::{
    take_document, MsgHeader, OpCode, ResponseFlags, HEADER_LEN, MIN_DOCUMENT_LEN,
    REPLY_FIELDS_LEN,
};
use crate::error::ProtocolError;
use bson::RawDocument;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::ops::Range;

/// Fields following the header of every reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyFields {
    pub flags: ResponseFlags,
    /// Zero once the server has no more batches
    pub cursor_id: i64,
    /// Offset of this batch within the whole result set
    pub starting_from: i32,
    pub number_returned: i32,
}

impl ReplyFields {
    pub fn new(cursor_id: i64, starting_from: i32, number_returned: i32) -> Self {
        Self {
            flags: ResponseFlags::empty(),
            cursor_id,
            starting_from,
            number_returned,
        }
    }

    pub fn with_flags(mut self, flags: ResponseFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// One parsed batch. The frame bytes are kept as-is and documents are
/// handed out as slices into them.
#[derive(Debug, Clone)]
pub struct Reply {
    header: MsgHeader,
    fields: ReplyFields,
    frame: Bytes,
    spans: Vec<Range<usize>>,
}

impl Reply {
    /// Parse a complete `OP_REPLY` frame.
    ///
    /// The declared length must equal the frame size, and the declared
    /// number of documents must exactly fill the rest of the frame.
    pub fn parse(frame: Bytes) -> Result<Self, ProtocolError> {
        let header = MsgHeader::parse(&frame)?;
        if header.length as usize != frame.len() {
            return Err(ProtocolError::LengthMismatch {
                declared: header.length as usize,
                available: frame.len(),
            });
        }
        if header.op_code != OpCode::Reply {
            return Err(ProtocolError::UnexpectedOpCode(header.op_code.as_i32()));
        }

        let body_start = HEADER_LEN + REPLY_FIELDS_LEN;
        if frame.len() < body_start {
            return Err(ProtocolError::Truncated {
                needed: body_start,
                available: frame.len(),
            });
        }

        let mut cur = &frame[HEADER_LEN..body_start];
        let fields = ReplyFields {
            flags: ResponseFlags::from_bits(cur.get_i32_le()),
            cursor_id: cur.get_i64_le(),
            starting_from: cur.get_i32_le(),
            number_returned: cur.get_i32_le(),
        };

        // Every document takes at least MIN_DOCUMENT_LEN bytes
        let capacity = (frame.len() - body_start) / MIN_DOCUMENT_LEN;
        if fields.number_returned < 0 || fields.number_returned as usize > capacity {
            return Err(ProtocolError::DocumentCount {
                declared: fields.number_returned,
                capacity,
            });
        }

        let mut spans = Vec::with_capacity(fields.number_returned as usize);
        let mut cur = &frame[body_start..];
        for _ in 0..fields.number_returned {
            let offset = frame.len() - cur.len();
            let doc = take_document(&mut cur, offset)?;
            spans.push(offset..offset + doc.len());
        }

        if !cur.is_empty() {
            return Err(ProtocolError::TrailingBytes {
                declared: fields.number_returned,
                remaining: cur.len(),
            });
        }

        Ok(Self {
            header,
            fields,
            frame,
            spans,
        })
    }

    /// Parse a reply and check it answers `request_id`
    pub fn parse_for(frame: Bytes, request_id: i32) -> Result<Self, ProtocolError> {
        let reply = Self::parse(frame)?;
        if reply.header.response_to != request_id {
            return Err(ProtocolError::ResponseMismatch {
                expected: request_id,
                got: reply.header.response_to,
            });
        }
        Ok(reply)
    }

    /// Build a reply frame, as a server would send it
    pub fn encode(
        request_id: i32,
        response_to: i32,
        fields: ReplyFields,
        documents: &[&RawDocument],
    ) -> Bytes {
        let mut buf = BytesMut::new();
        MsgHeader::new(0, request_id, response_to, OpCode::Reply).write_to(&mut buf);
        buf.put_i32_le(fields.flags.bits());
        buf.put_i64_le(fields.cursor_id);
        buf.put_i32_le(fields.starting_from);
        buf.put_i32_le(fields.number_returned);
        for doc in documents {
            buf.put_slice(doc.as_bytes());
        }

        let length = (buf.len() as i32).to_le_bytes();
        buf[0..4].copy_from_slice(&length);
        buf.freeze()
    }

    pub fn header(&self) -> &MsgHeader {
        &self.header
    }

    pub fn fields(&self) -> &ReplyFields {
        &self.fields
    }

    pub fn cursor_id(&self) -> i64 {
        self.fields.cursor_id
    }

    pub fn flags(&self) -> ResponseFlags {
        self.fields.flags
    }

    /// Number of documents in this batch
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Raw bytes of the document at `index`
    pub fn document_bytes(&self, index: usize) -> Option<&[u8]> {
        self.spans.get(index).map(|span| &self.frame[span.clone()])
    }

    pub fn document(&self, index: usize) -> Option<&RawDocument> {
        self.document_bytes(index)
            .and_then(|bytes| RawDocument::from_bytes(bytes).ok())
    }

    pub fn documents(&self) -> impl Iterator<Item = &RawDocument> + '_ {
        (0..self.spans.len()).filter_map(move |i| self.document(i))
    }

    /// Byte span covered by the batch's documents
    pub fn batch_len(&self) -> usize {
        self.frame.len() - HEADER_LEN - REPLY_FIELDS_LEN
    }
}
