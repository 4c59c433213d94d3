/// Database commands run through `<db>.$cmd` queries
///
/// Command replies are returned as data. A reply with a falsy `ok` is not
/// an error at this layer; [`command_succeeded`] interprets it.
pub mod auth;

use crate::core::Connection;
use crate::error::{ProtocolError, WireError, WireResult};
use crate::protocol::{IndexOptions, QueryOptions, Request};
use crate::utils::{namespace, split_namespace};
use bson::{rawdoc, Bson, Document, RawDocument, RawDocumentBuf};
use tracing::debug;

/// Truthiness of a reply field: non-zero numbers and `true`
pub(crate) fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Double(d) => *d != 0.0,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        _ => false,
    }
}

/// Whether a command reply reports `ok`
pub fn command_succeeded(reply: &Document) -> bool {
    reply.get("ok").map(is_truthy).unwrap_or(false)
}

impl Connection {
    /// Run a command against `db` and return the server's reply document
    pub fn run_command(&mut self, db: &str, command: &RawDocument) -> WireResult<Document> {
        let ns = namespace(db, "$cmd");
        let reply = self.call(&Request::Query {
            ns: &ns,
            options: QueryOptions::empty(),
            skip: 0,
            limit: 1,
            query: command,
            fields: None,
        })?;

        let decoded = match reply.document(0) {
            Some(doc) => Document::try_from(doc).map_err(WireError::from),
            None => Err(ProtocolError::MissingDocument.into()),
        };
        decoded.map_err(|e| self.note(e))
    }

    /// Run `{cmd: arg}` with an integer argument
    pub fn simple_int_command(&mut self, db: &str, cmd: &str, arg: i32) -> WireResult<Document> {
        let mut command = RawDocumentBuf::new();
        command.append(cmd, arg);
        self.run_command(db, &command)
    }

    /// Run `{cmd: arg}` with a string argument
    pub fn simple_str_command(&mut self, db: &str, cmd: &str, arg: &str) -> WireResult<Document> {
        let mut command = RawDocumentBuf::new();
        command.append(cmd, arg);
        self.run_command(db, &command)
    }

    /// Number of documents in `db.collection` matching `query`, or `None`
    /// when the server reports failure
    pub fn count(
        &mut self,
        db: &str,
        collection: &str,
        query: Option<&RawDocument>,
    ) -> WireResult<Option<i64>> {
        let mut command = rawdoc! { "count": collection };
        if let Some(query) = query {
            command.append("query", query.to_raw_document_buf());
        }

        let reply = self.run_command(db, &command)?;
        if !command_succeeded(&reply) {
            debug!("count on {}.{} failed: {:?}", db, collection, reply.get("errmsg"));
            return Ok(None);
        }
        let n = match reply.get("n") {
            Some(Bson::Double(n)) => *n as i64,
            Some(Bson::Int32(n)) => *n as i64,
            Some(Bson::Int64(n)) => *n,
            _ => return Ok(None),
        };
        Ok(Some(n))
    }

    pub fn drop_db(&mut self, db: &str) -> WireResult<bool> {
        let reply = self.simple_int_command(db, "dropDatabase", 1)?;
        Ok(command_succeeded(&reply))
    }

    pub fn drop_collection(&mut self, db: &str, collection: &str) -> WireResult<bool> {
        let reply = self.simple_str_command(db, "drop", collection)?;
        Ok(command_succeeded(&reply))
    }

    /// Whether the attached server reports itself primary
    pub fn is_master(&mut self) -> WireResult<bool> {
        Ok(self.discover()?.is_master)
    }

    /// Status of the last write on this socket. `Some` carries the reply
    /// when it reports an error.
    pub fn get_last_error(&mut self, db: &str) -> WireResult<Option<Document>> {
        let reply = self.simple_int_command(db, "getlasterror", 1)?;
        Ok(reported_error(reply))
    }

    /// Most recent error reported on this socket since the last reset
    pub fn get_prev_error(&mut self, db: &str) -> WireResult<Option<Document>> {
        let reply = self.simple_int_command(db, "getpreverror", 1)?;
        Ok(reported_error(reply))
    }

    pub fn reset_error(&mut self, db: &str) -> WireResult<()> {
        self.simple_int_command(db, "reseterror", 1)?;
        Ok(())
    }

    /// Create an index on `ns` with the given key pattern. Returns whether
    /// the server accepted it; the failure reply is available through
    /// `get_last_error`.
    pub fn create_index(
        &mut self,
        ns: &str,
        key: &RawDocument,
        options: IndexOptions,
    ) -> WireResult<bool> {
        let (db, _) = split_namespace(ns)
            .ok_or_else(|| self.note(WireError::argument(format!("invalid namespace '{ns}'"))))?;
        let name = index_name(key).map_err(|e| self.note(e))?;

        let mut spec = rawdoc! {
            "key": key.to_raw_document_buf(),
            "ns": ns,
            "name": name,
        };
        if options.contains(IndexOptions::UNIQUE) {
            spec.append("unique", true);
        }
        if options.contains(IndexOptions::DROP_DUPS) {
            spec.append("dropDups", true);
        }

        self.insert(&namespace(db, "system.indexes"), &spec)?;
        Ok(self.get_last_error(db)?.is_none())
    }

    /// Create an ascending index on a single field
    pub fn create_simple_index(
        &mut self,
        ns: &str,
        field: &str,
        options: IndexOptions,
    ) -> WireResult<bool> {
        let mut key = RawDocumentBuf::new();
        key.append(field, 1);
        self.create_index(ns, &key, options)
    }
}

fn reported_error(reply: Document) -> Option<Document> {
    match reply.get("err") {
        None | Some(Bson::Null) => None,
        Some(_) => Some(reply),
    }
}

/// Index name derived from its key pattern, e.g. `user_1_mac_-1`
fn index_name(key: &RawDocument) -> WireResult<String> {
    let key = Document::try_from(key)?;
    let parts: Vec<String> = key
        .iter()
        .map(|(field, value)| match value {
            Bson::String(s) => format!("{}_{}", field, s),
            Bson::Int32(i) => format!("{}_{}", field, i),
            Bson::Int64(i) => format!("{}_{}", field, i),
            Bson::Double(d) => format!("{}_{}", field, d),
            other => format!("{}_{}", field, other),
        })
        .collect();
    Ok(parts.join("_"))
}
