/// CRUD operations on a connection
///
/// Writes are fire-and-forget: the frame is sent and no reply is read.
/// Use `get_last_error` afterwards to learn whether the server applied it.
use super::connection::Connection;
use super::cursor::Cursor;
use crate::error::WireResult;
use crate::protocol::{QueryOptions, Request, UpdateFlags};
use bson::{Document, RawDocument};
use tracing::debug;

impl Connection {
    pub fn insert(&mut self, ns: &str, document: &RawDocument) -> WireResult<()> {
        self.insert_batch(ns, &[document])
    }

    /// Insert several documents with one message
    pub fn insert_batch(&mut self, ns: &str, documents: &[&RawDocument]) -> WireResult<()> {
        self.send_request(&Request::Insert {
            ns,
            documents: documents.to_vec(),
        })?;
        Ok(())
    }

    pub fn update(
        &mut self,
        ns: &str,
        selector: &RawDocument,
        update: &RawDocument,
        flags: UpdateFlags,
    ) -> WireResult<()> {
        self.send_request(&Request::Update {
            ns,
            flags,
            selector,
            update,
        })?;
        Ok(())
    }

    pub fn remove(&mut self, ns: &str, selector: &RawDocument) -> WireResult<()> {
        self.send_request(&Request::Delete { ns, selector })?;
        Ok(())
    }

    /// Send a query and wrap the first batch in a cursor.
    ///
    /// A positive `limit` caps the total number of documents the cursor
    /// hands out.
    pub fn find<'a>(
        &'a mut self,
        ns: &'a str,
        query: &RawDocument,
        fields: Option<&RawDocument>,
        limit: i32,
        skip: i32,
        options: QueryOptions,
    ) -> WireResult<Cursor<'a>> {
        let reply = self.call(&Request::Query {
            ns,
            options,
            skip,
            limit,
            query,
            fields,
        })?;
        Ok(Cursor::new(self, ns, reply, limit))
    }

    /// First document matching `query`, decoded.
    ///
    /// A reply flagged as a query failure yields `None`.
    pub fn find_one(
        &mut self,
        ns: &str,
        query: &RawDocument,
        fields: Option<&RawDocument>,
    ) -> WireResult<Option<Document>> {
        let mut cursor = self.find(ns, query, fields, 1, 0, QueryOptions::empty())?;
        if cursor.reply().flags().is_failure() {
            debug!("find_one on {} failed on the server", ns);
            return Ok(None);
        }
        if !cursor.advance() {
            return Ok(None);
        }
        let decoded = cursor.current().map(Document::try_from).transpose();
        drop(cursor);

        decoded.map_err(|e| self.note(e.into()))
    }

    /// Tell the server to release cursors
    pub fn kill_cursors(&mut self, cursor_ids: &[i64]) -> WireResult<()> {
        self.send_request(&Request::KillCursors { cursor_ids })?;
        Ok(())
    }

    /// Send a diagnostic `OP_MSG`; the server logs it and does not reply
    pub fn send_message(&mut self, message: &str) -> WireResult<()> {
        self.send_request(&Request::Msg { message })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::Connection;
    use crate::protocol::{QueryOptions, ReplyFields, RequestBody, ResponseFlags, UpdateFlags};
    use crate::testing::{Action, MockServer};
    use crate::WireError;
    use bson::rawdoc;

    fn connected(server: &MockServer) -> Connection {
        let mut conn = Connection::new();
        conn.connect("127.0.0.1", server.port()).unwrap();
        conn
    }

    /// Round trip a query so that every earlier fire-and-forget write has
    /// been read by the server
    fn sync(conn: &mut Connection) {
        let query = rawdoc! {};
        conn.find_one("db.sync", &query, None).unwrap();
    }

    fn echo_server() -> MockServer {
        MockServer::start(|frame| match &frame.body {
            RequestBody::Query { .. } => Action::reply(0, vec![rawdoc! { "ok": 1.0 }]),
            _ => Action::NoReply,
        })
    }

    #[test]
    fn test_writes_are_framed() {
        let server = echo_server();
        let mut conn = connected(&server);

        let a = rawdoc! { "user": "alice" };
        let b = rawdoc! { "user": "bob" };
        let set = rawdoc! { "$set": { "enabled": false } };
        conn.insert("radius.acct", &a).unwrap();
        conn.insert_batch("radius.acct", &[&a, &b]).unwrap();
        conn.update("radius.users", &a, &set, UpdateFlags::MULTI).unwrap();
        conn.remove("radius.users", &b).unwrap();
        sync(&mut conn);

        let bodies: Vec<RequestBody> = server.requests().into_iter().map(|f| f.body).collect();
        assert_eq!(
            bodies[0],
            RequestBody::Insert {
                ns: "radius.acct".to_string(),
                documents: vec![a.clone()],
            }
        );
        assert!(matches!(&bodies[1], RequestBody::Insert { documents, .. } if documents.len() == 2));
        assert_eq!(
            bodies[2],
            RequestBody::Update {
                ns: "radius.users".to_string(),
                flags: UpdateFlags::MULTI,
                selector: a,
                update: set,
            }
        );
        assert!(matches!(&bodies[3], RequestBody::Delete { ns, .. } if ns == "radius.users"));
    }

    #[test]
    fn test_find_one() {
        let server = MockServer::start(|frame| match &frame.body {
            RequestBody::Query { limit, .. } => {
                assert_eq!(*limit, 1);
                Action::reply(0, vec![rawdoc! { "user": "alice", "password": "secret" }])
            }
            _ => Action::NoReply,
        });
        let mut conn = connected(&server);

        let query = rawdoc! { "user": "alice" };
        let fields = rawdoc! { "password": 1 };
        let doc = conn
            .find_one("radius.users", &query, Some(&fields))
            .unwrap()
            .unwrap();
        assert_eq!(doc.get_str("password").unwrap(), "secret");
    }

    #[test]
    fn test_find_one_no_match_and_failure() {
        let mut calls = 0;
        let server = MockServer::start(move |_| {
            calls += 1;
            if calls == 1 {
                Action::reply(0, Vec::new())
            } else {
                Action::Reply {
                    fields: ReplyFields::new(0, 0, 1).with_flags(ResponseFlags::QUERY_FAILURE),
                    documents: vec![rawdoc! { "$err": "bad query" }],
                }
            }
        });
        let mut conn = connected(&server);
        let query = rawdoc! { "user": "nobody" };

        assert!(conn.find_one("db.c", &query, None).unwrap().is_none());
        assert!(conn.find_one("db.c", &query, None).unwrap().is_none());
        assert!(conn.is_connected());
    }

    #[test]
    fn test_find_sends_query_options() {
        let server = echo_server();
        let mut conn = connected(&server);
        let query = rawdoc! { "enabled": true };

        conn.find(
            "db.c",
            &query,
            None,
            10,
            20,
            QueryOptions::SLAVE_OK | QueryOptions::NO_CURSOR_TIMEOUT,
        )
        .unwrap()
        .destroy();

        match &server.requests()[0].body {
            RequestBody::Query {
                ns,
                options,
                skip,
                limit,
                ..
            } => {
                assert_eq!(ns, "db.c");
                assert_eq!(*skip, 20);
                assert_eq!(*limit, 10);
                assert!(options.contains(QueryOptions::SLAVE_OK));
            }
            other => panic!("Expected query, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_mid_find_disconnects() {
        let server = MockServer::start(|frame| match &frame.body {
            RequestBody::Query { .. } => Action::Close,
            _ => Action::NoReply,
        });
        let mut conn = connected(&server);
        let query = rawdoc! {};

        let err = conn
            .find("db.c", &query, None, 0, 0, QueryOptions::empty())
            .unwrap_err();
        assert!(matches!(err, WireError::Network(_)));
        assert!(!conn.is_connected());
        assert!(err.is_recoverable());

        conn.reconnect().unwrap();
        assert!(conn.is_connected());
    }

    #[test]
    fn test_invalid_namespace_keeps_connection() {
        let server = echo_server();
        let mut conn = connected(&server);
        let doc = rawdoc! { "a": 1 };

        let err = conn.insert("bad\0ns", &doc).unwrap_err();
        assert!(matches!(err, WireError::Argument { .. }));
        assert!(conn.is_connected());
        assert!(conn.insert_batch("db.c", &[]).is_err());
    }

    #[test]
    fn test_kill_cursors_and_message() {
        let server = echo_server();
        let mut conn = connected(&server);

        conn.kill_cursors(&[1, 2, 3]).unwrap();
        conn.send_message("hello").unwrap();
        sync(&mut conn);

        let bodies: Vec<RequestBody> = server.requests().into_iter().map(|f| f.body).collect();
        assert_eq!(
            bodies[0],
            RequestBody::KillCursors {
                cursor_ids: vec![1, 2, 3]
            }
        );
        assert_eq!(
            bodies[1],
            RequestBody::Msg {
                message: "hello".to_string()
            }
        );
    }

    #[test]
    fn test_writes_on_disconnected_connection() {
        let mut conn = Connection::new();
        let doc = rawdoc! { "a": 1 };
        assert!(matches!(
            conn.insert("db.c", &doc),
            Err(WireError::NotConnected)
        ));
    }
}
