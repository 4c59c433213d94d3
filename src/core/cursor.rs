/// Streaming access to multi-batch query results
use super::connection::Connection;
use crate::error::WireResult;
use crate::protocol::{Reply, Request, ResponseFlags};
use bson::{RawDocument, RawDocumentBuf};
use tracing::debug;

/// Result cursor over a query.
///
/// The cursor holds the connection mutably for its whole life, so nothing
/// else can be sent on the socket while results are being read.
pub struct Cursor<'a> {
    conn: &'a mut Connection,
    ns: &'a str,
    reply: Reply,
    /// Index of the next document in the current batch
    position: usize,
    current: Option<usize>,
    /// Total documents to hand out; 0 means unlimited
    limit: i32,
    batch_size: i32,
    returned: i32,
    exhausted: bool,
    killed: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(conn: &'a mut Connection, ns: &'a str, reply: Reply, limit: i32) -> Self {
        let batch_size = conn.options().batch_size;
        Self {
            conn,
            ns,
            reply,
            position: 0,
            current: None,
            limit: limit.max(0),
            batch_size,
            returned: 0,
            exhausted: false,
            killed: false,
        }
    }

    /// Documents requested per get-more when no limit applies
    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Move to the next document, fetching another batch if the current one
    /// is used up and the server still holds the cursor.
    ///
    /// Returns `false` when no document is available. That is permanent once
    /// [`is_exhausted`](Self::is_exhausted) reports true; a tailable cursor
    /// can return `false` on an empty batch and produce more later.
    pub fn advance(&mut self) -> bool {
        self.current = None;
        if self.exhausted {
            return false;
        }
        if self.limit > 0 && self.returned >= self.limit {
            self.exhausted = true;
            return false;
        }

        if self.position >= self.reply.len() {
            if !self.server_cursor_open() {
                self.exhausted = true;
                return false;
            }
            if !self.get_more() || self.position >= self.reply.len() {
                return false;
            }
        }

        self.current = Some(self.position);
        self.position += 1;
        self.returned += 1;
        true
    }

    /// Document the last successful `advance` moved to
    pub fn current(&self) -> Option<&RawDocument> {
        self.current.and_then(|index| self.reply.document(index))
    }

    /// Server-side cursor id of the latest batch; 0 once the server is done
    pub fn id(&self) -> i64 {
        self.reply.cursor_id()
    }

    pub fn namespace(&self) -> &str {
        self.ns
    }

    /// Latest batch, including its response flags
    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Documents handed out so far
    pub fn returned(&self) -> i32 {
        self.returned
    }

    pub fn connection(&self) -> &Connection {
        &*self.conn
    }

    /// Release the cursor without telling the server
    pub fn destroy(self) {}

    /// Ask the server to close the cursor if it still holds one, then
    /// release it
    pub fn kill(mut self) -> WireResult<()> {
        self.exhausted = true;
        if self.server_cursor_open() {
            let id = self.id();
            self.conn.kill_cursors(&[id])?;
            self.killed = true;
        }
        Ok(())
    }

    fn server_cursor_open(&self) -> bool {
        !self.killed
            && self.reply.cursor_id() != 0
            && !self.reply.flags().contains(ResponseFlags::CURSOR_NOT_FOUND)
    }

    fn get_more(&mut self) -> bool {
        let batch_size = if self.limit > 0 {
            self.limit - self.returned
        } else {
            self.batch_size
        };
        let request = Request::GetMore {
            ns: self.ns,
            batch_size,
            cursor_id: self.reply.cursor_id(),
        };

        match self.conn.call(&request) {
            Ok(reply) => {
                self.reply = reply;
                self.position = 0;
                true
            }
            Err(e) => {
                debug!("get-more on {} failed: {}", self.ns, e);
                self.exhausted = true;
                false
            }
        }
    }
}

impl Iterator for Cursor<'_> {
    type Item = RawDocumentBuf;

    fn next(&mut self) -> Option<Self::Item> {
        if self.advance() {
            self.current().map(RawDocument::to_raw_document_buf)
        } else {
            None
        }
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        if self.server_cursor_open() && !self.exhausted {
            debug!(
                "Releasing cursor {} on {} without notifying the server",
                self.id(),
                self.ns
            );
        }
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("ns", &self.ns)
            .field("id", &self.id())
            .field("returned", &self.returned)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::core::Connection;
    use crate::error::ErrorKind;
    use crate::protocol::{QueryOptions, ReplyFields, RequestBody, ResponseFlags};
    use crate::testing::{Action, MockServer};
    use bson::rawdoc;

    fn connected(server: &MockServer) -> Connection {
        let mut conn = Connection::new();
        conn.connect("127.0.0.1", server.port()).unwrap();
        conn
    }

    fn get_mores(server: &MockServer) -> Vec<(String, i32, i64)> {
        server
            .requests()
            .into_iter()
            .filter_map(|frame| match frame.body {
                RequestBody::GetMore {
                    ns,
                    batch_size,
                    cursor_id,
                } => Some((ns, batch_size, cursor_id)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_two_batches() {
        let server = MockServer::start(|frame| match &frame.body {
            RequestBody::Query { .. } => {
                Action::reply(42, vec![rawdoc! { "n": 1 }, rawdoc! { "n": 2 }])
            }
            RequestBody::GetMore { .. } => Action::batch(0, 2, vec![rawdoc! { "n": 3 }]),
            _ => Action::NoReply,
        });
        let mut conn = connected(&server);
        let query = rawdoc! {};

        let mut cursor = conn
            .find("db.c", &query, None, 0, 0, QueryOptions::empty())
            .unwrap();
        let mut seen = Vec::new();
        while cursor.advance() {
            seen.push(cursor.current().unwrap().get_i32("n").unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(cursor.is_exhausted());
        assert!(!cursor.advance());
        assert!(cursor.current().is_none());
        drop(cursor);

        let get_mores = get_mores(&server);
        assert_eq!(get_mores.len(), 1);
        assert_eq!(get_mores[0].0, "db.c");
        assert_eq!(get_mores[0].2, 42);
    }

    #[test]
    fn test_iterator_collects_all_batches() {
        let server = MockServer::start(|frame| match &frame.body {
            RequestBody::Query { .. } => Action::reply(7, vec![rawdoc! { "n": 1 }]),
            RequestBody::GetMore { .. } => Action::batch(0, 1, vec![rawdoc! { "n": 2 }]),
            _ => Action::NoReply,
        });
        let mut conn = connected(&server);
        let query = rawdoc! {};

        let docs: Vec<_> = conn
            .find("db.c", &query, None, 0, 0, QueryOptions::empty())
            .unwrap()
            .collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].get_i32("n").unwrap(), 2);
    }

    #[test]
    fn test_get_more_failure_exhausts_cursor() {
        let server = MockServer::start(|frame| match &frame.body {
            RequestBody::Query { .. } => Action::reply(42, vec![rawdoc! { "n": 1 }]),
            RequestBody::GetMore { .. } => Action::Close,
            _ => Action::NoReply,
        });
        let mut conn = connected(&server);
        let query = rawdoc! {};

        let mut cursor = conn
            .find("db.c", &query, None, 0, 0, QueryOptions::empty())
            .unwrap();
        assert!(cursor.advance());
        assert!(!cursor.advance());
        assert!(cursor.is_exhausted());
        assert!(!cursor.advance());
        assert!(!cursor.connection().is_connected());
        drop(cursor);

        assert_eq!(conn.last_error().unwrap().kind, ErrorKind::Io);
        conn.reconnect().unwrap();
        assert!(conn.is_connected());
    }

    #[test]
    fn test_limit_caps_results() {
        let server = MockServer::start(|frame| match &frame.body {
            RequestBody::Query { .. } => Action::reply(
                42,
                vec![rawdoc! { "n": 1 }, rawdoc! { "n": 2 }, rawdoc! { "n": 3 }],
            ),
            _ => Action::NoReply,
        });
        let mut conn = connected(&server);
        let query = rawdoc! {};

        let cursor = conn
            .find("db.c", &query, None, 2, 0, QueryOptions::empty())
            .unwrap();
        assert_eq!(cursor.count(), 2);
        assert!(get_mores(&server).is_empty());
    }

    #[test]
    fn test_get_more_requests_remaining_limit() {
        let server = MockServer::start(|frame| match &frame.body {
            RequestBody::Query { .. } => {
                Action::reply(42, vec![rawdoc! { "n": 1 }, rawdoc! { "n": 2 }])
            }
            RequestBody::GetMore { .. } => Action::batch(0, 2, vec![rawdoc! { "n": 3 }]),
            _ => Action::NoReply,
        });
        let mut conn = connected(&server);
        let query = rawdoc! {};

        let cursor = conn
            .find("db.c", &query, None, 5, 0, QueryOptions::empty())
            .unwrap();
        assert_eq!(cursor.count(), 3);
        assert_eq!(get_mores(&server)[0].1, 3);
    }

    #[test]
    fn test_cursor_not_found_terminates() {
        let server = MockServer::start(|frame| match &frame.body {
            RequestBody::Query { .. } => Action::reply(42, vec![rawdoc! { "n": 1 }]),
            RequestBody::GetMore { .. } => Action::Reply {
                fields: ReplyFields::new(42, 1, 0).with_flags(ResponseFlags::CURSOR_NOT_FOUND),
                documents: Vec::new(),
            },
            _ => Action::NoReply,
        });
        let mut conn = connected(&server);
        let query = rawdoc! {};

        let mut cursor = conn
            .find("db.c", &query, None, 0, 0, QueryOptions::empty())
            .unwrap();
        assert!(cursor.advance());
        assert!(!cursor.advance());
        assert!(!cursor.advance());
        assert!(cursor.is_exhausted());
        drop(cursor);

        assert_eq!(get_mores(&server).len(), 1);
        assert!(conn.is_connected());
    }

    #[test]
    fn test_tailable_empty_batch_is_not_terminal() {
        let mut polls = 0;
        let server = MockServer::start(move |frame| match &frame.body {
            RequestBody::Query { .. } => Action::reply(42, Vec::new()),
            RequestBody::GetMore { .. } => {
                polls += 1;
                if polls == 1 {
                    Action::batch(42, 0, Vec::new())
                } else {
                    Action::batch(42, 0, vec![rawdoc! { "n": 1 }])
                }
            }
            _ => Action::NoReply,
        });
        let mut conn = connected(&server);
        let query = rawdoc! {};

        let mut cursor = conn
            .find("db.oplog", &query, None, 0, 0, QueryOptions::TAILABLE_CURSOR)
            .unwrap();
        assert!(!cursor.advance());
        assert!(!cursor.is_exhausted());
        assert!(cursor.advance());
        assert_eq!(cursor.current().unwrap().get_i32("n").unwrap(), 1);
    }

    #[test]
    fn test_kill_sends_kill_cursors() {
        let server = MockServer::start(|frame| match &frame.body {
            RequestBody::Query { .. } => Action::reply(42, vec![rawdoc! { "n": 1 }]),
            _ => Action::NoReply,
        });
        let mut conn = connected(&server);
        let query = rawdoc! {};

        let mut cursor = conn
            .find("db.c", &query, None, 0, 0, QueryOptions::empty())
            .unwrap();
        assert!(cursor.advance());
        cursor.kill().unwrap();

        // a second round trip orders the kill before the check
        conn.find("db.c", &query, None, 1, 0, QueryOptions::empty())
            .unwrap()
            .destroy();

        let killed: Vec<Vec<i64>> = server
            .requests()
            .into_iter()
            .filter_map(|frame| match frame.body {
                RequestBody::KillCursors { cursor_ids } => Some(cursor_ids),
                _ => None,
            })
            .collect();
        assert_eq!(killed, vec![vec![42]]);
    }

    #[test]
    fn test_kill_finished_cursor_sends_nothing() {
        let server = MockServer::start(|frame| match &frame.body {
            RequestBody::Query { .. } => Action::reply(0, vec![rawdoc! { "n": 1 }]),
            _ => Action::NoReply,
        });
        let mut conn = connected(&server);
        let query = rawdoc! {};

        let cursor = conn
            .find("db.c", &query, None, 0, 0, QueryOptions::empty())
            .unwrap();
        cursor.kill().unwrap();
        assert_eq!(server.requests().len(), 1);
    }
}
