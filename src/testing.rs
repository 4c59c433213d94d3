//! In-process mock server for driver tests
//!
//! Each accepted connection gets its own thread. Frames are decoded with
//! [`RequestFrame::parse`], recorded, and handed to a shared handler that
//! decides what goes back on the wire.

use crate::protocol::{MsgHeader, Reply, ReplyFields, RequestBody, RequestFrame, HEADER_LEN};
use bson::{rawdoc, RawArrayBuf, RawDocument, RawDocumentBuf};
use bytes::Bytes;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

type Handler = Box<dyn FnMut(&RequestFrame) -> Action + Send>;

/// What the server does with one request
pub enum Action {
    Reply {
        fields: ReplyFields,
        documents: Vec<RawDocumentBuf>,
    },
    /// Write these bytes verbatim
    Raw(Bytes),
    NoReply,
    /// Close the socket without answering
    Close,
}

impl Action {
    pub fn reply(cursor_id: i64, documents: Vec<RawDocumentBuf>) -> Self {
        Self::batch(cursor_id, 0, documents)
    }

    pub fn batch(cursor_id: i64, starting_from: i32, documents: Vec<RawDocumentBuf>) -> Self {
        Action::Reply {
            fields: ReplyFields::new(cursor_id, starting_from, documents.len() as i32),
            documents,
        }
    }

    /// A single-document command reply
    pub fn command(doc: RawDocumentBuf) -> Self {
        Self::reply(0, vec![doc])
    }
}

/// Build an `ismaster` response document
pub fn ismaster_doc(is_master: bool, set_name: Option<&str>, hosts: &[String]) -> RawDocumentBuf {
    let mut doc = rawdoc! { "ismaster": is_master, "ok": 1.0 };
    if let Some(name) = set_name {
        doc.append("setName", name);
    }
    if !hosts.is_empty() {
        let mut list = RawArrayBuf::new();
        for host in hosts {
            list.push(host.as_str());
        }
        doc.append("hosts", list);
    }
    doc
}

/// Whether `frame` is a command query named `name`
pub fn is_command(frame: &RequestFrame, name: &str) -> bool {
    match &frame.body {
        RequestBody::Query { ns, query, .. } => {
            ns.ends_with(".$cmd")
                && query
                    .iter()
                    .next()
                    .and_then(|entry| entry.ok())
                    .map(|(key, _)| key.eq_ignore_ascii_case(name))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

/// A port nothing is listening on
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A bound listener that is not serving yet; lets tests learn ports up
/// front when servers need to advertise each other.
pub struct PendingServer {
    listener: TcpListener,
}

impl PendingServer {
    pub fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").unwrap(),
        }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.port())
    }

    pub fn serve<F>(self, handler: F) -> MockServer
    where
        F: FnMut(&RequestFrame) -> Action + Send + 'static,
    {
        MockServer::serve(self.listener, Box::new(handler))
    }
}

pub struct MockServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RequestFrame>>>,
    connections: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

impl MockServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: FnMut(&RequestFrame) -> Action + Send + 'static,
    {
        PendingServer::bind().serve(handler)
    }

    fn serve(listener: TcpListener, handler: Handler) -> Self {
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let handler = Arc::new(Mutex::new(handler));

        let server = Self {
            addr,
            requests: requests.clone(),
            connections: connections.clone(),
            stopped: stopped.clone(),
        };

        thread::spawn(move || {
            for stream in listener.incoming() {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                connections.fetch_add(1, Ordering::SeqCst);
                let requests = requests.clone();
                let handler = handler.clone();
                thread::spawn(move || serve_connection(stream, requests, handler));
            }
        });

        server
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.port())
    }

    /// Every request received so far, across all connections
    pub fn requests(&self) -> Vec<RequestFrame> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        // wake the accept loop so it sees the flag
        let _ = TcpStream::connect(self.addr);
    }
}

fn serve_connection(
    mut stream: TcpStream,
    requests: Arc<Mutex<Vec<RequestFrame>>>,
    handler: Arc<Mutex<Handler>>,
) {
    static NEXT_ID: AtomicI32 = AtomicI32::new(1);

    loop {
        let mut head = [0u8; HEADER_LEN];
        if stream.read_exact(&mut head).is_err() {
            return;
        }
        let Ok(header) = MsgHeader::parse(&head) else {
            return;
        };
        let mut data = head.to_vec();
        data.resize(header.length as usize, 0);
        if stream.read_exact(&mut data[HEADER_LEN..]).is_err() {
            return;
        }
        let Ok(frame) = RequestFrame::parse(&data) else {
            return;
        };

        requests.lock().unwrap().push(frame.clone());
        let action = {
            let mut handler = handler.lock().unwrap();
            (*handler)(&frame)
        };

        let response_id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        let bytes = match action {
            Action::Reply { fields, documents } => {
                let docs: Vec<&RawDocument> = documents.iter().map(|d| &**d).collect();
                Reply::encode(response_id, frame.header.request_id, fields, &docs)
            }
            Action::Raw(bytes) => bytes,
            Action::NoReply => continue,
            Action::Close => {
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        };
        if stream.write_all(&bytes).is_err() {
            return;
        }
    }
}
