//! A scripted server speaking the wire protocol over loopback TCP.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use bson::{doc, Document};

use mongoreplay_wire::{read_raw_op, Op};

use crate::ops::reply_like;

/// Decides the reply to a request: `(cursor_id, body)`.
pub type Responder = dyn Fn(&Op) -> (i64, Document) + Send + Sync;

struct Shared {
    received: Mutex<Vec<Op>>,
    connections: AtomicUsize,
    next_request_id: AtomicI32,
    stopping: AtomicBool,
    respond: Box<Responder>,
}

/// Accepts connections on an ephemeral loopback port and answers every
/// request that expects a reply.
///
/// Every received op is kept, in arrival order across connections, for
/// later inspection.
pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Start a server that answers every request with `{ok: 1}` and no
    /// cursor.
    pub fn start_ok() -> io::Result<Self> {
        Self::start(|_| (0, doc! { "ok": 1.0 }))
    }

    /// Start a server whose replies come from `respond`.
    pub fn start<F>(respond: F) -> io::Result<Self>
    where
        F: Fn(&Op) -> (i64, Document) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            next_request_id: AtomicI32::new(1),
            stopping: AtomicBool::new(false),
            respond: Box::new(respond),
        });
        let accept_shared = Arc::clone(&shared);
        let accept = thread::Builder::new()
            .name("mock-server-accept".into())
            .spawn(move || accept_loop(listener, accept_shared))?;
        Ok(Self {
            addr,
            shared,
            accept: Some(accept),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `host:port` suitable for a replay target.
    pub fn uri(&self) -> String {
        self.addr.to_string()
    }

    /// Snapshot of every op received so far.
    pub fn received(&self) -> Vec<Op> {
        self.shared.received.lock().unwrap().clone()
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        // Wake the blocking accept.
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.accept.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    for stream in listener.incoming() {
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }
        let Ok(stream) = stream else { continue };
        shared.connections.fetch_add(1, Ordering::SeqCst);
        let conn_shared = Arc::clone(&shared);
        let _ = thread::Builder::new()
            .name("mock-server-conn".into())
            .spawn(move || serve(stream, conn_shared));
    }
}

fn serve(mut stream: TcpStream, shared: Arc<Shared>) {
    loop {
        let raw = match read_raw_op(&mut stream) {
            Ok(raw) => raw,
            Err(_) => break,
        };
        let op = match raw.parse() {
            Ok(op) => op,
            Err(e) => {
                tracing::warn!(error = %e, "mock server got an undecodable op");
                break;
            }
        };
        let expects_reply = op.expects_reply();
        let answer = expects_reply.then(|| (shared.respond)(&op));
        shared.received.lock().unwrap().push(op.clone());

        if let Some((cursor_id, body)) = answer {
            let id = shared.next_request_id.fetch_add(1, Ordering::SeqCst);
            let reply = reply_like(&op, id, cursor_id, body);
            let Ok(bytes) = reply.encode() else { break };
            if stream.write_all(&bytes).and_then(|_| stream.flush()).is_err() {
                break;
            }
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}
