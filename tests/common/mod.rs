//! Shared helpers for driving a connection over an in-memory transport.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use conduit::http::connection::{Connection, Release, ServerContext};
use conduit::http::date::CachedDate;
use conduit::http::middleware::{Middleware, MiddlewareChain, PriorContexts};
use conduit::http::request::Request;
use conduit::http::response::Response;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::task::JoinHandle;

pub const DATE: &str = "Tue, 15 Nov 1994 08:12:31 GMT";

/// Ordered log of hook invocations shared between recorders and handlers.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

/// Middleware recording its hook calls; optionally rejects with `status`.
pub struct Recorder {
    pub id: usize,
    pub events: Events,
    pub reject: Option<u16>,
}

impl Recorder {
    pub fn new(id: usize, events: &Events) -> Self {
        Self {
            id,
            events: events.clone(),
            reject: None,
        }
    }

    pub fn rejecting(id: usize, events: &Events, status: u16) -> Self {
        Self {
            reject: Some(status),
            ..Self::new(id, events)
        }
    }
}

impl Middleware for Recorder {
    type Context = ();

    fn before_handle(&self, _: &mut Request, res: &mut Response, _: &mut (), _: &PriorContexts<'_>) {
        self.events.push(format!("before{}", self.id));
        if let Some(status) = self.reject {
            res.code = status;
            res.end();
        }
    }

    fn after_handle(&self, _: &Request, _: &mut Response, _: &mut (), _: &PriorContexts<'_>) {
        self.events.push(format!("after{}", self.id));
    }
}

pub fn recorders(n: usize, events: &Events) -> MiddlewareChain {
    (0..n).fold(MiddlewareChain::new(), |chain, id| chain.with(Recorder::new(id, events)))
}

pub fn context(ctx: ServerContext) -> Arc<ServerContext> {
    Arc::new(
        ctx.server_name("test")
            .date(Arc::new(CachedDate::fixed(DATE)))
            .idle_timeout(Duration::from_secs(5)),
    )
}

/// Starts a connection task and returns the client end of its transport.
pub fn start(shared: Arc<ServerContext>) -> (DuplexStream, JoinHandle<Release>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(Connection::new(server, shared).run());
    (client, task)
}

pub struct Wire {
    pub head: String,
    pub body: Vec<u8>,
}

impl Wire {
    pub fn status_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(": ")?;
            k.eq_ignore_ascii_case(name).then_some(v)
        })
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }
}

/// Reads exactly one framed response.
pub async fn read_response(client: &mut DuplexStream) -> Wire {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8(buf[..end].to_vec()).unwrap();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .map(|v| v.parse::<usize>().unwrap())
                .unwrap_or(0);
            let start = end + 4;
            if buf.len() >= start + len {
                assert_eq!(buf.len(), start + len, "bytes after the response body");
                return Wire {
                    head,
                    body: buf[start..].to_vec(),
                };
            }
        }
        let n = client.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-response");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// True once the server side has closed the transport.
pub async fn at_eof(client: &mut DuplexStream) -> bool {
    let mut chunk = [0u8; 64];
    matches!(client.read(&mut chunk).await, Ok(0))
}
