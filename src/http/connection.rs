//! Per-connection HTTP state machine.
//!
//! A [`Connection`] owns one accepted transport for its whole life and runs
//! as a single task. Reads and writes are awaited one at a time, so there is
//! never more than one of each in flight. The connection is released exactly
//! once, when [`Connection::run`] returns and drops it.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, trace, warn};

use crate::http::date::CachedDate;
use crate::http::handler::{Handler, Upgraded};
use crate::http::headers::Headers;
use crate::http::middleware::{ContextSet, Dispatch, MiddlewareChain};
use crate::http::parser::{DEFAULT_MAX_REQUEST_BYTES, Progress, RequestParser};
use crate::http::request::{Request, Version, expects_continue};
use crate::http::response::Response;
use crate::http::transport::{Transport, TransportError};
use crate::http::writer::{CONTINUE, Framing, ResponseWriter};

const READ_BUFFER_SIZE: usize = 4096;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared read-only by every connection of a server.
pub struct ServerContext {
    pub server_name: String,
    pub date: Arc<CachedDate>,
    pub middlewares: MiddlewareChain,
    pub handler: Box<dyn Handler>,
    /// How long a single read may wait for data before the connection is closed.
    pub idle_timeout: Duration,
    pub max_request_bytes: usize,
}

impl ServerContext {
    pub fn new(handler: impl Handler) -> Self {
        Self {
            server_name: "conduit".to_string(),
            date: Arc::new(CachedDate::new()),
            middlewares: MiddlewareChain::new(),
            handler: Box::new(handler),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn date(mut self, date: Arc<CachedDate>) -> Self {
        self.date = date;
        self
    }

    pub fn middlewares(mut self, chain: MiddlewareChain) -> Self {
        self.middlewares = chain;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_request_bytes(mut self, max: usize) -> Self {
        self.max_request_bytes = max;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    AwaitingRequest,
    Dispatching,
    Writing,
    Closing,
    Upgrading,
    Destroyed,
}

/// Why a connection was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The response was written and the connection was not kept alive.
    Closed,
    /// The peer closed its side while we waited for a request.
    PeerClosed,
    /// No data arrived before the idle deadline.
    TimedOut,
    /// A transport error or a malformed request while reading.
    ReadError,
    WriteError,
    HandshakeFailed,
    /// The transport was handed to [`Handler::handle_upgrade`].
    Upgraded,
}

/// Keep-alive decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persistence {
    /// Close the transport once the response is written.
    pub close: bool,
    /// Echo `Connection: Keep-Alive` in the response.
    pub keep_alive_header: bool,
}

/// Decides whether the connection outlives this request.
///
/// HTTP/1.0 closes unless the client sent `Connection: Keep-Alive`; HTTP/1.1
/// stays open unless the client sent `Connection: close`.
pub fn persistence(version: Version, headers: &Headers) -> Persistence {
    let keep_alive = headers.has_token("Connection", "keep-alive");
    match version {
        Version::Http10 => Persistence {
            close: !keep_alive,
            keep_alive_header: keep_alive,
        },
        Version::Http11 => {
            let close = headers.has_token("Connection", "close");
            Persistence {
                close,
                keep_alive_header: keep_alive && !close,
            }
        }
    }
}

enum Handled {
    Respond(Request),
    Upgrade(Request),
}

enum Outcome {
    Release(Release),
    Upgrade(Request),
}

pub struct Connection<T> {
    transport: T,
    open: bool,
    peer: Option<SocketAddr>,
    shared: Arc<ServerContext>,
    buffer: Box<[u8]>,
    parser: RequestParser,
    res: Response,
    contexts: ContextSet,
    state: ConnectionState,
    /// The peer shut down its sending side while a request was handled.
    peer_closed: bool,
    close_connection: bool,
    add_keep_alive: bool,
    need_after_handlers: bool,
    _diagnostics: diagnostics::Guard,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, shared: Arc<ServerContext>) -> Self {
        let peer = transport.remote_endpoint();
        let parser = RequestParser::new(shared.max_request_bytes);
        let contexts = shared.middlewares.new_contexts();
        Self {
            transport,
            open: true,
            peer,
            shared,
            buffer: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            parser,
            res: Response::default(),
            contexts,
            state: ConnectionState::Handshaking,
            peer_closed: false,
            close_connection: false,
            add_keep_alive: false,
            need_after_handlers: false,
            _diagnostics: diagnostics::Guard::new(),
        }
    }

    /// Drives the connection until it is released.
    pub async fn run(mut self) -> Release {
        match self.drive().await {
            Outcome::Release(release) => {
                self.teardown().await;
                debug!(peer = ?self.peer, ?release, "connection released");
                release
            }
            Outcome::Upgrade(req) => self.upgrade(req),
        }
    }

    async fn drive(&mut self) -> Outcome {
        if let Err(e) = self.transport.handshake().await {
            log_transport_error(self.peer, "handshake", &e);
            self.open = false;
            return Outcome::Release(Release::HandshakeFailed);
        }

        loop {
            self.set_state(ConnectionState::AwaitingRequest);
            let req = match self.read_request().await {
                Ok(req) => req,
                Err(release) => return Outcome::Release(release),
            };

            self.set_state(ConnectionState::Dispatching);
            let req = match self.handle(req).await {
                Handled::Respond(req) => req,
                Handled::Upgrade(req) => return Outcome::Upgrade(req),
            };

            if let ControlFlow::Break(release) = self.complete_request(&req).await {
                return Outcome::Release(release);
            }
        }
    }

    /// Reads until the parser yields a full request. Each read runs under a
    /// fresh idle deadline; an expired deadline closes the connection.
    async fn read_request(&mut self) -> Result<Request, Release> {
        loop {
            match self.parser.advance() {
                Ok(Progress::Complete(req)) => return Ok(req),
                Ok(Progress::HeadersComplete) => {
                    self.on_headers_complete().await?;
                    continue;
                }
                Ok(Progress::NeedMore) => {}
                Err(e) => {
                    warn!(peer = ?self.peer, error = %e, "malformed request");
                    return Err(Release::ReadError);
                }
            }

            let read = tokio::time::timeout(
                self.shared.idle_timeout,
                self.transport.read(&mut self.buffer),
            )
            .await;

            let n = match read {
                Err(_) => {
                    debug!(peer = ?self.peer, "idle deadline expired, closing");
                    return Err(Release::TimedOut);
                }
                Ok(Err(e)) => {
                    let e = self.transport.classify(e);
                    log_transport_error(self.peer, "read", &e);
                    return Err(Release::ReadError);
                }
                Ok(Ok(0)) => {
                    trace!(peer = ?self.peer, buffered = self.parser.buffered(), "peer closed");
                    return Err(Release::PeerClosed);
                }
                Ok(Ok(n)) => n,
            };
            trace!(bytes = n, "read");
            self.parser.feed(&self.buffer[..n]);
        }
    }

    /// Sends the interim `100 Continue` when an HTTP/1.1 client waits for it
    /// before sending the body. It takes the single write slot like any
    /// other response.
    async fn on_headers_complete(&mut self) -> Result<(), Release> {
        let wants_continue = self
            .parser
            .version()
            .zip(self.parser.headers())
            .is_some_and(|(version, headers)| expects_continue(version, headers));
        if !wants_continue {
            return Ok(());
        }

        let written = async {
            self.transport.write_all(CONTINUE).await?;
            self.transport.flush().await
        }
        .await;
        if let Err(e) = written {
            let e = self.transport.classify(e);
            log_transport_error(self.peer, "write", &e);
            return Err(Release::WriteError);
        }
        trace!("sent 100 Continue");
        Ok(())
    }

    async fn handle(&mut self, mut req: Request) -> Handled {
        let decision = persistence(req.version, &req.headers);
        self.close_connection = decision.close;
        self.add_keep_alive = decision.keep_alive_header;
        self.res.clear();

        info!(
            peer = ?self.peer,
            version = %req.version,
            method = %req.method,
            url = %req.url,
            "request"
        );

        let mut invalid = false;
        if req.version == Version::Http11 {
            if !req.headers.contains("Host") {
                invalid = true;
                self.res = Response::new(400);
            } else if self.parser.is_upgrade() {
                let protocol = req.header("Upgrade").unwrap_or_default();
                if protocol.eq_ignore_ascii_case("h2c") {
                    debug!("ignoring h2c upgrade");
                } else {
                    self.close_connection = true;
                    return Handled::Upgrade(req);
                }
            }
        }

        self.need_after_handlers = false;
        if invalid {
            return Handled::Respond(req);
        }

        let shared = Arc::clone(&self.shared);
        match shared.middlewares.before(&mut req, &mut self.res, &mut self.contexts) {
            Dispatch::ShortCircuited(_) => {}
            Dispatch::Continue => {
                self.need_after_handlers = true;
                self.await_handler(&shared, &req).await;
            }
        }
        Handled::Respond(req)
    }

    /// Awaits the handler while watching the transport, so a client that
    /// goes away during a slow handler is noticed and reported through the
    /// response's [`Liveness`](crate::http::response::Liveness). Bytes that
    /// arrive meanwhile are kept for the next request.
    async fn await_handler(&mut self, shared: &ServerContext, req: &Request) {
        let liveness = self.res.liveness();
        let mut handler = shared.handler.handle(req, &mut self.res);
        loop {
            let watch = self.open
                && !self.peer_closed
                && self.parser.buffered() < shared.max_request_bytes;
            tokio::select! {
                biased;
                () = &mut handler => return,
                read = self.transport.read(&mut self.buffer), if watch => match read {
                    Ok(0) => {
                        debug!(peer = ?self.peer, "peer closed during dispatch");
                        self.peer_closed = true;
                        self.close_connection = true;
                        liveness.mark_closed();
                    }
                    Ok(n) => {
                        trace!(bytes = n, "read during dispatch");
                        self.parser.feed(&self.buffer[..n]);
                    }
                    Err(e) => {
                        let e = self.transport.classify(e);
                        log_transport_error(self.peer, "read", &e);
                        self.open = false;
                        liveness.mark_closed();
                    }
                },
            }
        }
    }

    /// Runs the pending after-handlers, then frames and writes the response.
    async fn complete_request(&mut self, req: &Request) -> ControlFlow<Release> {
        if self.need_after_handlers {
            self.need_after_handlers = false;
            let shared = Arc::clone(&self.shared);
            shared.middlewares.after(req, &mut self.res, &mut self.contexts);
        }

        info!(
            peer = ?self.peer,
            url = %req.url,
            status = self.res.code,
            close = self.close_connection,
            "response"
        );

        if !self.open {
            debug!(peer = ?self.peer, "transport failed during dispatch, response dropped");
            return ControlFlow::Break(Release::ReadError);
        }

        self.set_state(ConnectionState::Writing);
        let date = self.shared.date.get();
        let writer = ResponseWriter::new(
            &mut self.res,
            Framing {
                server_name: &self.shared.server_name,
                date: &date,
                keep_alive: self.add_keep_alive,
            },
        );

        let written = writer.write_to_stream(&mut self.transport).await;
        self.res.clear();
        match written {
            Ok(n) => trace!(bytes = n, "wrote response"),
            Err(e) => {
                let e = self.transport.classify(e);
                log_transport_error(self.peer, "write", &e);
                return ControlFlow::Break(Release::WriteError);
            }
        }

        if self.close_connection {
            return ControlFlow::Break(Release::Closed);
        }
        ControlFlow::Continue(())
    }

    /// Finalises the parser and closes the transport if still open.
    async fn teardown(&mut self) {
        self.set_state(ConnectionState::Closing);
        self.parser.done();
        if self.open {
            self.open = false;
            if let Err(e) = self.transport.shutdown().await {
                trace!(error = %e, "shutdown failed");
            }
        }
        self.set_state(ConnectionState::Destroyed);
    }

    fn upgrade(mut self, req: Request) -> Release {
        self.set_state(ConnectionState::Upgrading);
        info!(
            peer = ?self.peer,
            protocol = req.header("Upgrade").unwrap_or_default(),
            "handing connection to upgrade handler"
        );
        let read_ahead = self.parser.take_remaining();
        let res = std::mem::take(&mut self.res);
        let Connection {
            transport, shared, ..
        } = self;
        shared.handler.handle_upgrade(
            req,
            res,
            Upgraded {
                transport: Box::new(transport),
                read_ahead,
            },
        );
        Release::Upgraded
    }

    fn set_state(&mut self, state: ConnectionState) {
        trace!(peer = ?self.peer, from = ?self.state, to = ?state, "state");
        self.state = state;
    }

}

fn log_transport_error(peer: Option<SocketAddr>, op: &'static str, e: &TransportError) {
    match e {
        TransportError::Tls {
            lib, func, reason, ..
        } => {
            error!(?peer, op, lib, func, reason, error = %e, "tls error");
        }
        e if e.is_disconnect() => {
            debug!(?peer, op, error = %e, "peer disconnected");
        }
        e => error!(?peer, op, error = %e, "transport error"),
    }
}

/// Count of live connections, kept only with the `connection-diagnostics`
/// feature.
mod diagnostics {
    #[cfg(feature = "connection-diagnostics")]
    static OPEN: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    #[cfg(feature = "connection-diagnostics")]
    pub fn open_connections() -> usize {
        OPEN.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub struct Guard(());

    impl Guard {
        pub fn new() -> Self {
            #[cfg(feature = "connection-diagnostics")]
            {
                let total = OPEN.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                tracing::debug!(total, "connection open");
            }
            Guard(())
        }
    }

    impl Drop for Guard {
        fn drop(&mut self) {
            #[cfg(feature = "connection-diagnostics")]
            {
                let total = OPEN.fetch_sub(1, std::sync::atomic::Ordering::Relaxed) - 1;
                tracing::debug!(total, "connection closed");
            }
        }
    }
}

#[cfg(feature = "connection-diagnostics")]
pub use diagnostics::open_connections;
