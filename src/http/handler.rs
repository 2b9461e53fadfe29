use bytes::Bytes;

use crate::http::BoxFuture;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::transport::Transport;

/// A connection handed over to another protocol.
pub struct Upgraded {
    pub transport: Box<dyn Transport>,
    /// Bytes already read from the peer past the end of the upgrade request.
    pub read_ahead: Bytes,
}

/// The dispatch target invoked once the middleware before-handlers let a
/// request through.
pub trait Handler: Send + Sync + 'static {
    /// Fills in `res` for `req`.
    ///
    /// The response is complete when the returned future resolves; the
    /// connection writes nothing before that. A handler that finishes
    /// synchronously returns an already-ready future.
    fn handle<'a>(&'a self, req: &'a Request, res: &'a mut Response) -> BoxFuture<'a, ()>;

    /// Takes over a connection whose client asked for a protocol upgrade.
    ///
    /// The connection engine generates no response for such a request. The
    /// default implementation refuses the upgrade by dropping the transport.
    fn handle_upgrade(&self, req: Request, _res: Response, upgraded: Upgraded) {
        tracing::debug!(
            url = %req.url,
            upgrade = req.header("Upgrade").unwrap_or_default(),
            "upgrade not supported, dropping connection"
        );
        drop(upgraded);
    }
}

impl<F> Handler for F
where
    F: Fn(&Request, &mut Response) + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, req: &'a Request, res: &'a mut Response) -> BoxFuture<'a, ()> {
        self(req, res);
        Box::pin(std::future::ready(()))
    }
}
