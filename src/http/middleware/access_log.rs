//! Access log middleware.
//! Logs one line per request with its status and handling time.

use std::time::Instant;

use tracing::info;

use crate::http::middleware::{Middleware, PriorContexts};
use crate::http::request::Request;
use crate::http::response::Response;

#[derive(Debug, Default)]
pub struct AccessLogContext {
    started: Option<Instant>,
    /// Requests logged on this connection so far.
    pub requests: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AccessLog;

impl Middleware for AccessLog {
    type Context = AccessLogContext;

    fn before_handle(
        &self,
        _req: &mut Request,
        _res: &mut Response,
        ctx: &mut AccessLogContext,
        _prior: &PriorContexts<'_>,
    ) {
        ctx.started = Some(Instant::now());
    }

    fn after_handle(
        &self,
        req: &Request,
        res: &mut Response,
        ctx: &mut AccessLogContext,
        _prior: &PriorContexts<'_>,
    ) {
        ctx.requests += 1;
        let elapsed_us = ctx
            .started
            .take()
            .map(|t| t.elapsed().as_micros())
            .unwrap_or_default();
        info!(
            method = %req.method,
            url = %req.url,
            status = res.code,
            elapsed_us,
            request_no = ctx.requests,
            "access"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::MiddlewareChain;
    use crate::http::request::{Method, RequestBuilder};

    #[test]
    fn counts_requests_per_connection() {
        let chain = MiddlewareChain::new().with(AccessLog);
        let mut ctx = chain.new_contexts();

        for _ in 0..2 {
            let mut req = RequestBuilder::new().method(Method::GET).url("/").build().unwrap();
            let mut res = Response::default();
            chain.before(&mut req, &mut res, &mut ctx);
            chain.after(&req, &mut res, &mut ctx);
        }

        assert_eq!(ctx.get::<AccessLogContext>().map(|c| c.requests), Some(2));
    }
}
