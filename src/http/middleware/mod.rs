//! Middleware chain.
//!
//! Middlewares run around the handler: every before-handler in declaration
//! order, then the handler, then every after-handler in reverse order. A
//! before-handler that calls [`Response::end`] short-circuits the chain. The
//! middlewares that come after it and the handler are skipped, and only the
//! after-handlers of middlewares whose before-handler already ran are called,
//! innermost first.
//!
//! ```text
//!   before[0] → before[1] → … → before[N-1] → handler
//!                                               │
//!   after[0]  ← after[1]  ← … ← after[N-1]  ←───┘
//! ```
//!
//! Each middleware owns one context slot per connection. Its hooks get that
//! slot mutably, plus a read-only [`PriorContexts`] view of the slots of the
//! middlewares declared before it.

use std::any::Any;

use crate::http::request::Request;
use crate::http::response::Response;

pub mod access_log;

pub use access_log::AccessLog;

type Slot = Box<dyn Any + Send>;

/// A stateless hook pair run around the handler.
///
/// Both hooks default to doing nothing, so a middleware implements only the
/// side it needs.
pub trait Middleware: Send + Sync + 'static {
    /// Per-connection state, created fresh for every accepted connection.
    type Context: Default + Send + 'static;

    fn before_handle(
        &self,
        _req: &mut Request,
        _res: &mut Response,
        _ctx: &mut Self::Context,
        _prior: &PriorContexts<'_>,
    ) {
    }

    fn after_handle(
        &self,
        _req: &Request,
        _res: &mut Response,
        _ctx: &mut Self::Context,
        _prior: &PriorContexts<'_>,
    ) {
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

trait ErasedMiddleware: Send + Sync {
    fn new_context(&self) -> Slot;
    fn before(&self, req: &mut Request, res: &mut Response, ctx: &mut Slot, prior: &PriorContexts<'_>);
    fn after(&self, req: &Request, res: &mut Response, ctx: &mut Slot, prior: &PriorContexts<'_>);
    fn name(&self) -> &'static str;
}

impl<M: Middleware> ErasedMiddleware for M {
    fn new_context(&self) -> Slot {
        Box::new(M::Context::default())
    }

    fn before(&self, req: &mut Request, res: &mut Response, ctx: &mut Slot, prior: &PriorContexts<'_>) {
        if let Some(ctx) = ctx.downcast_mut::<M::Context>() {
            self.before_handle(req, res, ctx, prior);
        }
    }

    fn after(&self, req: &Request, res: &mut Response, ctx: &mut Slot, prior: &PriorContexts<'_>) {
        if let Some(ctx) = ctx.downcast_mut::<M::Context>() {
            self.after_handle(req, res, ctx, prior);
        }
    }

    fn name(&self) -> &'static str {
        Middleware::name(self)
    }
}

/// Read-only view of the contexts of middlewares declared earlier.
pub struct PriorContexts<'a> {
    slots: &'a [Slot],
}

impl PriorContexts<'_> {
    /// Returns the first earlier context of type `C`.
    pub fn get<C: 'static>(&self) -> Option<&C> {
        self.slots.iter().find_map(|slot| slot.downcast_ref::<C>())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// All middleware contexts of one connection, one slot per middleware.
pub struct ContextSet {
    slots: Vec<Slot>,
}

impl ContextSet {
    pub fn get<C: 'static>(&self) -> Option<&C> {
        self.slots.iter().find_map(|slot| slot.downcast_ref::<C>())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Outcome of the before-handler sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Every before-handler ran; the handler must be invoked next and
    /// [`MiddlewareChain::after`] called once it completes.
    Continue,
    /// The before-handler at this index completed the response. The matching
    /// after-handlers have already run.
    ShortCircuited(usize),
}

/// The ordered, immutable middleware list shared by every connection.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Box<dyn ErasedMiddleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware; it runs after every one added before it.
    pub fn with<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Box::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.middlewares.iter().map(|mw| mw.name())
    }

    pub fn new_contexts(&self) -> ContextSet {
        ContextSet {
            slots: self.middlewares.iter().map(|mw| mw.new_context()).collect(),
        }
    }

    /// Runs the before-handlers in declaration order.
    pub fn before(&self, req: &mut Request, res: &mut Response, ctx: &mut ContextSet) -> Dispatch {
        for (i, mw) in self.middlewares.iter().enumerate() {
            let (prior, rest) = ctx.slots.split_at_mut(i);
            mw.before(req, res, &mut rest[0], &PriorContexts { slots: prior });

            if res.is_completed() {
                tracing::debug!(middleware = mw.name(), index = i, "request completed by middleware");
                self.after_from(i, req, res, ctx);
                return Dispatch::ShortCircuited(i);
            }
        }
        Dispatch::Continue
    }

    /// Runs every after-handler, last middleware first.
    pub fn after(&self, req: &Request, res: &mut Response, ctx: &mut ContextSet) {
        if let Some(last) = self.middlewares.len().checked_sub(1) {
            self.after_from(last, req, res, ctx);
        }
    }

    fn after_from(&self, last: usize, req: &Request, res: &mut Response, ctx: &mut ContextSet) {
        for i in (0..=last).rev() {
            let (prior, rest) = ctx.slots.split_at_mut(i);
            self.middlewares[i].after(req, res, &mut rest[0], &PriorContexts { slots: prior });
        }
    }
}
