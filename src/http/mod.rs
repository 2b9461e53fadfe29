//! HTTP/1.x connection engine.
//!
//! # Architecture
//!
//! - **`connection`**: the per-connection state machine driving one transport
//! - **`parser`**: incremental request parser fed from the transport
//! - **`request`** / **`response`** / **`headers`**: the values exchanged with handlers
//! - **`middleware`**: the before/after hook chain run around the handler
//! - **`handler`**: the dispatch target and the upgrade hand-off
//! - **`writer`**: frames a response into wire segments
//! - **`transport`**: plain and encrypted byte streams
//! - **`date`**: the shared cached `Date` header value
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌──────────────┐
//!        │ Handshaking  │ ← Transport handshake (TLS)
//!        └──────┬───────┘
//!               ▼
//!        ┌──────────────────┐
//!        │ AwaitingRequest  │ ← Read under the idle deadline
//!        └──────┬───────────┘
//!               │ Request parsed          ┌───────────┐
//!               ├── Upgrade requested ──→ │ Upgrading │ → handler owns socket
//!               ▼                         └───────────┘
//!        ┌──────────────────┐
//!        │   Dispatching    │ ← Middlewares + handler
//!        └──────┬───────────┘
//!               ▼
//!        ┌──────────────────┐
//!        │     Writing      │ ← Send response to client
//!        └──────┬───────────┘
//!               ├─ Keep-Alive → AwaitingRequest
//!               └─ Close → Closing → Destroyed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use conduit::http::connection::{Connection, ServerContext};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let shared = Arc::new(ServerContext::new(|_req: &_, res: &mut conduit::http::response::Response| {
//!         res.write("hello");
//!     }));
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!
//!     loop {
//!         let (socket, _addr) = listener.accept().await?;
//!         let shared = Arc::clone(&shared);
//!         tokio::spawn(Connection::new(socket, shared).run());
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod connection;
pub mod date;
pub mod handler;
pub mod headers;
pub mod middleware;
pub mod parser;
pub mod request;
pub mod response;
pub mod transport;
pub mod writer;

/// A boxed future for handler and transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
