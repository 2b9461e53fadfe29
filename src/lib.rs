//! Conduit - HTTP/1.x connection engine
//!
//! Drives accepted sockets through request parsing, middleware dispatch,
//! response framing and keep-alive handling for an embedded management
//! web server.

pub mod config;
pub mod http;
pub mod server;
