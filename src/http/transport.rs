//! Byte-stream transports a connection can run over.
//!
//! Plain TCP and in-memory duplex pipes are provided here. Encrypted
//! transports plug in by implementing [`Transport`]: they perform their
//! handshake in [`Transport::handshake`] and report encryption failures
//! through [`Transport::classify`] as [`TransportError::Tls`].

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

use crate::http::BoxFuture;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("tls error (lib {lib}, func {func}, reason {reason}): {detail}")]
    Tls {
        lib: u32,
        func: u32,
        reason: u32,
        detail: String,
    },
}

impl TransportError {
    /// Builds a TLS error from a packed library error code.
    ///
    /// The code packs the library in bits 24..32, the function in bits
    /// 12..24 and the reason in the low 12 bits.
    pub fn tls(code: u64, detail: impl Into<String>) -> Self {
        TransportError::Tls {
            lib: ((code >> 24) & 0xff) as u32,
            func: ((code >> 12) & 0xfff) as u32,
            reason: (code & 0xfff) as u32,
            detail: detail.into(),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, TransportError::Tls { .. })
    }

    /// True for the ordinary ways a peer goes away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// A plain or encrypted byte stream owned by one connection.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Runs the transport's handshake. Plain sockets have none.
    fn handshake(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async { Ok(()) })
    }

    fn remote_endpoint(&self) -> Option<SocketAddr> {
        None
    }

    /// Maps an I/O error surfaced by a read or write to the error taxonomy.
    fn classify(&self, err: io::Error) -> TransportError {
        TransportError::Io(err)
    }
}

impl Transport for TcpStream {
    fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.peer_addr().ok()
    }
}

impl Transport for DuplexStream {}

impl Transport for Box<dyn Transport> {
    fn handshake(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        (**self).handshake()
    }

    fn remote_endpoint(&self) -> Option<SocketAddr> {
        (**self).remote_endpoint()
    }

    fn classify(&self, err: io::Error) -> TransportError {
        (**self).classify(err)
    }
}
