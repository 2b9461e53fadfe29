use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::response::{Response, StatusCode};

/// Interim response sent to clients that asked for `Expect: 100-continue`.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

const CRLF: &[u8] = b"\r\n";

/// Framing options that come from the connection rather than the response.
pub struct Framing<'a> {
    pub server_name: &'a str,
    pub date: &'a str,
    pub keep_alive: bool,
}

/// A framed response, held as the four segments that go on the wire:
/// status line, header block, blank line, body.
#[derive(Debug)]
pub struct ResponseWriter {
    status: Bytes,
    headers: Bytes,
    body: Bytes,
}

impl ResponseWriter {
    /// Frames `res`, filling in the generated headers.
    ///
    /// Unknown status codes become 500. An empty body is replaced by the
    /// serialized JSON payload if there is one, and error statuses that
    /// still have no body get the canned `"<code> <reason>"` text.
    pub fn new(res: &mut Response, framing: Framing<'_>) -> Self {
        let status = match StatusCode::from_u16(res.code) {
            Some(status) => status,
            None => {
                tracing::warn!(code = res.code, "unknown status code, sending 500");
                res.code = 500;
                res.body.clear();
                res.json = None;
                StatusCode::InternalServerError
            }
        };

        if res.body.is_empty() {
            if let Some(json) = res.json.take() {
                res.body = json.to_string().into_bytes();
            }
        }

        if status.as_u16() >= 400 && res.body.is_empty() {
            res.body = status.canned_body().into_bytes();
        }

        let content_length = res.body.len().to_string();
        res.set_header("Content-Length", content_length);
        res.set_header("Server", framing.server_name);
        res.set_header("Date", framing.date);
        if framing.keep_alive {
            res.set_header("Connection", "Keep-Alive");
        }

        let mut headers = BytesMut::with_capacity(256);
        res.headers.write_block(&mut headers);

        Self {
            status: Bytes::from_static(status.status_line().as_bytes()),
            headers: headers.freeze(),
            body: Bytes::from(std::mem::take(&mut res.body)),
        }
    }

    pub fn len(&self) -> usize {
        self.status.len() + self.headers.len() + CRLF.len() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole response as one contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        buf.extend_from_slice(&self.status);
        buf.extend_from_slice(&self.headers);
        buf.extend_from_slice(CRLF);
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }

    /// Writes all segments, in order, with a single logical write.
    pub async fn write_to_stream<W>(&self, stream: &mut W) -> std::io::Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let mut segments = self
            .status
            .clone()
            .chain(self.headers.clone())
            .chain(Bytes::from_static(CRLF))
            .chain(self.body.clone());
        let len = segments.remaining();
        stream.write_all_buf(&mut segments).await?;
        stream.flush().await?;
        Ok(len)
    }
}
