//! Incremental HTTP/1.x request parser.
//!
//! Bytes are pushed in with [`RequestParser::feed`] as they arrive from the
//! transport and [`RequestParser::advance`] reports progress. The parser keeps
//! any bytes past the end of a request, so a keep-alive connection can reuse
//! it for the next one.

use bytes::{Buf, Bytes, BytesMut};

use crate::http::headers::Headers;
use crate::http::request::{Method, Request, Version};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,
    #[error("unknown method")]
    InvalidMethod,
    #[error("unsupported protocol version")]
    InvalidVersion,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("malformed chunked body")]
    InvalidChunk,
    #[error("request exceeds {0} bytes")]
    TooLarge(usize),
}

/// What the parser could make of the bytes fed so far.
#[derive(Debug)]
pub enum Progress {
    /// More bytes are needed.
    NeedMore,
    /// The head of a request has been parsed; its body is still pending.
    /// Reported exactly once per request, before `Complete`.
    HeadersComplete,
    /// A full request is available.
    Complete(Request),
}

#[derive(Debug)]
struct Head {
    method: Method,
    url: String,
    version: Version,
    headers: Headers,
}

#[derive(Debug, Clone, Copy)]
enum Chunk {
    Size,
    Data(usize),
    DataEnd,
    Trailers,
}

#[derive(Debug)]
enum Framing {
    Length(usize),
    Chunked(Chunk),
}

#[derive(Debug)]
enum State {
    Head,
    Body {
        head: Head,
        framing: Framing,
        body: Vec<u8>,
    },
}

pub struct RequestParser {
    buf: BytesMut,
    state: State,
    max_bytes: usize,
    upgrade: bool,
    /// Prefix of `buf` already searched for the current line or head
    /// terminator.
    scanned: usize,
}

pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUEST_BYTES)
    }
}

impl RequestParser {
    /// Creates a parser rejecting heads or bodies larger than `max_bytes`.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            state: State::Head,
            max_bytes,
            upgrade: false,
            scanned: 0,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// True if the last request seen asked for a protocol upgrade
    /// (`Connection: upgrade` with an `Upgrade` header, or `CONNECT`).
    pub fn is_upgrade(&self) -> bool {
        self.upgrade
    }

    /// Version of the request currently being parsed, once its head is in.
    pub fn version(&self) -> Option<Version> {
        match &self.state {
            State::Body { head, .. } => Some(head.version),
            State::Head => None,
        }
    }

    /// Headers of the request currently being parsed, once its head is in.
    pub fn headers(&self) -> Option<&Headers> {
        match &self.state {
            State::Body { head, .. } => Some(&head.headers),
            State::Head => None,
        }
    }

    /// Bytes received but not yet consumed by any request.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Hands over the unconsumed bytes, e.g. to an upgraded protocol.
    pub fn take_remaining(&mut self) -> Bytes {
        self.scanned = 0;
        self.buf.split().freeze()
    }

    /// Finalises the parser; any partial request is discarded.
    pub fn done(&mut self) {
        self.buf.clear();
        self.scanned = 0;
        self.state = State::Head;
    }

    pub fn advance(&mut self) -> Result<Progress, ParseError> {
        loop {
            match &mut self.state {
                State::Head => {
                    let Some(end) = find_headers_end(&self.buf, self.scanned) else {
                        if self.buf.len() > self.max_bytes {
                            return Err(ParseError::TooLarge(self.max_bytes));
                        }
                        self.scanned = self.buf.len();
                        return Ok(Progress::NeedMore);
                    };
                    self.scanned = 0;
                    let head = parse_head(&self.buf[..end])?;
                    self.buf.advance(end + 4);

                    self.upgrade = head.method == Method::CONNECT
                        || (head.headers.contains("Upgrade")
                            && head.headers.has_token("Connection", "upgrade"));
                    let framing = self.framing(&head.headers)?;
                    self.state = State::Body {
                        head,
                        framing,
                        body: Vec::new(),
                    };
                    return Ok(Progress::HeadersComplete);
                }
                State::Body { framing, body, .. } => {
                    let finished = match framing {
                        Framing::Length(n) => {
                            if self.buf.len() < *n {
                                return Ok(Progress::NeedMore);
                            }
                            body.extend_from_slice(&self.buf.split_to(*n));
                            true
                        }
                        Framing::Chunked(chunk) => {
                            match step_chunked(
                                &mut self.buf,
                                &mut self.scanned,
                                chunk,
                                body,
                                self.max_bytes,
                            )? {
                                Some(finished) => finished,
                                None => return Ok(Progress::NeedMore),
                            }
                        }
                    };
                    if finished {
                        let State::Body { head, body, .. } =
                            std::mem::replace(&mut self.state, State::Head)
                        else {
                            unreachable!("state matched as Body above");
                        };
                        return Ok(Progress::Complete(Request {
                            method: head.method,
                            url: head.url,
                            version: head.version,
                            headers: head.headers,
                            body,
                        }));
                    }
                }
            }
        }
    }

    fn framing(&self, headers: &Headers) -> Result<Framing, ParseError> {
        if headers.has_token("Transfer-Encoding", "chunked") {
            return Ok(Framing::Chunked(Chunk::Size));
        }
        let len = match headers.get("Content-Length") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength)?,
            None => 0,
        };
        if len > self.max_bytes {
            return Err(ParseError::TooLarge(self.max_bytes));
        }
        Ok(Framing::Length(len))
    }
}

/// Runs the chunked-body state machine as far as the buffer allows.
///
/// Returns `Some(true)` once the terminating chunk and trailers are consumed,
/// `Some(false)` after a step that made progress, `None` when starved.
fn step_chunked(
    buf: &mut BytesMut,
    scanned: &mut usize,
    chunk: &mut Chunk,
    body: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<Option<bool>, ParseError> {
    match *chunk {
        Chunk::Size => {
            let Some(line) = take_line(buf, scanned, max_bytes)? else {
                return Ok(None);
            };
            let size = line.split(|&b| b == b';').next().unwrap_or_default();
            let size = std::str::from_utf8(size)
                .ok()
                .and_then(|s| usize::from_str_radix(s.trim(), 16).ok())
                .ok_or(ParseError::InvalidChunk)?;
            if body.len().saturating_add(size) > max_bytes {
                return Err(ParseError::TooLarge(max_bytes));
            }
            *chunk = if size == 0 { Chunk::Trailers } else { Chunk::Data(size) };
        }
        Chunk::Data(n) => {
            if buf.len() < n {
                return Ok(None);
            }
            body.extend_from_slice(&buf.split_to(n));
            *chunk = Chunk::DataEnd;
        }
        Chunk::DataEnd => {
            if buf.len() < 2 {
                return Ok(None);
            }
            if &buf[..2] != b"\r\n" {
                return Err(ParseError::InvalidChunk);
            }
            buf.advance(2);
            *chunk = Chunk::Size;
        }
        Chunk::Trailers => {
            let Some(line) = take_line(buf, scanned, max_bytes)? else {
                return Ok(None);
            };
            if line.is_empty() {
                return Ok(Some(true));
            }
        }
    }
    Ok(Some(false))
}

/// Splits off the next CRLF-terminated line. The search resumes where the
/// previous starved call stopped.
fn take_line(
    buf: &mut BytesMut,
    scanned: &mut usize,
    max_bytes: usize,
) -> Result<Option<Bytes>, ParseError> {
    let from = scanned.saturating_sub(1);
    match buf[from..].windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            *scanned = 0;
            let line = buf.split_to(from + pos).freeze();
            buf.advance(2);
            Ok(Some(line))
        }
        None if buf.len() > max_bytes => Err(ParseError::TooLarge(max_bytes)),
        None => {
            *scanned = buf.len();
            Ok(None)
        }
    }
}

fn parse_head(bytes: &[u8]) -> Result<Head, ParseError> {
    let head = std::str::from_utf8(bytes).map_err(|_| ParseError::InvalidRequest)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split(' ');
    let method = parts.next().ok_or(ParseError::InvalidRequest)?;
    let url = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if url.is_empty() || parts.next().is_some() {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::parse(method).ok_or(ParseError::InvalidMethod)?;
    let version = Version::parse(version).ok_or(ParseError::InvalidVersion)?;

    let mut headers = Headers::new();
    for line in lines {
        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        if key.is_empty() || key.ends_with([' ', '\t']) {
            return Err(ParseError::InvalidHeader);
        }
        headers.append(key, value.trim());
    }

    Ok(Head {
        method,
        url: url.to_string(),
        version,
        headers,
    })
}

/// Finds the blank line ending the head, skipping the `scanned` prefix
/// searched by earlier calls (less the three bytes a split terminator may
/// straddle).
fn find_headers_end(buf: &[u8], scanned: usize) -> Option<usize> {
    let from = scanned.saturating_sub(3);
    buf[from..]
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| from + pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(parser: &mut RequestParser) -> Request {
        loop {
            match parser.advance().unwrap() {
                Progress::Complete(req) => return req,
                Progress::HeadersComplete => continue,
                Progress::NeedMore => panic!("request not complete"),
            }
        }
    }

    #[test]
    fn parse_simple_get() {
        let mut parser = RequestParser::default();
        parser.feed(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");

        let req = complete(&mut parser);
        assert_eq!(req.url, "/");
        assert_eq!(req.header("host"), Some("example.com"));
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn headers_complete_precedes_body() {
        let mut parser = RequestParser::default();
        parser.feed(b"POST /x HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\n\r\n");

        assert!(matches!(parser.advance(), Ok(Progress::HeadersComplete)));
        assert_eq!(parser.version(), Some(Version::Http11));
        assert!(matches!(parser.advance(), Ok(Progress::NeedMore)));

        parser.feed(b"abc");
        let req = complete(&mut parser);
        assert_eq!(req.body, b"abc");
    }

    #[test]
    fn chunk_split_across_feeds() {
        let mut parser = RequestParser::default();
        parser.feed(b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWi");
        assert!(matches!(parser.advance(), Ok(Progress::HeadersComplete)));
        assert!(matches!(parser.advance(), Ok(Progress::NeedMore)));

        parser.feed(b"ki\r\n0\r\n\r\n");
        let req = complete(&mut parser);
        assert_eq!(req.body, b"Wiki");
    }

    #[test]
    fn done_discards_partial_request() {
        let mut parser = RequestParser::default();
        parser.feed(b"GET / HTTP/1.1\r\nHo");
        parser.done();
        assert_eq!(parser.buffered(), 0);
        assert!(parser.version().is_none());
    }
}
