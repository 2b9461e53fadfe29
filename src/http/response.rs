use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::http::headers::Headers;

/// Status codes the engine knows how to frame.
///
/// A handler may store any numeric code on a [`Response`]; codes outside this
/// table are written as `500 Internal Server Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Created,
    Accepted,
    NoContent,
    MultipleChoices,
    MovedPermanently,
    MovedTemporarily,
    NotModified,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
}

impl StatusCode {
    /// Looks up a numeric code in the known table.
    ///
    /// ```
    /// # use conduit::http::response::StatusCode;
    /// assert_eq!(StatusCode::from_u16(404), Some(StatusCode::NotFound));
    /// assert_eq!(StatusCode::from_u16(999), None);
    /// ```
    pub fn from_u16(code: u16) -> Option<Self> {
        let status = match code {
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            202 => StatusCode::Accepted,
            204 => StatusCode::NoContent,
            300 => StatusCode::MultipleChoices,
            301 => StatusCode::MovedPermanently,
            302 => StatusCode::MovedTemporarily,
            304 => StatusCode::NotModified,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            500 => StatusCode::InternalServerError,
            501 => StatusCode::NotImplemented,
            502 => StatusCode::BadGateway,
            503 => StatusCode::ServiceUnavailable,
            _ => return None,
        };
        Some(status)
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::Accepted => 202,
            StatusCode::NoContent => 204,
            StatusCode::MultipleChoices => 300,
            StatusCode::MovedPermanently => 301,
            StatusCode::MovedTemporarily => 302,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::BadGateway => 502,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::Accepted => "Accepted",
            StatusCode::NoContent => "No Content",
            StatusCode::MultipleChoices => "Multiple Choices",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::MovedTemporarily => "Moved Temporarily",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// The complete wire status line, CRLF included.
    pub fn status_line(&self) -> &'static str {
        match self {
            StatusCode::Ok => "HTTP/1.1 200 OK\r\n",
            StatusCode::Created => "HTTP/1.1 201 Created\r\n",
            StatusCode::Accepted => "HTTP/1.1 202 Accepted\r\n",
            StatusCode::NoContent => "HTTP/1.1 204 No Content\r\n",
            StatusCode::MultipleChoices => "HTTP/1.1 300 Multiple Choices\r\n",
            StatusCode::MovedPermanently => "HTTP/1.1 301 Moved Permanently\r\n",
            StatusCode::MovedTemporarily => "HTTP/1.1 302 Moved Temporarily\r\n",
            StatusCode::NotModified => "HTTP/1.1 304 Not Modified\r\n",
            StatusCode::BadRequest => "HTTP/1.1 400 Bad Request\r\n",
            StatusCode::Unauthorized => "HTTP/1.1 401 Unauthorized\r\n",
            StatusCode::Forbidden => "HTTP/1.1 403 Forbidden\r\n",
            StatusCode::NotFound => "HTTP/1.1 404 Not Found\r\n",
            StatusCode::InternalServerError => "HTTP/1.1 500 Internal Server Error\r\n",
            StatusCode::NotImplemented => "HTTP/1.1 501 Not Implemented\r\n",
            StatusCode::BadGateway => "HTTP/1.1 502 Bad Gateway\r\n",
            StatusCode::ServiceUnavailable => "HTTP/1.1 503 Service Unavailable\r\n",
        }
    }

    /// Body used for error responses that carry none: `"<code> <reason>"`.
    pub fn canned_body(&self) -> String {
        format!("{} {}", self.as_u16(), self.reason_phrase())
    }
}

/// Response being built for the current request.
///
/// Handlers and middlewares write into it; the connection frames it once the
/// request completes. `json` is serialized into the body only if the body is
/// still empty at that point.
#[derive(Debug)]
pub struct Response {
    /// Numeric status; need not be in the known table
    pub code: u16,
    /// Headers set by handlers and middlewares
    pub headers: Headers,
    /// Raw body bytes
    pub body: Vec<u8>,
    /// Structured payload, serialized when `body` is empty
    pub json: Option<serde_json::Value>,
    completed: bool,
    liveness: Liveness,
}

/// Whether the client of a request is still connected.
///
/// Cloned out of a [`Response`] by handlers that finish their work
/// elsewhere. The connection clears it once the client disconnects while
/// the request is being handled; it never becomes alive again.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Default for Liveness {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(200)
    }
}

impl Response {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            headers: Headers::new(),
            body: Vec::new(),
            json: None,
            completed: false,
            liveness: Liveness::default(),
        }
    }

    /// Creates a 200 OK response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let mut res = Self::new(200);
        res.body = body.into();
        res
    }

    pub fn with_json(code: u16, value: serde_json::Value) -> Self {
        let mut res = Self::new(code);
        res.json = Some(value);
        res
    }

    /// Appends a header, keeping any existing ones with the same name.
    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.append(key, value);
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.set(key, value);
    }

    pub fn write(&mut self, chunk: impl AsRef<[u8]>) {
        self.body.extend_from_slice(chunk.as_ref());
    }

    /// Marks the response as finished.
    ///
    /// Called from a middleware's before-handler this short-circuits the
    /// chain: later middlewares and the handler are skipped.
    pub fn end(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// True while the client that sent the request is still connected.
    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// A handle to [`Response::is_alive`] that outlives the borrow of the
    /// response.
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Resets the response for the next request on the connection.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
