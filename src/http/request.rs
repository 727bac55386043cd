//! Request model and submit-time validation.
//!
//! # Responsibilities
//! - Describe a request as data: method, path, ordered headers, body
//! - Generate a unique request ID for tracing
//! - Validate the request shape before it is allowed near a socket
//! - Derive framing (content-length vs chunked) and scheduling hints
//!
//! # Design Decisions
//! - Known-length bodies are checked against a declared `content-length`
//!   here, so such mismatches never touch the network
//! - Streamed bodies can only be checked while they are written; see
//!   `pipeline::writer`

use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use uuid::Uuid;

use crate::error::ClientError;
use crate::http::headers::parse_content_length;
use crate::http::method::Method;
use crate::net::origin::Origin;

/// Unique identifier attached to every submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0.simple())
    }
}

/// A lazily produced request body.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// Request body.
#[derive(Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// Body from a fixed buffer.
    Fixed(Bytes),
    /// Body produced chunk by chunk.
    Stream(BodyStream),
}

impl Body {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Body::Stream(Box::pin(stream))
    }

    /// Length when known up front.
    pub fn known_len(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Fixed(b) => Some(b.len() as u64),
            Body::Stream(_) => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Fixed(b) => f.debug_tuple("Fixed").field(&b.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Fixed(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Fixed(Bytes::from(v))
    }
}

impl From<&'static [u8]> for Body {
    fn from(s: &'static [u8]) -> Self {
        Body::Fixed(Bytes::from_static(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Fixed(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Fixed(Bytes::from(s))
    }
}

/// An HTTP/1.1 request described as data.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Body,
    pub(crate) origin: Option<Origin>,
    pub(crate) idempotent: Option<bool>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: Body::Empty,
            origin: None,
            idempotent: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::Head, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    /// Add a header. Duplicates are kept in insertion order.
    pub fn header(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.headers.push((name.into(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Send to this origin instead of the client's default one.
    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Override the method's idempotency for pipelining and retry decisions.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// How the body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body bytes follow the head.
    None,
    /// Exactly this many bytes follow the head.
    Length(u64),
    /// Chunked transfer-encoding.
    Chunked,
}

/// A request that passed validation, with its derived framing.
#[derive(Debug)]
pub struct ValidatedRequest {
    pub id: RequestId,
    pub request: Request,
    /// Length from an explicit `content-length` header, if any.
    pub declared: Option<u64>,
    pub framing: Framing,
    /// Caller asked for `connection: close`.
    pub reset: bool,
    pub idempotent: bool,
    streamed: bool,
}

impl ValidatedRequest {
    /// Requests that must not share the wire with other in-flight requests.
    pub fn is_exclusive(&self) -> bool {
        !self.idempotent || self.reset || self.streamed
    }
}

/// Header names the caller may not set.
const RESERVED_HEADERS: &[&str] = &["host", "transfer-encoding", "upgrade", "keep-alive", "expect"];

/// Validate a request before dispatch. Nothing here touches the network.
pub fn validate(request: Request) -> Result<ValidatedRequest, ClientError> {
    validate_path(&request.path)?;

    let mut declared: Option<u64> = None;
    let mut reset = false;

    for (name, value) in &request.headers {
        validate_header(name, value)?;
        let lower = name.to_ascii_lowercase();

        if RESERVED_HEADERS.contains(&lower.as_str()) {
            return Err(ClientError::InvalidRequest(format!("{lower} header is not allowed")));
        }

        match lower.as_str() {
            "content-length" => {
                let parsed = parse_content_length(value.as_bytes()).ok_or_else(|| {
                    ClientError::InvalidRequest(format!("invalid content-length header: {value:?}"))
                })?;
                match declared {
                    Some(prev) if prev != parsed => {
                        return Err(ClientError::InvalidRequest(format!(
                            "conflicting content-length headers: {prev} and {parsed}"
                        )));
                    }
                    _ => declared = Some(parsed),
                }
            }
            "connection" => {
                let v = value.trim().to_ascii_lowercase();
                match v.as_str() {
                    "close" => reset = true,
                    "keep-alive" => {}
                    _ => {
                        return Err(ClientError::InvalidRequest(format!(
                            "invalid connection header: {value:?}"
                        )));
                    }
                }
            }
            _ => {}
        }
    }

    let method = request.method;
    let known = request.body.known_len();

    if method == Method::Head {
        let body_len = known.unwrap_or(0);
        if declared.unwrap_or(0) != 0 || body_len != 0 || request.body.is_stream() {
            return Err(ClientError::RequestBodyLengthMismatch { declared, actual: body_len });
        }
    }

    if let (Some(declared_len), Some(actual)) = (declared, known) {
        if declared_len != actual {
            return Err(ClientError::RequestBodyLengthMismatch { declared, actual });
        }
    }

    if request.body.is_stream() && declared.is_none() && !method.expects_payload() {
        return Err(ClientError::RequestBodyLengthMismatch { declared: None, actual: 0 });
    }

    let framing = match (&request.body, declared) {
        (Body::Stream(_), Some(len)) => Framing::Length(len),
        (Body::Stream(_), None) => Framing::Chunked,
        (Body::Fixed(b), _) if !b.is_empty() => Framing::Length(b.len() as u64),
        _ => Framing::None,
    };

    let idempotent = request.idempotent.unwrap_or_else(|| method.is_idempotent());
    let streamed = request.body.is_stream();

    Ok(ValidatedRequest {
        id: RequestId::new(),
        request,
        declared,
        framing,
        reset,
        idempotent,
        streamed,
    })
}

fn validate_path(path: &str) -> Result<(), ClientError> {
    if path.is_empty() {
        return Err(ClientError::InvalidRequest("path must not be empty".into()));
    }
    if !(path.starts_with('/') || path == "*") {
        return Err(ClientError::InvalidRequest(format!("path must be absolute: {path:?}")));
    }
    if path.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(ClientError::InvalidRequest(format!("invalid characters in path: {path:?}")));
    }
    Ok(())
}

fn validate_header(name: &str, value: &str) -> Result<(), ClientError> {
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return Err(ClientError::InvalidRequest(format!("invalid header name: {name:?}")));
    }
    if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
        return Err(ClientError::InvalidRequest(format!("invalid value for header {name}")));
    }
    Ok(())
}

/// RFC 9110 `tchar`.
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
