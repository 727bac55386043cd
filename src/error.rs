//! Error taxonomy surfaced to callers.
//!
//! Every variant carries a stable string code (see [`ClientError::code`]) so
//! callers can match on failures across versions without depending on the
//! display text. Errors are `Clone` because one failure is usually delivered
//! to several places at once: the affected request, the `disconnect`
//! notification and any response stream that was in flight.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors produced by the dispatch core.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The declared request `content-length` disagrees with the bytes the
    /// body actually produced, or a body was supplied where none is allowed.
    #[error("request body length mismatch: declared {declared:?}, body produced {actual} bytes")]
    RequestBodyLengthMismatch { declared: Option<u64>, actual: u64 },

    /// The declared response `content-length` disagrees with the bytes the
    /// peer actually delivered.
    #[error("response body length mismatch: declared {declared}, received {received} bytes")]
    ResponseBodyLengthMismatch { declared: u64, received: u64 },

    /// Socket-level failure: refused, reset, closed by the peer mid-exchange.
    #[error("socket error: {0}")]
    Socket(Arc<io::Error>),

    /// The connector did not produce a stream in time.
    #[error("connect timeout after {0} ms")]
    ConnectTimeout(u64),

    /// The request shape was rejected before any network activity.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response bytes could not be tokenized.
    #[error("http parse error: {0}")]
    Parse(String),

    /// Trailers announced by a `Trailer` header never arrived.
    #[error("trailers announced but missing: {0}")]
    TrailerMismatch(String),

    /// The caller's streamed request body yielded an error.
    #[error("request body stream failed: {0}")]
    RequestBody(Arc<io::Error>),

    /// The client no longer accepts requests.
    #[error("client is closed")]
    ClientClosed,

    /// The client was destroyed while the request was queued or in flight.
    #[error("client was destroyed")]
    ClientDestroyed,
}

impl ClientError {
    /// Stable identifier for this error category.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::RequestBodyLengthMismatch { .. } => "ERR_REQUEST_CONTENT_LENGTH_MISMATCH",
            ClientError::ResponseBodyLengthMismatch { .. } => "ERR_RESPONSE_CONTENT_LENGTH_MISMATCH",
            ClientError::Socket(_) => "ERR_SOCKET",
            ClientError::ConnectTimeout(_) => "ERR_CONNECT_TIMEOUT",
            ClientError::InvalidRequest(_) => "ERR_INVALID_ARGUMENT",
            ClientError::Parse(_) => "ERR_HTTP_PARSER",
            ClientError::TrailerMismatch(_) => "ERR_TRAILER_MISMATCH",
            ClientError::RequestBody(_) => "ERR_REQUEST_BODY",
            ClientError::ClientClosed => "ERR_CLIENT_CLOSED",
            ClientError::ClientDestroyed => "ERR_CLIENT_DESTROYED",
        }
    }

    /// Build a socket error for a peer that hung up mid-exchange.
    pub(crate) fn other_side_closed() -> Self {
        ClientError::Socket(Arc::new(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "other side closed",
        )))
    }

    pub(crate) fn socket(err: io::Error) -> Self {
        ClientError::Socket(Arc::new(err))
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::socket(err)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ClientError> = std::result::Result<T, E>;
