//! HTTP/1.1 message model.
//!
//! # Data Flow
//! ```text
//! Caller builds Request
//!     → request.rs (validate shape, derive framing)
//!     → [pipeline writes head + body, length.rs counts body bytes]
//!
//! Response head parsed
//!     → headers.rs (keep-alive hint, trailers, content-length)
//!     → length.rs (running check of received bytes)
//!     → response.rs (head + streamed body handed to caller)
//! ```

pub mod headers;
pub mod length;
pub mod method;
pub mod request;
pub mod response;

pub use headers::{extract_meaningful_headers, HeaderError, MeaningfulHeaders};
pub use length::{mismatch, LengthCounter};
pub use method::Method;
pub use request::{Body, BodyStream, Framing, Request, RequestId};
pub use response::{PendingResponse, Response, ResponseBody};
