//! Byte-level response tokenizer.
//!
//! # Data Flow
//! ```text
//! Socket bytes
//!     → ResponseTokenizer::feed (buffers, frames messages)
//!     → ParserSink callbacks:
//!         on_status → on_header* → on_headers_complete
//!         → on_body* → on_trailer* → on_message_complete
//! ```
//!
//! # Design Decisions
//! - The connection drives the tokenizer and observes it only through the
//!   sink; the tokenizer knows nothing about requests or pipelining
//! - Sinks may abort at any callback; the tokenizer then stops and reports
//!   [`ParseError::Aborted`], the sink knows the reason
//! - `on_headers_complete` lets the sink veto a body (responses to HEAD)

pub mod tokenizer;

use thiserror::Error;

pub use tokenizer::H1Tokenizer;

/// Returned by sink callbacks to stop the tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort;

/// Sink decision after the header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyHint {
    /// Frame the body from the headers.
    Expected,
    /// The message has no body regardless of its headers.
    Skip,
}

/// Callbacks fired while tokenizing a response stream.
pub trait ParserSink {
    fn on_status(&mut self, minor_version: u8, status: u16, reason: &[u8]) -> Result<(), Abort>;
    fn on_header(&mut self, name: &[u8], value: &[u8]) -> Result<(), Abort>;
    fn on_headers_complete(&mut self) -> Result<BodyHint, Abort>;
    fn on_body(&mut self, chunk: &[u8]) -> Result<(), Abort>;
    fn on_trailer(&mut self, name: &[u8], value: &[u8]) -> Result<(), Abort>;
    fn on_message_complete(&mut self) -> Result<(), Abort>;
}

/// Tokenizer failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid response head: {0}")]
    InvalidHead(String),

    #[error("response head larger than {0} bytes")]
    HeadTooLarge(usize),

    #[error("invalid chunked encoding: {0}")]
    InvalidChunk(&'static str),

    #[error("unsupported response: {0}")]
    Unsupported(&'static str),

    #[error("stream ended in the middle of a message")]
    Incomplete,

    #[error("parsing aborted by the consumer")]
    Aborted,
}

/// Incremental HTTP/1.1 response tokenizer.
pub trait ResponseTokenizer: Send {
    /// Consume `data`, firing sink callbacks for every complete token.
    /// Partial tokens are buffered until the next call.
    fn feed(&mut self, data: &[u8], sink: &mut dyn ParserSink) -> Result<(), ParseError>;

    /// Signal end of stream. Completes close-delimited bodies; anything else
    /// left mid-message is [`ParseError::Incomplete`].
    fn finish(&mut self, sink: &mut dyn ParserSink) -> Result<(), ParseError>;

    /// True between messages with nothing buffered.
    fn is_idle(&self) -> bool;

    /// Bytes held back waiting for the rest of a token.
    fn buffered(&self) -> usize;

    /// Drop buffered bytes and return to the start of a message.
    fn reset(&mut self);
}
