//! Request serialization.
//!
//! # Responsibilities
//! - Encode the request head
//! - Frame body bytes (identity or chunked)
//! - Run the length check on every streamed chunk and at end of stream
//!
//! Fixed bodies are written together with the head. Streamed bodies are
//! pulled chunk by chunk by the connection task, only once everything
//! before them has been flushed.

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ClientError;
use crate::http::length::LengthCounter;
use crate::http::request::{Body, BodyStream, Framing, ValidatedRequest};
use crate::net::origin::Origin;

/// Append the request head to `out`.
pub fn encode_head(req: &ValidatedRequest, origin: &Origin, out: &mut BytesMut) {
    let request = &req.request;
    let mut head = String::with_capacity(256);

    // writing into a String cannot fail
    let _ = write!(head, "{} {} HTTP/1.1\r\nhost: {}\r\n", request.method, request.path, origin.authority());

    let mut has_connection = false;
    for (name, value) in &request.headers {
        has_connection |= name.eq_ignore_ascii_case("connection");
        let _ = write!(head, "{name}: {value}\r\n");
    }

    if req.declared.is_none() {
        match req.framing {
            Framing::Length(len) => {
                let _ = write!(head, "content-length: {len}\r\n");
            }
            Framing::None if request.method.expects_payload() => {
                head.push_str("content-length: 0\r\n");
            }
            _ => {}
        }
    }
    if req.framing == Framing::Chunked {
        head.push_str("transfer-encoding: chunked\r\n");
    }
    if !has_connection {
        head.push_str("connection: keep-alive\r\n");
    }
    head.push_str("\r\n");

    out.put_slice(head.as_bytes());
}

/// Write progress of one request.
pub struct RequestWriter {
    stream: Option<BodyStream>,
    counter: LengthCounter,
    chunked: bool,
    pulled: bool,
    finished: bool,
}

impl RequestWriter {
    /// Encode the head (and a fixed body) into `out` and take ownership of a
    /// streamed body.
    pub fn start(req: &mut ValidatedRequest, origin: &Origin, out: &mut BytesMut) -> Self {
        encode_head(req, origin, out);

        let chunked = req.framing == Framing::Chunked;
        let counter = LengthCounter::new(req.declared);

        if req.request.body.is_stream() {
            if let Body::Stream(stream) = std::mem::take(&mut req.request.body) {
                return Self {
                    stream: Some(stream),
                    counter,
                    chunked,
                    pulled: false,
                    finished: false,
                };
            }
        }
        if let Body::Fixed(bytes) = &req.request.body {
            out.put_slice(bytes);
        }
        Self::done(counter)
    }

    fn done(counter: LengthCounter) -> Self {
        Self {
            stream: None,
            counter,
            chunked: false,
            pulled: false,
            finished: true,
        }
    }

    /// Whether a body chunk should be pulled next.
    pub fn wants_body(&self) -> bool {
        !self.finished && self.stream.is_some()
    }

    pub fn stream_mut(&mut self) -> Option<&mut BodyStream> {
        if self.finished {
            return None;
        }
        self.stream.as_mut()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Frame one chunk into `out`. Fails the moment the running total passes
    /// the declared length.
    pub fn on_chunk(&mut self, chunk: Bytes, out: &mut BytesMut) -> Result<(), ClientError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.pulled = true;
        if !self.counter.add(chunk.len()) {
            self.abort();
            return Err(self.mismatch());
        }

        if self.chunked {
            let mut size_line = String::with_capacity(12);
            let _ = write!(size_line, "{:X}\r\n", chunk.len());
            out.put_slice(size_line.as_bytes());
            out.put_slice(&chunk);
            out.put_slice(b"\r\n");
        } else {
            out.put_slice(&chunk);
        }
        Ok(())
    }

    /// The body stream ended. Fails when fewer bytes than declared were produced.
    pub fn on_end(&mut self, out: &mut BytesMut) -> Result<(), ClientError> {
        self.finished = true;
        self.stream = None;
        if !self.counter.finish() {
            return Err(self.mismatch());
        }
        if self.chunked {
            out.put_slice(b"0\r\n\r\n");
        }
        Ok(())
    }

    /// Stop writing; the remaining body is discarded.
    pub fn abort(&mut self) {
        self.finished = true;
        self.stream = None;
    }

    /// Hand back a streamed body nothing was pulled from yet.
    pub fn take_untouched(&mut self) -> Option<BodyStream> {
        if self.pulled {
            return None;
        }
        self.stream.take()
    }

    fn mismatch(&self) -> ClientError {
        ClientError::RequestBodyLengthMismatch {
            declared: self.counter.declared(),
            actual: self.counter.seen(),
        }
    }
}
