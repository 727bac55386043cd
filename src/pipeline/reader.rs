//! Response side of a connection.
//!
//! # Responsibilities
//! - Receive tokenizer callbacks and match each response to the oldest
//!   in-flight request
//! - Classify headers (keep-alive hint, trailers, content-length)
//! - Run the length check on every body chunk and at message end
//! - Hand heads and body frames to the caller
//!
//! # Design Decisions
//! - A length violation stops delivery: the caller sees the error next,
//!   never the excess bytes
//! - Completed responses are collected and finalized by the connection after
//!   the tokenizer returns, so bytes trailing the last response in the same
//!   read can still turn its end into an error

use std::time::Duration;

use bytes::Bytes;

use crate::error::ClientError;
use crate::http::headers::{extract_meaningful_headers, parse_keep_alive_timeout, trailer_names};
use crate::http::length::LengthCounter;
use crate::http::response::{BodyFrame, BodySender, Response, ResponseBody};
use crate::observability::metrics;
use crate::parser::{Abort, BodyHint, ParserSink};
use crate::pipeline::scheduler::Scheduler;
use crate::pipeline::Slot;

/// The response currently being parsed.
#[derive(Debug)]
struct InProgress {
    status: u16,
    reason: String,
    minor_version: u8,
    headers: Vec<(String, String)>,
    counter: LengthCounter,
    length_framed: bool,
    expected_trailers: Vec<String>,
    trailers: Vec<(String, String)>,
    body_tx: Option<BodySender>,
}

/// A response that reached its end.
pub struct Completed {
    pub slot: Slot,
    pub status: u16,
    pub body_tx: Option<BodySender>,
    pub trailers: Vec<(String, String)>,
}

/// Response bookkeeping that outlives a single read.
#[derive(Debug, Default)]
pub struct ResponseReader {
    current: Option<InProgress>,
    last_declared: Option<u64>,
    keep_alive_hint: Option<Duration>,
    close_requested: bool,
    abandoned: bool,
}

impl ResponseReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent `Keep-Alive: timeout=N` seen on this connection.
    pub fn keep_alive_hint(&self) -> Option<Duration> {
        self.keep_alive_hint
    }

    /// The server asked for the connection to close after this response.
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// A caller dropped a response before it finished.
    pub fn abandoned(&self) -> bool {
        self.abandoned
    }

    /// Error for bytes that arrived when no response was expected.
    pub fn unexpected_data(&self, extra: usize) -> ClientError {
        match self.last_declared {
            Some(declared) => ClientError::ResponseBodyLengthMismatch {
                declared,
                received: declared + extra as u64,
            },
            None => ClientError::Parse("response data received with no request in flight".into()),
        }
    }

    /// Error for a stream that ended while a response was incomplete.
    pub fn eof_error(&self) -> ClientError {
        match &self.current {
            Some(cur) if cur.length_framed => match cur.counter.remaining() {
                Some(remaining) if remaining > 0 => ClientError::ResponseBodyLengthMismatch {
                    declared: cur.counter.declared().unwrap_or(0),
                    received: cur.counter.seen(),
                },
                _ => ClientError::other_side_closed(),
            },
            _ => ClientError::other_side_closed(),
        }
    }

    /// Deliver `err` to the body of the response in progress, if any.
    pub fn fail_current(&mut self, err: &ClientError) -> bool {
        match self.current.take() {
            Some(cur) => {
                if let Some(tx) = cur.body_tx {
                    let _ = tx.send(BodyFrame::Error(err.clone()));
                }
                true
            }
            None => false,
        }
    }

    /// The last response was length framed and no new head has started since.
    pub fn after_length_framed(&self) -> bool {
        self.current.is_none() && self.last_declared.is_some()
    }

    /// Whether a response is partially parsed.
    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }
}

/// Borrowed view handed to the tokenizer for one `feed`/`finish` call.
pub struct ReadContext<'a> {
    reader: &'a mut ResponseReader,
    sched: &'a mut Scheduler<Slot>,
    pub completed: Vec<Completed>,
    pub error: Option<ClientError>,
}

impl<'a> ReadContext<'a> {
    pub fn new(reader: &'a mut ResponseReader, sched: &'a mut Scheduler<Slot>) -> Self {
        Self {
            reader,
            sched,
            completed: Vec::new(),
            error: None,
        }
    }

    fn abort(&mut self, err: ClientError) -> Abort {
        self.error = Some(err);
        Abort
    }

    fn current(&mut self) -> Result<&mut InProgress, Abort> {
        if self.reader.current.is_none() {
            return Err(self.abort(ClientError::Parse("response data before status line".into())));
        }
        self.reader.current.as_mut().ok_or(Abort)
    }
}

impl ParserSink for ReadContext<'_> {
    fn on_status(&mut self, minor_version: u8, status: u16, reason: &[u8]) -> Result<(), Abort> {
        if self.sched.front().is_none() {
            let err = self.reader.unexpected_data(0);
            return Err(self.abort(err));
        }
        self.reader.last_declared = None;
        self.reader.current = Some(InProgress {
            status,
            reason: String::from_utf8_lossy(reason).into_owned(),
            minor_version,
            headers: Vec::new(),
            counter: LengthCounter::new(None),
            length_framed: false,
            expected_trailers: Vec::new(),
            trailers: Vec::new(),
            body_tx: None,
        });
        Ok(())
    }

    fn on_header(&mut self, name: &[u8], value: &[u8]) -> Result<(), Abort> {
        let cur = self.current()?;
        cur.headers.push((
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
        Ok(())
    }

    fn on_headers_complete(&mut self) -> Result<BodyHint, Abort> {
        let is_head = self.sched.front().is_some_and(|slot| slot.is_head());
        let cur = self.current()?;

        let meaningful = match extract_meaningful_headers(&cur.headers) {
            Ok(m) => m,
            Err(e) => return Err(self.abort(ClientError::Parse(e.to_string()))),
        };
        let chunked = cur.headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("transfer-encoding")
                && value
                    .rsplit(',')
                    .next()
                    .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
        });
        let bodyless = is_head || cur.status == 204 || cur.status == 304;

        cur.length_framed = !bodyless && !chunked && meaningful.content_length_present;
        if cur.length_framed {
            cur.counter = LengthCounter::new(Some(meaningful.content_length));
        }
        if chunked && !bodyless {
            if let Some(announced) = &meaningful.trailers {
                cur.expected_trailers = trailer_names(announced);
            }
        }

        let status = cur.status;
        let minor_version = cur.minor_version;
        let (body_tx, body) = ResponseBody::channel();
        let response = Response::new(status, cur.reason.clone(), cur.headers.clone(), body);
        cur.body_tx = Some(body_tx);

        if meaningful.connection_close || (minor_version == 0 && !meaningful.connection_keep_alive) {
            self.reader.close_requested = true;
        }
        if let Some(hint) = meaningful.keep_alive.as_deref().and_then(parse_keep_alive_timeout) {
            self.reader.keep_alive_hint = Some(hint);
        }

        metrics::record_response(status);

        let delivered = self
            .sched
            .front_mut()
            .and_then(|slot| slot.exchange.head_tx.take())
            .map(|tx| tx.send(Ok(response)).is_ok())
            .unwrap_or(false);
        if !delivered {
            tracing::debug!(status, "Response head has no receiver; draining");
            self.reader.abandoned = true;
            if let Some(cur) = self.reader.current.as_mut() {
                cur.body_tx = None;
            }
        }

        Ok(if is_head { BodyHint::Skip } else { BodyHint::Expected })
    }

    fn on_body(&mut self, chunk: &[u8]) -> Result<(), Abort> {
        let cur = self.current()?;
        if !cur.counter.add(chunk.len()) {
            let err = ClientError::ResponseBodyLengthMismatch {
                declared: cur.counter.declared().unwrap_or(0),
                received: cur.counter.seen(),
            };
            return Err(self.abort(err));
        }

        let mut dropped = false;
        if let Some(tx) = &cur.body_tx {
            dropped = tx.send(BodyFrame::Data(Bytes::copy_from_slice(chunk))).is_err();
        }
        if dropped {
            cur.body_tx = None;
            self.reader.abandoned = true;
        }
        Ok(())
    }

    fn on_trailer(&mut self, name: &[u8], value: &[u8]) -> Result<(), Abort> {
        let cur = self.current()?;
        cur.trailers.push((
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
        Ok(())
    }

    fn on_message_complete(&mut self) -> Result<(), Abort> {
        let cur = self.current()?;

        if !cur.counter.finish() {
            let err = ClientError::ResponseBodyLengthMismatch {
                declared: cur.counter.declared().unwrap_or(0),
                received: cur.counter.seen(),
            };
            return Err(self.abort(err));
        }
        let missing = cur
            .expected_trailers
            .iter()
            .find(|name| !cur.trailers.iter().any(|(got, _)| got.eq_ignore_ascii_case(name)))
            .cloned();
        if let Some(name) = missing {
            return Err(self.abort(ClientError::TrailerMismatch(name)));
        }

        let Some(cur) = self.reader.current.take() else {
            return Err(Abort);
        };
        self.reader.last_declared = if cur.length_framed { cur.counter.declared() } else { None };

        let Some(slot) = self.sched.complete_front() else {
            return Err(self.abort(ClientError::Parse("response completed with no request in flight".into())));
        };
        self.completed.push(Completed {
            slot,
            status: cur.status,
            body_tx: cur.body_tx,
            trailers: cur.trailers,
        });
        Ok(())
    }
}
