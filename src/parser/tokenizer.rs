//! `httparse`-backed implementation of [`ResponseTokenizer`].

use bytes::{Buf, BytesMut};

use super::{Abort, BodyHint, ParseError, ParserSink, ResponseTokenizer};
use crate::http::headers::parse_content_length;

/// Maximum number of header fields in one block.
const MAX_HEADERS_COUNT: usize = 128;

/// Longest accepted chunk-size line.
const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Length { remaining: u64 },
    Chunked(ChunkState),
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { remaining: u64 },
    DataCrlf,
    Trailers,
}

enum Step {
    Continue,
    NeedMore,
}

/// HTTP/1.1 response tokenizer.
#[derive(Debug)]
pub struct H1Tokenizer {
    buf: BytesMut,
    state: State,
    max_header_size: usize,
}

impl H1Tokenizer {
    pub fn new(max_header_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            state: State::Head,
            max_header_size,
        }
    }

    fn step(&mut self, sink: &mut dyn ParserSink) -> Result<Step, ParseError> {
        match self.state {
            State::Head => self.parse_head(sink),
            State::Length { remaining } => {
                let take = remaining.min(self.buf.len() as u64) as usize;
                if take == 0 {
                    return Ok(Step::NeedMore);
                }
                aborted(sink.on_body(&self.buf[..take]))?;
                self.buf.advance(take);
                let remaining = remaining - take as u64;
                if remaining == 0 {
                    self.complete(sink)?;
                } else {
                    self.state = State::Length { remaining };
                }
                Ok(Step::Continue)
            }
            State::UntilClose => {
                if self.buf.is_empty() {
                    return Ok(Step::NeedMore);
                }
                let data = self.buf.split();
                aborted(sink.on_body(&data))?;
                Ok(Step::Continue)
            }
            State::Chunked(chunk) => self.parse_chunked(chunk, sink),
        }
    }

    fn parse_head(&mut self, sink: &mut dyn ParserSink) -> Result<Step, ParseError> {
        if self.buf.is_empty() {
            return Ok(Step::NeedMore);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
        let mut response = httparse::Response::new(&mut headers);
        let consumed = match response.parse(&self.buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => {
                if self.buf.len() > self.max_header_size {
                    return Err(ParseError::HeadTooLarge(self.max_header_size));
                }
                return Ok(Step::NeedMore);
            }
            Err(e) => return Err(ParseError::InvalidHead(e.to_string())),
        };
        if consumed > self.max_header_size {
            return Err(ParseError::HeadTooLarge(self.max_header_size));
        }

        let status = response
            .code
            .ok_or_else(|| ParseError::InvalidHead("missing status code".into()))?;
        if status == 101 {
            return Err(ParseError::Unsupported("protocol upgrade"));
        }
        if (100..200).contains(&status) {
            // informational, the final response follows
            self.buf.advance(consumed);
            return Ok(Step::Continue);
        }

        let minor = response.version.unwrap_or(1);
        aborted(sink.on_status(minor, status, response.reason.unwrap_or("").as_bytes()))?;

        let mut chunked = false;
        let mut has_transfer_encoding = false;
        let mut content_length: Option<u64> = None;
        for header in response.headers.iter() {
            aborted(sink.on_header(header.name.as_bytes(), header.value))?;

            if header.name.eq_ignore_ascii_case("transfer-encoding") {
                has_transfer_encoding = true;
                chunked = header
                    .value
                    .rsplit(|b| *b == b',')
                    .next()
                    .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"));
            } else if header.name.eq_ignore_ascii_case("content-length") {
                let parsed = parse_content_length(header.value)
                    .ok_or_else(|| ParseError::InvalidHead("invalid content-length".into()))?;
                if content_length.is_some_and(|prev| prev != parsed) {
                    return Err(ParseError::InvalidHead("conflicting content-length".into()));
                }
                content_length = Some(parsed);
            }
        }

        let hint = aborted(sink.on_headers_complete())?;
        self.buf.advance(consumed);

        let bodyless = hint == BodyHint::Skip || status == 204 || status == 304;
        if bodyless {
            self.complete(sink)?;
        } else if chunked {
            self.state = State::Chunked(ChunkState::Size);
        } else if has_transfer_encoding {
            self.state = State::UntilClose;
        } else {
            match content_length {
                Some(0) => self.complete(sink)?,
                Some(remaining) => self.state = State::Length { remaining },
                None => self.state = State::UntilClose,
            }
        }
        Ok(Step::Continue)
    }

    fn parse_chunked(&mut self, chunk: ChunkState, sink: &mut dyn ParserSink) -> Result<Step, ParseError> {
        match chunk {
            ChunkState::Size => {
                let Some(line_end) = find_crlf(&self.buf) else {
                    if self.buf.len() > MAX_CHUNK_LINE {
                        return Err(ParseError::InvalidChunk("chunk size line too long"));
                    }
                    return Ok(Step::NeedMore);
                };
                let line = &self.buf[..line_end];
                let size_part = line.split(|b| *b == b';').next().unwrap_or(line).trim_ascii();
                let size = std::str::from_utf8(size_part)
                    .ok()
                    .and_then(|s| u64::from_str_radix(s, 16).ok())
                    .ok_or(ParseError::InvalidChunk("invalid chunk size"))?;
                self.buf.advance(line_end + 2);
                self.state = if size == 0 {
                    State::Chunked(ChunkState::Trailers)
                } else {
                    State::Chunked(ChunkState::Data { remaining: size })
                };
                Ok(Step::Continue)
            }
            ChunkState::Data { remaining } => {
                let take = remaining.min(self.buf.len() as u64) as usize;
                if take == 0 {
                    return Ok(Step::NeedMore);
                }
                aborted(sink.on_body(&self.buf[..take]))?;
                self.buf.advance(take);
                let remaining = remaining - take as u64;
                self.state = if remaining == 0 {
                    State::Chunked(ChunkState::DataCrlf)
                } else {
                    State::Chunked(ChunkState::Data { remaining })
                };
                Ok(Step::Continue)
            }
            ChunkState::DataCrlf => {
                if self.buf.len() < 2 {
                    return Ok(Step::NeedMore);
                }
                if &self.buf[..2] != b"\r\n" {
                    return Err(ParseError::InvalidChunk("missing CRLF after chunk data"));
                }
                self.buf.advance(2);
                self.state = State::Chunked(ChunkState::Size);
                Ok(Step::Continue)
            }
            ChunkState::Trailers => {
                if self.buf.len() < 2 {
                    return Ok(Step::NeedMore);
                }
                if self.buf.starts_with(b"\r\n") {
                    self.buf.advance(2);
                    self.complete(sink)?;
                    return Ok(Step::Continue);
                }

                let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
                let consumed = match httparse::parse_headers(&self.buf, &mut headers) {
                    Ok(httparse::Status::Complete((n, fields))) => {
                        for field in fields.iter() {
                            aborted(sink.on_trailer(field.name.as_bytes(), field.value))?;
                        }
                        n
                    }
                    Ok(httparse::Status::Partial) => {
                        if self.buf.len() > self.max_header_size {
                            return Err(ParseError::HeadTooLarge(self.max_header_size));
                        }
                        return Ok(Step::NeedMore);
                    }
                    Err(_) => return Err(ParseError::InvalidChunk("invalid trailer section")),
                };
                self.buf.advance(consumed);
                self.complete(sink)?;
                Ok(Step::Continue)
            }
        }
    }

    fn complete(&mut self, sink: &mut dyn ParserSink) -> Result<(), ParseError> {
        self.state = State::Head;
        aborted(sink.on_message_complete())
    }
}

impl ResponseTokenizer for H1Tokenizer {
    fn feed(&mut self, data: &[u8], sink: &mut dyn ParserSink) -> Result<(), ParseError> {
        self.buf.extend_from_slice(data);
        loop {
            match self.step(sink)? {
                Step::Continue => continue,
                Step::NeedMore => return Ok(()),
            }
        }
    }

    fn finish(&mut self, sink: &mut dyn ParserSink) -> Result<(), ParseError> {
        match self.state {
            State::Head if self.buf.is_empty() => Ok(()),
            State::UntilClose => self.complete(sink),
            _ => Err(ParseError::Incomplete),
        }
    }

    fn is_idle(&self) -> bool {
        self.state == State::Head && self.buf.is_empty()
    }

    fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.state = State::Head;
    }
}

fn aborted<T>(result: Result<T, Abort>) -> Result<T, ParseError> {
    result.map_err(|Abort| ParseError::Aborted)
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Ev {
        Status(u16),
        Header(String, String),
        HeadersDone,
        Body(Vec<u8>),
        Trailer(String, String),
        Complete,
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Ev>,
        skip_body: bool,
        abort_on_body: bool,
    }

    impl Recorder {
        fn body(&self) -> Vec<u8> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Ev::Body(b) => Some(b.clone()),
                    _ => None,
                })
                .flatten()
                .collect()
        }

        fn completed(&self) -> usize {
            self.events.iter().filter(|e| **e == Ev::Complete).count()
        }
    }

    impl ParserSink for Recorder {
        fn on_status(&mut self, _minor: u8, status: u16, _reason: &[u8]) -> Result<(), Abort> {
            self.events.push(Ev::Status(status));
            Ok(())
        }
        fn on_header(&mut self, name: &[u8], value: &[u8]) -> Result<(), Abort> {
            self.events.push(Ev::Header(
                String::from_utf8_lossy(name).into_owned(),
                String::from_utf8_lossy(value).into_owned(),
            ));
            Ok(())
        }
        fn on_headers_complete(&mut self) -> Result<BodyHint, Abort> {
            self.events.push(Ev::HeadersDone);
            Ok(if self.skip_body { BodyHint::Skip } else { BodyHint::Expected })
        }
        fn on_body(&mut self, chunk: &[u8]) -> Result<(), Abort> {
            if self.abort_on_body {
                return Err(Abort);
            }
            self.events.push(Ev::Body(chunk.to_vec()));
            Ok(())
        }
        fn on_trailer(&mut self, name: &[u8], value: &[u8]) -> Result<(), Abort> {
            self.events.push(Ev::Trailer(
                String::from_utf8_lossy(name).into_owned(),
                String::from_utf8_lossy(value).into_owned(),
            ));
            Ok(())
        }
        fn on_message_complete(&mut self) -> Result<(), Abort> {
            self.events.push(Ev::Complete);
            Ok(())
        }
    }

    fn feed_bytewise(tok: &mut H1Tokenizer, data: &[u8], sink: &mut Recorder) {
        for b in data {
            tok.feed(std::slice::from_ref(b), sink).unwrap();
        }
    }

    #[test]
    fn content_length_body() {
        let mut tok = H1Tokenizer::new(16 * 1024);
        let mut sink = Recorder::default();
        tok.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello", &mut sink).unwrap();
        assert_eq!(sink.events[0], Ev::Status(200));
        assert_eq!(sink.body(), b"hello");
        assert_eq!(sink.completed(), 1);
        assert!(tok.is_idle());
    }

    #[test]
    fn pipelined_responses_split_anywhere() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabcHTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        let mut tok = H1Tokenizer::new(16 * 1024);
        let mut sink = Recorder::default();
        feed_bytewise(&mut tok, wire, &mut sink);
        assert_eq!(sink.completed(), 2);
        assert!(sink.events.contains(&Ev::Status(404)));
        assert_eq!(sink.body(), b"abc");
    }

    #[test]
    fn chunked_with_trailers() {
        let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nTrailer: x-sum\r\n\r\n3;ext=1\r\nabc\r\n2\r\nde\r\n0\r\nx-sum: 42\r\n\r\n";
        let mut tok = H1Tokenizer::new(16 * 1024);
        let mut sink = Recorder::default();
        feed_bytewise(&mut tok, wire, &mut sink);
        assert_eq!(sink.body(), b"abcde");
        assert!(sink.events.contains(&Ev::Trailer("x-sum".into(), "42".into())));
        assert_eq!(sink.events.last(), Some(&Ev::Complete));
    }

    #[test]
    fn chunked_without_trailers() {
        let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n1\r\nz\r\n0\r\n\r\n";
        let mut tok = H1Tokenizer::new(16 * 1024);
        let mut sink = Recorder::default();
        tok.feed(wire, &mut sink).unwrap();
        assert_eq!(sink.body(), b"z");
        assert_eq!(sink.completed(), 1);
    }

    #[test]
    fn skip_hint_and_bodyless_statuses() {
        let mut tok = H1Tokenizer::new(16 * 1024);
        let mut sink = Recorder { skip_body: true, ..Default::default() };
        tok.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n", &mut sink).unwrap();
        assert_eq!(sink.completed(), 1);

        let mut sink = Recorder::default();
        tok.feed(b"HTTP/1.1 204 No Content\r\nContent-Length: 10\r\n\r\n", &mut sink).unwrap();
        assert_eq!(sink.completed(), 1);
        assert!(tok.is_idle());
    }

    #[test]
    fn informational_responses_are_skipped() {
        let mut tok = H1Tokenizer::new(16 * 1024);
        let mut sink = Recorder::default();
        tok.feed(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n", &mut sink)
            .unwrap();
        assert_eq!(sink.events[0], Ev::Status(200));
        assert_eq!(sink.completed(), 1);

        let err = tok.feed(b"HTTP/1.1 101 Switching Protocols\r\n\r\n", &mut sink).unwrap_err();
        assert_eq!(err, ParseError::Unsupported("protocol upgrade"));
    }

    #[test]
    fn close_delimited_body_completes_on_finish() {
        let mut tok = H1Tokenizer::new(16 * 1024);
        let mut sink = Recorder::default();
        tok.feed(b"HTTP/1.0 200 OK\r\n\r\nuntil close", &mut sink).unwrap();
        assert_eq!(sink.completed(), 0);
        tok.finish(&mut sink).unwrap();
        assert_eq!(sink.body(), b"until close");
        assert_eq!(sink.completed(), 1);
    }

    #[test]
    fn eof_mid_body_is_incomplete() {
        let mut tok = H1Tokenizer::new(16 * 1024);
        let mut sink = Recorder::default();
        tok.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n123", &mut sink).unwrap();
        assert_eq!(tok.finish(&mut sink), Err(ParseError::Incomplete));
        assert_eq!(sink.body(), b"123");

        tok.reset();
        assert!(tok.is_idle());
        assert_eq!(tok.finish(&mut sink), Ok(()));
    }

    #[test]
    fn head_size_is_bounded() {
        let mut tok = H1Tokenizer::new(64);
        let mut sink = Recorder::default();
        let long = format!("HTTP/1.1 200 OK\r\nx-pad: {}\r\n", "a".repeat(128));
        assert_eq!(tok.feed(long.as_bytes(), &mut sink), Err(ParseError::HeadTooLarge(64)));
    }

    #[test]
    fn invalid_inputs() {
        let mut sink = Recorder::default();
        let mut tok = H1Tokenizer::new(1024);
        assert!(matches!(tok.feed(b"NOT HTTP\r\n\r\n", &mut sink), Err(ParseError::InvalidHead(_))));

        let mut tok = H1Tokenizer::new(1024);
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n";
        assert!(matches!(tok.feed(wire, &mut sink), Err(ParseError::InvalidHead(_))));

        let mut tok = H1Tokenizer::new(1024);
        let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n";
        assert_eq!(tok.feed(wire, &mut sink), Err(ParseError::InvalidChunk("invalid chunk size")));
    }

    #[test]
    fn sink_abort_stops_parsing() {
        let mut tok = H1Tokenizer::new(1024);
        let mut sink = Recorder { abort_on_body: true, ..Default::default() };
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nab";
        assert_eq!(tok.feed(wire, &mut sink), Err(ParseError::Aborted));
        assert_eq!(sink.completed(), 0);
    }
}
