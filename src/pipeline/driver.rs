//! Connection task.
//!
//! # Responsibilities
//! - Own the transport; the only reader and writer of the socket
//! - Move requests from the scheduler onto the wire and pull streamed bodies
//! - Feed response bytes to the tokenizer and act on the reader's verdicts
//! - Keep-alive, idle timeout, draining and teardown
//!
//! # Design Decisions
//! - Every wait is a cancel-safe future in one `select!`; handlers run after
//!   the futures are dropped, with plain `&mut self`
//! - Body chunks are only pulled once the outbound buffer is empty, so a
//!   request's bytes reach the socket in order and "sent" is exact
//! - On a violation every in-flight request that reached the wire fails with
//!   the same error; everything else is handed back to the client

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::dispatch::events::CloseReason;
use crate::error::ClientError;
use crate::http::request::BodyStream;
use crate::http::response::BodyFrame;
use crate::net::connection::{ConnectionId, ConnectionLoad, ConnectionState};
use crate::net::connector::BoxedTransport;
use crate::net::origin::Origin;
use crate::observability::metrics;
use crate::parser::{ParseError, ResponseTokenizer};
use crate::pipeline::reader::{Completed, ReadContext, ResponseReader};
use crate::pipeline::scheduler::Scheduler;
use crate::pipeline::writer::RequestWriter;
use crate::pipeline::{Command, Exchange, Slot};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Why a connection task stopped.
#[derive(Debug, Clone)]
pub enum ExitReason {
    /// Clean closure; nothing that reached the wire was lost.
    Closed(CloseReason),
    /// Protocol violation or socket failure.
    Violation(ClientError),
    /// The client was destroyed.
    Destroyed,
}

/// Result of a finished connection task.
#[derive(Debug)]
pub struct DriverExit {
    pub reason: ExitReason,
    /// Requests that never reached the wire, in submission order.
    pub unsent: Vec<Exchange>,
}

enum Event {
    Read(std::io::Result<usize>),
    Written(std::io::Result<usize>),
    Chunk(Option<std::io::Result<Bytes>>),
    Command(Option<Command>),
    IdleTimeout,
    Shutdown,
}

/// Drives one connection until it closes.
pub struct ConnectionDriver {
    id: ConnectionId,
    origin: Origin,
    read_half: ReadHalf<BoxedTransport>,
    write_half: WriteHalf<BoxedTransport>,
    tokenizer: Box<dyn ResponseTokenizer>,
    sched: Scheduler<Slot>,
    reader: ResponseReader,
    inbuf: BytesMut,
    outbuf: BytesMut,
    /// Total bytes ever placed in `outbuf`.
    enqueued: u64,
    /// Total bytes handed to the socket.
    flushed: u64,
    commands: mpsc::UnboundedReceiver<Command>,
    load: Arc<ConnectionLoad>,
    shutdown: broadcast::Receiver<()>,
    closing: Option<CloseReason>,
    accepting: bool,
    idle_deadline: Option<Instant>,
    unsent: Vec<Exchange>,
    keep_alive_timeout: Duration,
    keep_alive_max_timeout: Duration,
    keep_alive_threshold: Duration,
}

impl ConnectionDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ConnectionId,
        origin: Origin,
        transport: BoxedTransport,
        tokenizer: Box<dyn ResponseTokenizer>,
        commands: mpsc::UnboundedReceiver<Command>,
        load: Arc<ConnectionLoad>,
        shutdown: broadcast::Receiver<()>,
        config: &ClientConfig,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        Self {
            id,
            origin,
            read_half,
            write_half,
            tokenizer,
            sched: Scheduler::new(config.pipelining),
            reader: ResponseReader::new(),
            inbuf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            outbuf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            enqueued: 0,
            flushed: 0,
            commands,
            load,
            shutdown,
            closing: None,
            accepting: true,
            idle_deadline: None,
            unsent: Vec::new(),
            keep_alive_timeout: Duration::from_millis(config.keep_alive_timeout_ms),
            keep_alive_max_timeout: Duration::from_millis(config.keep_alive_max_timeout_ms),
            keep_alive_threshold: Duration::from_millis(config.keep_alive_timeout_threshold_ms),
        }
    }

    pub async fn run(mut self) -> DriverExit {
        let reason = loop {
            self.dispatch_ready();
            if let Some(reason) = self.finished() {
                break ExitReason::Closed(reason);
            }
            self.publish_state();

            let want_body = self.outbuf.is_empty() && self.body_pending();
            let deadline = self.arm_idle_timer();
            let body = if want_body {
                self.sched
                    .back_mut()
                    .and_then(|slot| slot.writer.as_mut())
                    .and_then(|w| w.stream_mut())
            } else {
                None
            };
            if self.inbuf.capacity() - self.inbuf.len() < 1024 {
                self.inbuf.reserve(READ_BUFFER_SIZE);
            }

            let event = tokio::select! {
                biased;
                _ = self.shutdown.recv() => Event::Shutdown,
                res = self.read_half.read_buf(&mut self.inbuf) => Event::Read(res),
                res = self.write_half.write_buf(&mut self.outbuf), if !self.outbuf.is_empty() => Event::Written(res),
                chunk = next_chunk(body), if want_body => Event::Chunk(chunk),
                cmd = self.commands.recv(), if self.accepting => Event::Command(cmd),
                _ = idle_timer(deadline), if deadline.is_some() => Event::IdleTimeout,
            };

            match event {
                Event::Shutdown => break self.destroy(),
                Event::Read(Ok(0)) => break self.on_eof(),
                Event::Read(Ok(_)) => {
                    let data = self.inbuf.split();
                    if let Err(err) = self.on_data(&data) {
                        break self.violation(err);
                    }
                }
                Event::Read(Err(e)) => break self.violation(ClientError::socket(e)),
                Event::Written(Ok(0)) => {
                    let err = std::io::Error::new(std::io::ErrorKind::WriteZero, "socket accepted no bytes");
                    break self.violation(ClientError::socket(err));
                }
                Event::Written(Ok(n)) => self.flushed += n as u64,
                Event::Written(Err(e)) => break self.violation(ClientError::socket(e)),
                Event::Chunk(Some(Ok(chunk))) => {
                    if let Err(err) = self.on_body_chunk(chunk) {
                        if let Some(reason) = self.request_violation(err) {
                            break reason;
                        }
                    }
                }
                Event::Chunk(Some(Err(e))) => {
                    if let Some(reason) = self.request_violation(ClientError::RequestBody(Arc::new(e))) {
                        break reason;
                    }
                }
                Event::Chunk(None) => {
                    if let Err(err) = self.on_body_end() {
                        if let Some(reason) = self.request_violation(err) {
                            break reason;
                        }
                    }
                }
                Event::Command(Some(Command::Dispatch(exchange))) => {
                    self.idle_deadline = None;
                    self.sched.enqueue(Slot::new(*exchange));
                }
                Event::Command(Some(Command::Close)) | Event::Command(None) => {
                    self.begin_close(CloseReason::ClientClose);
                }
                Event::IdleTimeout => break ExitReason::Closed(CloseReason::IdleTimeout),
            }
        };

        self.teardown(reason).await
    }

    fn may_dispatch(&self) -> bool {
        matches!(self.closing, None | Some(CloseReason::ClientClose))
    }

    fn dispatch_ready(&mut self) {
        if !self.may_dispatch() {
            return;
        }
        while let Some(slot) = self.sched.dispatch_next() {
            if slot.exchange.is_abandoned() {
                self.sched.withdraw_back();
                self.load.release();
                continue;
            }

            slot.wire_start = self.enqueued;
            let before = self.outbuf.len();
            slot.writer = Some(RequestWriter::start(&mut slot.exchange.request, &self.origin, &mut self.outbuf));
            self.enqueued += (self.outbuf.len() - before) as u64;

            tracing::debug!(
                connection_id = %self.id,
                request_id = %slot.exchange.request.id,
                method = %slot.exchange.request.request.method,
                path = %slot.exchange.request.request.path,
                "Request dispatched"
            );
        }
    }

    /// Clean exit condition, if reached.
    fn finished(&self) -> Option<CloseReason> {
        match self.closing {
            Some(CloseReason::ClientClose) if self.sched.is_empty() && self.outbuf.is_empty() => {
                Some(CloseReason::ClientClose)
            }
            Some(reason) if reason != CloseReason::ClientClose && self.sched.in_flight_len() == 0 => {
                Some(reason)
            }
            _ => None,
        }
    }

    fn publish_state(&self) {
        let state = if self.closing.is_some() {
            ConnectionState::Draining
        } else if self.sched.is_empty() {
            ConnectionState::Idle
        } else {
            ConnectionState::Active
        };
        self.load.set_state(state);
    }

    fn begin_close(&mut self, reason: CloseReason) {
        self.accepting = false;
        match self.closing {
            None => self.closing = Some(reason),
            Some(CloseReason::ClientClose) if reason != CloseReason::ClientClose => {
                self.closing = Some(reason);
            }
            _ => {}
        }
        self.load.set_state(ConnectionState::Draining);
        tracing::debug!(connection_id = %self.id, reason = ?reason, "Connection closing");
    }

    fn idle_timeout(&self) -> Duration {
        match self.reader.keep_alive_hint() {
            Some(hint) => hint
                .saturating_sub(self.keep_alive_threshold)
                .min(self.keep_alive_max_timeout),
            None => self.keep_alive_timeout,
        }
    }

    fn arm_idle_timer(&mut self) -> Option<Instant> {
        if !self.sched.is_empty() || self.closing.is_some() {
            self.idle_deadline = None;
            return None;
        }
        let timeout = self.idle_timeout();
        Some(*self.idle_deadline.get_or_insert_with(|| Instant::now() + timeout))
    }

    fn body_pending(&self) -> bool {
        self.sched
            .in_flight()
            .last()
            .is_some_and(|slot| slot.writer.as_ref().is_some_and(|w| w.wants_body()))
    }

    fn on_body_chunk(&mut self, chunk: Bytes) -> Result<(), ClientError> {
        let before = self.outbuf.len();
        let result = match self.sched.back_mut().and_then(|slot| slot.writer.as_mut()) {
            Some(writer) => writer.on_chunk(chunk, &mut self.outbuf),
            None => Ok(()),
        };
        self.enqueued += (self.outbuf.len() - before) as u64;
        result
    }

    fn on_body_end(&mut self) -> Result<(), ClientError> {
        let before = self.outbuf.len();
        let result = match self.sched.back_mut().and_then(|slot| slot.writer.as_mut()) {
            Some(writer) => writer.on_end(&mut self.outbuf),
            None => Ok(()),
        };
        self.enqueued += (self.outbuf.len() - before) as u64;
        result
    }

    /// A request body broke its declared framing. Only that request fails
    /// while none of it reached the wire; otherwise the connection is gone.
    fn request_violation(&mut self, err: ClientError) -> Option<ExitReason> {
        let on_wire = self
            .sched
            .in_flight()
            .last()
            .map_or(false, |slot| self.flushed > slot.wire_start);

        if on_wire {
            return Some(self.violation(err));
        }

        let slot = self.sched.withdraw_back()?;
        let contributed = (self.enqueued - slot.wire_start) as usize;
        let keep = self.outbuf.len().saturating_sub(contributed);
        self.outbuf.truncate(keep);
        self.enqueued = slot.wire_start;

        tracing::warn!(
            connection_id = %self.id,
            request_id = %slot.exchange.request.id,
            error = %err,
            "Request failed before reaching the wire"
        );
        metrics::record_request_failure(err.code());
        self.load.release();
        slot.exchange.fail(err);
        None
    }

    fn on_data(&mut self, data: &[u8]) -> Result<(), ClientError> {
        let mut cx = ReadContext::new(&mut self.reader, &mut self.sched);
        let result = self.tokenizer.feed(data, &mut cx);
        let completed = std::mem::take(&mut cx.completed);
        let aborted_with = cx.error.take();
        let head_rejected = matches!(result, Err(ParseError::InvalidHead(_)));

        let mut failure = match result {
            Ok(()) => None,
            Err(ParseError::Aborted) => Some(
                aborted_with.unwrap_or_else(|| ClientError::Parse(ParseError::Aborted.to_string())),
            ),
            Err(e) => Some(ClientError::Parse(e.to_string())),
        };

        // bytes beyond the last expected response, or beyond a declared
        // length that the tokenizer took for the next head
        let trailing = (self.sched.in_flight_len() == 0
            && !self.reader.in_progress()
            && (failure.is_some() || !self.tokenizer.is_idle()))
            || (head_rejected && self.reader.after_length_framed());
        if trailing {
            failure = Some(self.reader.unexpected_data(self.tokenizer.buffered()));
        }

        let count = completed.len();
        for (i, done) in completed.into_iter().enumerate() {
            let poisoned = if trailing && i + 1 == count { failure.as_ref() } else { None };
            self.finish_exchange(done, poisoned);
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if self.reader.close_requested() || self.reader.abandoned() {
            self.begin_close(CloseReason::Drained);
        }
        Ok(())
    }

    fn finish_exchange(&mut self, done: Completed, error: Option<&ClientError>) {
        let Completed {
            mut slot,
            status,
            body_tx,
            trailers,
        } = done;

        if let Some(tx) = body_tx {
            match error {
                Some(err) => {
                    let _ = tx.send(BodyFrame::Error(err.clone()));
                }
                None => {
                    if !trailers.is_empty() {
                        let _ = tx.send(BodyFrame::Trailers(trailers));
                    }
                    let _ = tx.send(BodyFrame::End);
                }
            }
        }

        if slot.writing() {
            // the response beat the request body; the rest of it is dropped
            if let Some(writer) = slot.writer.as_mut() {
                writer.abort();
            }
            self.begin_close(CloseReason::Drained);
        }
        if slot.exchange.request.reset {
            self.begin_close(CloseReason::Drained);
        }

        self.load.release();
        metrics::record_request_duration(slot.exchange.submitted.elapsed());
        tracing::debug!(
            connection_id = %self.id,
            request_id = %slot.exchange.request.id,
            status,
            "Response complete"
        );
    }

    fn on_eof(&mut self) -> ExitReason {
        let mut cx = ReadContext::new(&mut self.reader, &mut self.sched);
        let result = self.tokenizer.finish(&mut cx);
        let completed = std::mem::take(&mut cx.completed);
        let aborted_with = cx.error.take();

        for done in completed {
            self.finish_exchange(done, None);
        }

        match result {
            Err(ParseError::Incomplete) => {
                let err = self.reader.eof_error();
                self.violation(err)
            }
            Err(ParseError::Aborted) => {
                let err = aborted_with.unwrap_or_else(ClientError::other_side_closed);
                self.violation(err)
            }
            Err(e) => self.violation(ClientError::Parse(e.to_string())),
            Ok(()) if self.sched.in_flight_len() > 0 => self.violation(ClientError::other_side_closed()),
            Ok(()) => match self.closing {
                Some(reason) if reason != CloseReason::ClientClose => ExitReason::Closed(reason),
                _ => ExitReason::Closed(CloseReason::RemoteClosed),
            },
        }
    }

    /// Fail every in-flight request that reached the wire with `err`; hand
    /// the rest back.
    fn violation(&mut self, err: ClientError) -> ExitReason {
        tracing::warn!(
            connection_id = %self.id,
            origin = %self.origin,
            code = err.code(),
            error = %err,
            in_flight = self.sched.in_flight_len(),
            "Connection violated"
        );

        self.reader.fail_current(&err);
        let (in_flight, pending) = self.sched.drain_all();
        for slot in in_flight {
            if self.flushed > slot.wire_start {
                metrics::record_request_failure(err.code());
                slot.exchange.fail(err.clone());
            } else {
                self.unsent.push(slot.into_unsent());
            }
        }
        self.unsent.extend(pending.into_iter().map(Slot::into_unsent));
        ExitReason::Violation(err)
    }

    fn destroy(&mut self) -> ExitReason {
        let err = ClientError::ClientDestroyed;
        self.reader.fail_current(&err);
        let (in_flight, pending) = self.sched.drain_all();
        for slot in in_flight.into_iter().chain(pending) {
            slot.exchange.fail(err.clone());
        }
        ExitReason::Destroyed
    }

    async fn teardown(mut self, reason: ExitReason) -> DriverExit {
        self.load.set_state(ConnectionState::Closed);
        self.commands.close();

        let mut unsent = std::mem::take(&mut self.unsent);
        let (in_flight, pending) = self.sched.drain_all();
        for slot in in_flight {
            if self.flushed > slot.wire_start {
                slot.exchange.fail(ClientError::other_side_closed());
            } else {
                unsent.push(slot.into_unsent());
            }
        }
        unsent.extend(pending.into_iter().map(Slot::into_unsent));
        while let Ok(cmd) = self.commands.try_recv() {
            if let Command::Dispatch(exchange) = cmd {
                unsent.push(*exchange);
            }
        }

        match &reason {
            ExitReason::Destroyed => {
                for exchange in unsent.drain(..) {
                    exchange.fail(ClientError::ClientDestroyed);
                }
            }
            ExitReason::Closed(_) => {
                let _ = self.write_half.shutdown().await;
            }
            ExitReason::Violation(_) => {}
        }

        tracing::debug!(
            connection_id = %self.id,
            origin = %self.origin,
            reason = ?reason,
            unsent = unsent.len(),
            "Connection closed"
        );

        DriverExit { reason, unsent }
    }
}

async fn next_chunk(body: Option<&mut BodyStream>) -> Option<std::io::Result<Bytes>> {
    match body {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn idle_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{validate, Request};
    use crate::http::response::Response;
    use crate::parser::H1Tokenizer;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::oneshot;

    struct Harness {
        commands: mpsc::UnboundedSender<Command>,
        server: DuplexStream,
        task: tokio::task::JoinHandle<DriverExit>,
        _shutdown: broadcast::Sender<()>,
    }

    fn harness(config: ClientConfig) -> Harness {
        let (client, server) = duplex(64 * 1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let driver = ConnectionDriver::new(
            ConnectionId::new(),
            Origin::http("localhost", 80),
            Box::new(client),
            Box::new(H1Tokenizer::new(config.max_header_size)),
            rx,
            Arc::new(ConnectionLoad::new()),
            shutdown_rx,
            &config,
        );
        Harness {
            commands: tx,
            server,
            task: tokio::spawn(driver.run()),
            _shutdown: shutdown_tx,
        }
    }

    fn send(h: &Harness, req: Request) -> oneshot::Receiver<Result<Response, ClientError>> {
        let (tx, rx) = oneshot::channel();
        let exchange = Exchange::new(validate(req).unwrap(), Origin::http("localhost", 80), tx);
        h.commands.send(Command::Dispatch(Box::new(exchange))).unwrap();
        rx
    }

    async fn read_head(server: &mut DuplexStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            server.read_exact(&mut byte).await.unwrap();
            buf.push(byte[0]);
        }
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn round_trip_and_client_close() {
        let mut h = harness(ClientConfig::default());
        let rx = send(&h, Request::get("/hello"));

        let head = read_head(&mut h.server).await;
        assert!(head.starts_with("GET /hello HTTP/1.1\r\n"));
        h.server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi")
            .await
            .unwrap();

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.text().await.unwrap(), "hi");

        h.commands.send(Command::Close).unwrap();
        let exit = h.task.await.unwrap();
        assert!(matches!(exit.reason, ExitReason::Closed(CloseReason::ClientClose)));
        assert!(exit.unsent.is_empty());
    }

    #[tokio::test]
    async fn short_response_body_is_a_violation() {
        let mut h = harness(ClientConfig::default());
        let rx = send(&h, Request::get("/"));
        read_head(&mut h.server).await;
        h.server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n123")
            .await
            .unwrap();

        let response = rx.await.unwrap().unwrap();
        drop(h.server);

        let err = response.bytes().await.unwrap_err();
        assert_eq!(err.code(), "ERR_RESPONSE_CONTENT_LENGTH_MISMATCH");
        let exit = h.task.await.unwrap();
        assert!(matches!(exit.reason, ExitReason::Violation(ClientError::ResponseBodyLengthMismatch { .. })));
    }

    #[tokio::test]
    async fn server_close_directive_drains() {
        let mut h = harness(ClientConfig::default());
        let rx = send(&h, Request::get("/"));
        read_head(&mut h.server).await;
        h.server
            .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap().unwrap().status(), 204);
        let exit = h.task.await.unwrap();
        assert!(matches!(exit.reason, ExitReason::Closed(CloseReason::Drained)));
    }

    #[tokio::test]
    async fn idle_timeout_uses_keep_alive_hint() {
        let config = ClientConfig {
            keep_alive_timeout_ms: 60_000,
            keep_alive_timeout_threshold_ms: 900,
            ..ClientConfig::default()
        };
        let mut h = harness(config);
        let rx = send(&h, Request::get("/"));
        read_head(&mut h.server).await;
        h.server
            .write_all(b"HTTP/1.1 200 OK\r\nKeep-Alive: timeout=1\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(5), h.task).await.unwrap().unwrap();
        assert!(matches!(exit.reason, ExitReason::Closed(CloseReason::IdleTimeout)));
    }

    #[tokio::test]
    async fn unsent_requests_are_handed_back_on_violation() {
        let mut h = harness(ClientConfig::default());
        let first = send(&h, Request::get("/1"));
        let _second = send(&h, Request::get("/2"));
        read_head(&mut h.server).await;
        h.server.write_all(b"garbage that is not http\r\n\r\n").await.unwrap();

        let err = first.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "ERR_HTTP_PARSER");
        let exit = h.task.await.unwrap();
        assert_eq!(exit.unsent.len(), 1);
        assert_eq!(exit.unsent[0].request.request.path(), "/2");
    }
}
