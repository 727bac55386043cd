//! Shared utilities for integration tests: scripted origins on raw TCP.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use h1_dispatch::{Client, ClientConfig, Origin};

/// A request as the origin saw it.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Server side of one accepted connection.
pub struct Conn {
    stream: TcpStream,
    buf: BytesMut,
}

impl Conn {
    async fn fill(&mut self) -> bool {
        matches!(self.stream.read_buf(&mut self.buf).await, Ok(n) if n > 0)
    }

    async fn read_exact_buffered(&mut self, n: usize) -> Option<Vec<u8>> {
        while self.buf.len() < n {
            if !self.fill().await {
                return None;
            }
        }
        Some(self.buf.split_to(n).to_vec())
    }

    async fn read_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.split_to(pos + 2);
                return Some(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
            if !self.fill().await {
                return None;
            }
        }
    }

    /// Next complete request, or `None` once the client hung up.
    pub async fn read_request(&mut self) -> Option<RawRequest> {
        let head_len = loop {
            if let Some(pos) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            if !self.fill().await {
                return None;
            }
        };

        let head = self.buf.split_to(head_len);
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Request::new(&mut headers);
        parsed.parse(&head).ok()?;

        let request_headers: Vec<(String, String)> = parsed
            .headers
            .iter()
            .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
            .collect();
        let mut request = RawRequest {
            method: parsed.method?.to_string(),
            path: parsed.path?.to_string(),
            headers: request_headers,
            body: Vec::new(),
        };

        if request
            .header("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
        {
            loop {
                let size_line = self.read_line().await?;
                let size = usize::from_str_radix(size_line.trim(), 16).ok()?;
                if size == 0 {
                    // trailer section
                    while !self.read_line().await?.is_empty() {}
                    break;
                }
                let data = self.read_exact_buffered(size).await?;
                request.body.extend_from_slice(&data);
                self.read_line().await?;
            }
        } else if let Some(len) = request.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
            request.body = self.read_exact_buffered(len).await?;
        }

        Some(request)
    }

    pub async fn write(&mut self, data: &[u8]) {
        let _ = self.stream.write_all(data).await;
    }

    /// Close the write side.
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    /// Wait for the client to hang up, discarding anything it sends.
    pub async fn wait_closed(&mut self) {
        while self.fill().await {
            self.buf.advance(self.buf.len());
        }
    }
}

/// Scripted origin on an ephemeral port. The handler gets the zero-based
/// index of each accepted connection.
pub struct MockOrigin {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
}

impl MockOrigin {
    pub async fn start<F, Fut>(handler: F) -> Self
    where
        F: Fn(usize, Conn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler(
                        index,
                        Conn {
                            stream,
                            buf: BytesMut::new(),
                        },
                    )
                    .await;
                });
            }
        });

        Self { addr, accepted }
    }

    pub fn origin(&self) -> Origin {
        Origin::http("127.0.0.1", self.addr.port())
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn client(&self, config: ClientConfig) -> Client {
        Client::builder()
            .origin(self.origin())
            .config(config)
            .build()
            .unwrap()
    }
}

/// An address nothing listens on.
pub async fn closed_port() -> Origin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Origin::http("127.0.0.1", port)
}

/// `200 OK` with a content-length framed body.
pub fn ok(body: &str) -> String {
    format!("HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{}", body.len(), body)
}

/// Short timeouts so idle connections do not outlive a test.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        keep_alive_timeout_ms: 2_000,
        connect_timeout_ms: 2_000,
        ..ClientConfig::default()
    }
}

/// Poll `f` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    f()
}
