//! Response handles handed back to callers.
//!
//! # Design Decisions
//! - The head arrives through a oneshot ([`PendingResponse`]); the body through
//!   an unbounded channel of [`BodyFrame`]s fed by the connection task
//! - An error frame is terminal: nothing is delivered after it
//! - Dropping a [`ResponseBody`] early does not stop the connection from
//!   consuming the rest of the body; it only stops delivery

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::error::ClientError;
use crate::http::request::RequestId;

/// Unit of body delivery from the connection task.
#[derive(Debug)]
pub enum BodyFrame {
    Data(Bytes),
    Trailers(Vec<(String, String)>),
    End,
    Error(ClientError),
}

pub type BodySender = mpsc::UnboundedSender<BodyFrame>;
pub type HeadSender = oneshot::Sender<Result<Response, ClientError>>;

/// An HTTP response whose head has arrived.
#[derive(Debug)]
pub struct Response {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body: ResponseBody,
}

impl Response {
    pub(crate) fn new(
        status: u16,
        reason: String,
        headers: Vec<(String, String)>,
        body: ResponseBody,
    ) -> Self {
        Self {
            status,
            reason,
            headers,
            body,
        }
    }

    /// HTTP status code (e.g. 200, 404).
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Response headers as (name, value) pairs, in wire order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Get the first header value matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Collect the whole body.
    pub async fn bytes(self) -> Result<Bytes, ClientError> {
        self.body.bytes().await
    }

    /// Collect the whole body as UTF-8 text.
    pub async fn text(self) -> Result<String, ClientError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ClientError::Parse(format!("response body is not utf-8: {e}")))
    }
}

/// Streaming response body.
#[derive(Debug)]
pub struct ResponseBody {
    rx: mpsc::UnboundedReceiver<BodyFrame>,
    trailers: Option<Vec<(String, String)>>,
    done: bool,
}

impl ResponseBody {
    pub(crate) fn channel() -> (BodySender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let body = Self {
            rx,
            trailers: None,
            done: false,
        };
        (tx, body)
    }

    /// Next chunk of body data; `None` once the body has ended.
    pub async fn chunk(&mut self) -> Option<Result<Bytes, ClientError>> {
        std::future::poll_fn(|cx| self.poll_chunk(cx)).await
    }

    /// Collect the remaining body.
    pub async fn bytes(mut self) -> Result<Bytes, ClientError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Trailer fields, available once the body has ended.
    pub fn trailers(&self) -> Option<&[(String, String)]> {
        self.trailers.as_deref()
    }

    /// True once the end of the body (or an error) has been observed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, ClientError>>> {
        loop {
            if self.done {
                return Poll::Ready(None);
            }
            match self.rx.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(BodyFrame::Data(bytes))) => return Poll::Ready(Some(Ok(bytes))),
                Poll::Ready(Some(BodyFrame::Trailers(trailers))) => {
                    self.trailers = Some(trailers);
                }
                Poll::Ready(Some(BodyFrame::End)) => {
                    self.done = true;
                }
                Poll::Ready(Some(BodyFrame::Error(err))) => {
                    self.done = true;
                    self.rx.close();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    // sender vanished without a terminal frame
                    self.done = true;
                    return Poll::Ready(Some(Err(ClientError::ClientDestroyed)));
                }
            }
        }
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_chunk(cx)
    }
}

/// Resolves to the response once its head has been parsed.
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<Result<Response, ClientError>>,
}

impl PendingResponse {
    pub(crate) fn new(id: RequestId, rx: oneshot::Receiver<Result<Response, ClientError>>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<Response, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ClientError::ClientDestroyed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
