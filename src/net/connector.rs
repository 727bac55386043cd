//! Connector abstraction: origin in, duplex byte stream out.
//!
//! # Responsibilities
//! - Produce a connected stream for an origin
//! - Enforce the connect timeout
//!
//! # Design Decisions
//! - Streams are boxed trait objects so tests and TLS layers can plug in
//!   their own transports without touching the connection code
//! - The default [`TcpConnector`] speaks plain TCP only; `https` origins need
//!   a connector that wraps the stream

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::ClientError;
use crate::net::origin::{Origin, Scheme};

/// A duplex byte stream usable by a connection.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedTransport = Box<dyn Transport>;

/// Opens connections to origins.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, origin: &'a Origin) -> BoxFuture<'a, Result<BoxedTransport, ClientError>>;
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    nodelay: bool,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            nodelay: true,
        }
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, origin: &'a Origin) -> BoxFuture<'a, Result<BoxedTransport, ClientError>> {
        Box::pin(async move {
            if origin.scheme() == Scheme::Https {
                return Err(ClientError::socket(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "TcpConnector does not negotiate TLS",
                )));
            }

            let addr = (origin.host(), origin.port());
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| ClientError::ConnectTimeout(self.connect_timeout.as_millis() as u64))?
                .map_err(ClientError::socket)?;

            if self.nodelay {
                stream.set_nodelay(true).map_err(ClientError::socket)?;
            }

            tracing::debug!(origin = %origin, peer = ?stream.peer_addr().ok(), "TCP connection established");
            Ok(Box::new(stream) as BoxedTransport)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let connector = TcpConnector::default();
        let origin = Origin::http("127.0.0.1", port);
        assert!(connector.connect(&origin).await.is_ok());
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn refused_connection_is_a_socket_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpConnector::default()
            .connect(&Origin::http("127.0.0.1", port))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "ERR_SOCKET");
    }

    #[tokio::test]
    async fn https_needs_another_connector() {
        let origin: Origin = "https://127.0.0.1:1".parse().unwrap();
        assert!(TcpConnector::default().connect(&origin).await.is_err());
    }
}
