//! Client: the public entry point.
//!
//! # Responsibilities
//! - Validate requests before any network activity
//! - Route requests to connections, opening new ones on demand
//! - Act on connection exits: notifications, requeue or fail
//! - Graceful close and destroy
//!
//! # Design Decisions
//! - Connection tasks hold a `Weak` reference to the client, so dropping
//!   the last `Client` destroys every connection
//! - Requeue only ever sees requests that never reached the wire
//! - A request handed back by a clean close is redispatched immediately and
//!   does not count as an attempt

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot};

use crate::config::validation::validate_config;
use crate::config::{ClientConfig, ConfigError};
use crate::dispatch::events::{
    CloseReason, ClosedEvent, ConnectEvent, ConnectionErrorEvent, DisconnectEvent, Events, Subscription,
};
use crate::dispatch::routing::{Checkout, ConnectionHandle, RoutingTable};
use crate::error::ClientError;
use crate::http::request::{validate, Request};
use crate::http::response::{PendingResponse, Response};
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
use crate::net::connector::{Connector, TcpConnector};
use crate::net::origin::Origin;
use crate::observability::metrics;
use crate::parser::{H1Tokenizer, ResponseTokenizer};
use crate::pipeline::{Command, ConnectionDriver, DriverExit, Exchange, ExitReason};
use crate::resilience::retries::{RetryDecision, RetryPolicy};

/// Builds the tokenizer for each new connection.
pub type TokenizerFactory = Arc<dyn Fn(&ClientConfig) -> Box<dyn ResponseTokenizer> + Send + Sync>;

/// Builder for [`Client`].
pub struct ClientBuilder {
    origin: Option<Origin>,
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    tokenizer: Option<TokenizerFactory>,
}

impl ClientBuilder {
    fn new() -> Self {
        Self {
            origin: None,
            config: ClientConfig::default(),
            connector: None,
            tokenizer: None,
        }
    }

    /// Origin for requests that do not name one.
    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default plain TCP connector.
    pub fn connector<C: Connector>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Replace the default httparse-based tokenizer.
    pub fn tokenizer<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ClientConfig) -> Box<dyn ResponseTokenizer> + Send + Sync + 'static,
    {
        self.tokenizer = Some(Arc::new(factory));
        self
    }

    pub fn build(self) -> Result<Client, ConfigError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;
        Ok(self.finish())
    }

    fn finish(self) -> Client {
        metrics::set_enabled(self.config.observability.metrics_enabled);

        let config = Arc::new(self.config);
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(TcpConnector::new(config.connect_timeout()).nodelay(true)) as Arc<dyn Connector>
        });
        let tokenizer = self
            .tokenizer
            .unwrap_or_else(|| Arc::new(default_tokenizer) as TokenizerFactory);

        tracing::debug!(
            origin = ?self.origin.as_ref().map(|o| o.to_string()),
            pipelining = config.pipelining,
            connections_per_origin = config.connections_per_origin,
            "Client built"
        );

        Client {
            inner: Arc::new(ClientInner {
                default_origin: self.origin,
                routing: RoutingTable::new(config.connections_per_origin, config.pipelining),
                retry: RetryPolicy::from_config(&config.retry),
                config,
                connector,
                tokenizer,
                events: Events::new(),
                shutdown: Shutdown::new(),
                tracker: ConnectionTracker::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

fn default_tokenizer(config: &ClientConfig) -> Box<dyn ResponseTokenizer> {
    Box::new(H1Tokenizer::new(config.max_header_size))
}

/// HTTP/1.1 client with persistent, optionally pipelined connections.
///
/// Cheap to clone; clones share connections. Must be used from within a
/// Tokio runtime.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    default_origin: Option<Origin>,
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    tokenizer: TokenizerFactory,
    routing: RoutingTable,
    events: Events,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    closed: AtomicBool,
    retry: RetryPolicy,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client for `origin` with the default configuration.
    pub fn new(origin: Origin) -> Self {
        Self::builder().origin(origin).finish()
    }

    /// Queue a request.
    ///
    /// Shape errors are returned here, before any connection is touched.
    /// Everything later arrives through the returned [`PendingResponse`].
    pub fn submit(&self, request: Request) -> Result<PendingResponse, ClientError> {
        let inner = &self.inner;
        if inner.shutdown.is_triggered() {
            return Err(ClientError::ClientDestroyed);
        }
        if inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ClientClosed);
        }

        let origin = request
            .origin
            .clone()
            .or_else(|| inner.default_origin.clone())
            .ok_or_else(|| ClientError::InvalidRequest("request has no origin".into()))?;

        let request = validate(request).inspect_err(|err| {
            metrics::record_request_failure(err.code());
            tracing::debug!(code = err.code(), error = %err, "Request rejected");
        })?;

        let (tx, rx) = oneshot::channel();
        let pending = PendingResponse::new(request.id, rx);
        inner.dispatch(Exchange::new(request, origin, tx));
        Ok(pending)
    }

    /// Submit a request and wait for its response head.
    pub async fn request(&self, request: Request) -> Result<Response, ClientError> {
        self.submit(request)?.await
    }

    /// Listen for connection lifecycle notifications.
    pub fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    /// Stop accepting requests, let every connection finish what was
    /// submitted, and wait for them to close.
    pub async fn close(&self) {
        let inner = &self.inner;
        if !inner.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Client closing");
            for handle in inner.routing.handles() {
                let _ = handle.tx.send(Command::Close);
            }
        }
        inner.tracker.wait_idle().await;
    }

    /// Fail everything queued or in flight with `ERR_CLIENT_DESTROYED` and
    /// close every connection.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        if !inner.shutdown.is_triggered() {
            tracing::info!("Client destroyed");
        }
        inner.shutdown.trigger();
        inner.tracker.wait_idle().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.shutdown.is_triggered()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open connections to `origin`.
    pub fn connection_count(&self, origin: &Origin) -> usize {
        self.inner.routing.connection_count(origin)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("origin", &self.inner.default_origin)
            .field("closed", &self.is_closed())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl ClientInner {
    /// Hand an exchange to a connection for its origin.
    fn dispatch(self: &Arc<Self>, exchange: Exchange) {
        let mut exchange = Box::new(exchange);
        loop {
            let origin = exchange.origin.clone();
            let (handle, created) = match self.routing.checkout(&origin, &self.tracker) {
                Checkout::Existing(handle) => (handle, None),
                Checkout::Created { handle, rx, guard } => (handle, Some((rx, guard))),
            };

            handle.load.acquire();
            let sent = handle.tx.send(Command::Dispatch(exchange));
            // queue first, so the task never starts with an empty channel
            if let Some((rx, guard)) = created {
                tokio::spawn(run_connection(
                    Arc::downgrade(self),
                    origin.clone(),
                    handle.clone(),
                    rx,
                    guard,
                ));
            }
            match sent {
                Ok(()) => {
                    // a connection opened after close() must close too
                    if self.closed.load(Ordering::SeqCst) {
                        let _ = handle.tx.send(Command::Close);
                    }
                    return;
                }
                Err(mpsc::error::SendError(cmd)) => {
                    handle.load.release();
                    self.routing.remove(&origin, handle.id);
                    match cmd {
                        Command::Dispatch(returned) => exchange = returned,
                        Command::Close => return,
                    }
                }
            }
        }
    }

    /// Decide the fate of a request a connection handed back.
    fn requeue(self: &Arc<Self>, mut exchange: Exchange, failure: Option<&ClientError>) {
        if self.shutdown.is_triggered() {
            exchange.fail(ClientError::ClientDestroyed);
            return;
        }
        if exchange.is_abandoned() {
            return;
        }

        let Some(err) = failure else {
            self.dispatch(exchange);
            return;
        };

        exchange.attempts += 1;
        match self.retry.decide(exchange.attempts, exchange.request.idempotent) {
            RetryDecision::Retry(delay) => {
                metrics::record_requeue();
                tracing::debug!(
                    request_id = %exchange.request.id,
                    attempt = exchange.attempts,
                    delay_ms = delay.as_millis() as u64,
                    cause = err.code(),
                    "Requeueing request"
                );

                // keeps close() and destroy() waiting for the redispatch
                let guard = self.tracker.track();
                let mut shutdown = self.shutdown.subscribe();
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let _guard = guard;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => inner.requeue(exchange, None),
                        _ = shutdown.recv() => exchange.fail(ClientError::ClientDestroyed),
                    }
                });
            }
            RetryDecision::GiveUp => {
                tracing::debug!(
                    request_id = %exchange.request.id,
                    attempts = exchange.attempts,
                    code = err.code(),
                    "Request not requeued"
                );
                metrics::record_request_failure(err.code());
                exchange.fail(err.clone());
            }
        }
    }

    /// Bookkeeping after a connection task finished.
    fn on_connection_exit(self: &Arc<Self>, origin: &Origin, connection: ConnectionId, exit: DriverExit) {
        self.routing.remove(origin, connection);
        let DriverExit { reason, unsent } = exit;

        match reason {
            ExitReason::Closed(reason) => {
                tracing::debug!(
                    connection_id = %connection,
                    origin = %origin,
                    reason = reason.as_str(),
                    requeued = unsent.len(),
                    "Connection closed"
                );
                metrics::record_connection_closed(reason.as_str());
                self.events.closed(ClosedEvent {
                    origin: origin.clone(),
                    connection,
                    reason,
                });
                for exchange in unsent {
                    self.requeue(exchange, None);
                }
            }
            ExitReason::Violation(err) => {
                metrics::record_disconnect(err.code());
                self.events.disconnect(DisconnectEvent {
                    origin: origin.clone(),
                    connection,
                    error: err.clone(),
                });
                for exchange in unsent {
                    self.requeue(exchange, Some(&err));
                }
            }
            ExitReason::Destroyed => {
                metrics::record_connection_closed(CloseReason::Destroyed.as_str());
                self.events.closed(ClosedEvent {
                    origin: origin.clone(),
                    connection,
                    reason: CloseReason::Destroyed,
                });
                for exchange in unsent {
                    exchange.fail(ClientError::ClientDestroyed);
                }
            }
        }
    }
}

/// Fail everything still sitting in a connection's command queue.
fn fail_queued(handle: &ConnectionHandle, commands: &mut mpsc::UnboundedReceiver<Command>, err: &ClientError) {
    commands.close();
    while let Ok(cmd) = commands.try_recv() {
        if let Command::Dispatch(exchange) = cmd {
            handle.load.release();
            metrics::record_request_failure(err.code());
            exchange.fail(err.clone());
        }
    }
}

async fn run_connection(
    client: Weak<ClientInner>,
    origin: Origin,
    handle: ConnectionHandle,
    mut commands: mpsc::UnboundedReceiver<Command>,
    guard: ConnectionGuard,
) {
    let _guard = guard;
    let Some(inner) = client.upgrade() else {
        fail_queued(&handle, &mut commands, &ClientError::ClientDestroyed);
        return;
    };

    // subscribe before checking the flag so a concurrent destroy is seen
    let mut shutdown = inner.shutdown.subscribe();
    if inner.shutdown.is_triggered() {
        fail_queued(&handle, &mut commands, &ClientError::ClientDestroyed);
        inner.routing.remove(&origin, handle.id);
        return;
    }

    let config = Arc::clone(&inner.config);
    let connector = Arc::clone(&inner.connector);
    let tokenizer = (inner.tokenizer)(&config);
    drop(inner);

    let connected = tokio::select! {
        res = connector.connect(&origin) => Some(res),
        _ = shutdown.recv() => None,
    };

    let transport = match connected {
        Some(Ok(transport)) => transport,
        Some(Err(err)) => {
            tracing::warn!(
                connection_id = %handle.id,
                origin = %origin,
                code = err.code(),
                error = %err,
                "Connect failed"
            );
            metrics::record_connect_error(err.code());
            fail_queued(&handle, &mut commands, &err);
            if let Some(inner) = client.upgrade() {
                inner.routing.remove(&origin, handle.id);
                inner.events.connection_error(ConnectionErrorEvent {
                    origin: origin.clone(),
                    connection: handle.id,
                    error: err,
                });
            }
            return;
        }
        None => {
            fail_queued(&handle, &mut commands, &ClientError::ClientDestroyed);
            if let Some(inner) = client.upgrade() {
                inner.routing.remove(&origin, handle.id);
            }
            return;
        }
    };

    tracing::debug!(connection_id = %handle.id, origin = %origin, "Connected");
    metrics::record_connection_opened();
    if let Some(inner) = client.upgrade() {
        inner.events.connect(ConnectEvent {
            origin: origin.clone(),
            connection: handle.id,
        });
    }

    let driver = ConnectionDriver::new(
        handle.id,
        origin.clone(),
        transport,
        tokenizer,
        commands,
        Arc::clone(&handle.load),
        shutdown,
        &config,
    );
    let exit = driver.run().await;

    match client.upgrade() {
        Some(inner) => inner.on_connection_exit(&origin, handle.id, exit),
        None => {
            for exchange in exit.unsent {
                exchange.fail(ClientError::ClientDestroyed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::future::BoxFuture;

    use crate::net::connector::BoxedTransport;

    /// Connector that always fails.
    struct Refusing;

    impl Connector for Refusing {
        fn connect<'a>(&'a self, _origin: &'a Origin) -> BoxFuture<'a, Result<BoxedTransport, ClientError>> {
            Box::pin(async {
                let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
                Err::<BoxedTransport, _>(ClientError::socket(err))
            })
        }
    }

    /// Connector that never completes.
    struct Hanging;

    impl Connector for Hanging {
        fn connect<'a>(&'a self, _origin: &'a Origin) -> BoxFuture<'a, Result<BoxedTransport, ClientError>> {
            Box::pin(std::future::pending::<Result<BoxedTransport, ClientError>>())
        }
    }

    fn origin() -> Origin {
        Origin::http("example.test", 80)
    }

    #[tokio::test]
    async fn invalid_requests_fail_at_submit() {
        let client = Client::builder().origin(origin()).connector(Hanging).build().unwrap();

        let err = client
            .submit(Request::put("/").header("content-length", 10).body("asd"))
            .unwrap_err();
        assert_eq!(err.code(), "ERR_REQUEST_CONTENT_LENGTH_MISMATCH");
        assert_eq!(client.connection_count(&origin()), 0);
    }

    #[tokio::test]
    async fn request_without_origin_is_rejected() {
        let client = Client::builder().connector(Hanging).build().unwrap();
        let err = client.submit(Request::get("/")).unwrap_err();
        assert_eq!(err.code(), "ERR_INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn connect_failure_fails_queued_requests() {
        let client = Client::builder().origin(origin()).connector(Refusing).build().unwrap();
        let mut events = client.subscribe();

        let err = client.request(Request::get("/")).await.unwrap_err();
        assert_eq!(err.code(), "ERR_SOCKET");

        let event = tokio::time::timeout(Duration::from_secs(1), events.connection_error.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.error.code(), "ERR_SOCKET");
        assert!(events.try_disconnect().is_none());
    }

    #[tokio::test]
    async fn destroy_fails_pending_requests() {
        let client = Client::builder().origin(origin()).connector(Hanging).build().unwrap();
        let pending = client.submit(Request::get("/")).unwrap();

        client.destroy().await;
        assert_eq!(pending.await.unwrap_err().code(), "ERR_CLIENT_DESTROYED");
        assert_eq!(client.submit(Request::get("/")).unwrap_err().code(), "ERR_CLIENT_DESTROYED");
        assert_eq!(client.connection_count(&origin()), 0);
    }

    #[tokio::test]
    async fn close_rejects_new_requests() {
        let client = Client::builder().origin(origin()).connector(Refusing).build().unwrap();
        client.close().await;
        assert!(client.is_closed());
        assert_eq!(client.submit(Request::get("/")).unwrap_err().code(), "ERR_CLIENT_CLOSED");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ClientConfig {
            connections_per_origin: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(
            Client::builder().config(config).build(),
            Err(ConfigError::Validation(_))
        ));
    }
}
