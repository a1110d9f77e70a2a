//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Serve HTTP/1.1 and HTTP/2 connections with hyper
//! - Enforce the listener-level read/write/idle timeouts and header limit
//! - Attach the peer address to every request
//! - Wire up middleware (tracing, response timeout)
//! - Drain open connections on shutdown
//!
//! # Design Decisions
//! - Read timeout bounds the request head (together with idle) and each
//!   wait for request body data
//! - Write timeout bounds the time until the response head is ready;
//!   exceeding it answers 504 since the upstream is what stalled
//! - Draining is bounded; connections still open afterwards are dropped

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
    service::TowerToHyperService,
};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tower::{util::BoxCloneSyncService, Layer, ServiceExt};
use tower_http::{
    timeout::{TimeoutBody, TimeoutLayer},
    trace::TraceLayer,
};

use crate::config::{validation::MIN_HEADER_BYTES, ServerConfig};
use crate::lifecycle::ShutdownSignal;
use crate::net::{ConnectionTracker, Listener};
use crate::routing::GatewayRouter;

/// How long shutdown waits for open connections.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type AppService = BoxCloneSyncService<Request<Body>, Response, Infallible>;

/// HTTP server for the gateway.
pub struct HttpServer {
    config: ServerConfig,
    router: GatewayRouter,
}

impl HttpServer {
    pub fn new(config: ServerConfig, router: GatewayRouter) -> Self {
        Self { config, router }
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The router wrapped in the server-wide middleware.
    fn app(&self) -> AppService {
        let timed = TimeoutLayer::with_status_code(StatusCode::GATEWAY_TIMEOUT, self.config.write_timeout)
            .layer(self.router.clone());
        BoxCloneSyncService::new(
            TraceLayer::new_for_http()
                .layer(timed)
                .map_response(IntoResponse::into_response),
        )
    }

    fn connection_builder(&self) -> auto::Builder<TokioExecutor> {
        let header_limit = self.config.max_header_bytes.max(MIN_HEADER_BYTES);

        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.config.read_timeout.min(self.config.idle_timeout))
            .max_buf_size(header_limit);
        builder
            .http2()
            .timer(TokioTimer::new())
            .max_header_list_size(u32::try_from(header_limit).unwrap_or(u32::MAX));
        builder
    }

    /// Run the server until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.router.routes().len(),
            "HTTP server starting"
        );

        let app = self.app();
        let builder = self.connection_builder();
        let tracker = ConnectionTracker::new();
        let (drain_tx, drain_rx) = watch::channel(false);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.spawn_connection(stream, peer, &app, &builder, &tracker, drain_rx.clone());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = shutdown.recv() => break,
            }
        }

        drop(listener);
        tracing::info!(open_connections = tracker.active_count(), "Shutting down");
        let _ = drain_tx.send(true);

        if tokio::time::timeout(DRAIN_TIMEOUT, tracker.drained()).await.is_err() {
            tracing::warn!(
                open_connections = tracker.active_count(),
                "Drain timeout elapsed, dropping connections"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        app: &AppService,
        builder: &auto::Builder<TokioExecutor>,
        tracker: &ConnectionTracker,
        mut drain: watch::Receiver<bool>,
    ) {
        let read_timeout = self.config.read_timeout;
        let service = app.clone().map_request(move |request: Request<Incoming>| {
            let mut request =
                request.map(|body| Body::new(TimeoutBody::new(read_timeout, body)));
            request.extensions_mut().insert(ConnectInfo(peer));
            request
        });
        let service = TowerToHyperService::new(service);
        let builder = builder.clone();
        let guard = tracker.track();

        tokio::spawn(async move {
            let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = drain.changed() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };

            if let Err(e) = result {
                tracing::debug!(
                    connection_id = %guard.id(),
                    peer_addr = %peer,
                    error = %e,
                    "Connection ended with error"
                );
            }
            drop(guard);
        });
    }
}
