//! TCP listener implementation.
//!
//! # Responsibilities
//! - Normalize and bind the configured address
//! - Accept incoming TCP connections
//! - Graceful handling of accept errors

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("invalid listen address '{0}'")]
    Address(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),
}

/// `":8080"` becomes `"0.0.0.0:8080"`; anything else is returned trimmed.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    }
}

/// A bound TCP listener.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Accept a new connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %addr, error = %e, "Cannot set TCP_NODELAY");
        }

        tracing::trace!(peer_addr = %addr, "Connection accepted");
        Ok((stream, addr))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl From<TcpListener> for Listener {
    fn from(inner: TcpListener) -> Self {
        Self { inner }
    }
}

/// Bind to `address` (host names are resolved).
pub async fn bind(address: &str) -> Result<Listener, ListenerError> {
    let address = normalize_address(address);
    if address.is_empty() {
        return Err(ListenerError::Address(address));
    }

    let inner = TcpListener::bind(address.as_str())
        .await
        .map_err(|source| ListenerError::Bind {
            address: address.clone(),
            source,
        })?;

    if let Ok(local_addr) = inner.local_addr() {
        tracing::info!(address = %local_addr, "Listener bound");
    }

    Ok(Listener { inner })
}
