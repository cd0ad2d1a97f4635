//! Network reachability probing for the sync backend.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use url::Url;

use crate::domain::{AppError, Connectivity, Result};

/// Platform reachability signal, sampled on demand.
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn probe(&self) -> Connectivity;
}

/// Probes by opening a TCP connection to the backend host.
#[derive(Debug, Clone)]
pub struct TcpReachability {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpReachability {
    /// Build a probe for the host and port of `server_url`.
    ///
    /// # Errors
    /// Returns a config error if the URL has no host or known port.
    pub fn from_url(server_url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(server_url).map_err(|e| AppError::Config {
            message: format!("Invalid server URL {server_url}: {e}"),
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| AppError::Config {
                message: format!("Server URL has no host: {server_url}"),
            })?
            .to_string();
        let port = url.port_or_known_default().ok_or_else(|| AppError::Config {
            message: format!("Server URL has no port: {server_url}"),
        })?;

        Ok(Self {
            host,
            port,
            timeout,
        })
    }
}

#[async_trait]
impl Reachability for TcpReachability {
    async fn probe(&self) -> Connectivity {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => Connectivity::Online,
            Ok(Err(e)) => {
                tracing::debug!(host = %self.host, port = self.port, error = %e, "Backend unreachable");
                Connectivity::Offline
            }
            Err(_) => {
                tracing::debug!(host = %self.host, port = self.port, "Reachability probe timed out");
                Connectivity::Offline
            }
        }
    }
}

/// Fixed answer, for forcing offline mode.
#[derive(Debug, Clone, Copy)]
pub struct StaticReachability(pub Connectivity);

#[async_trait]
impl Reachability for StaticReachability {
    async fn probe(&self) -> Connectivity {
        self.0
    }
}
