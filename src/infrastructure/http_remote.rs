//! HTTP adapter for the sync backend.
//!
//! Wire contract: each queued operation is POSTed to `sync/operations` with
//! its id as `Idempotency-Key`, so resubmitting after a failed cycle is safe.
//! Each entity kind is pulled as a full JSON snapshot from `sync/{kind}`.

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::domain::{AppError, EntityKind, EntitySnapshot, PendingOperation, Result, SyncConfig};

/// Remote system the sync coordinator reconciles against.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Apply one queued operation on the server.
    async fn submit(&self, op: &PendingOperation) -> Result<()>;

    /// Fetch the current server state for `kind` as a full replacement.
    async fn pull(&self, kind: EntityKind) -> Result<EntitySnapshot>;
}

/// `RemoteBackend` over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base: Url,
}

impl HttpRemote {
    /// Build a client for `config.server_url`.
    ///
    /// # Errors
    /// Returns a config error if the URL is invalid or the client cannot be built.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let mut raw = config.server_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base = Url::parse(&raw).map_err(|e| AppError::Config {
            message: format!("Invalid server URL {}: {e}", config.server_url),
        })?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("agrisync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Config {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|e| AppError::Config {
            message: format!("Invalid endpoint {path}: {e}"),
        })
    }
}

#[async_trait]
impl RemoteBackend for HttpRemote {
    async fn submit(&self, op: &PendingOperation) -> Result<()> {
        let url = self.endpoint("sync/operations")?;

        self.client
            .post(url)
            .header("Idempotency-Key", op.id.to_string())
            .json(op)
            .send()
            .await
            .map_err(|e| AppError::sync(format!("submit {} #{}", op.mutation.label(), op.seq), e))?
            .error_for_status()
            .map_err(|e| {
                AppError::sync(format!("server rejected {} #{}", op.mutation.label(), op.seq), e)
            })?;

        Ok(())
    }

    async fn pull(&self, kind: EntityKind) -> Result<EntitySnapshot> {
        let url = self.endpoint(&format!("sync/{}", kind.key()))?;

        let value: serde_json::Value = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::sync(format!("pull {kind}"), e))?
            .error_for_status()
            .map_err(|e| AppError::sync(format!("server refused pull of {kind}"), e))?
            .json()
            .await
            .map_err(|e| AppError::sync(format!("decode {kind}"), e))?;

        EntitySnapshot::from_json(kind, value)
    }
}
