//! Transport to the durable store.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use navalha_access::DeviceContext;
use navalha_caixa::SessionSnapshot;
use navalha_core::LedgerError;

use crate::types::CaixaCommand;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transient transport failure; the command stays queued and retries.
    #[error("network error: {0}")]
    Network(String),

    /// A concurrent durable write won a uniqueness/version race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Deterministic rejection by the durable store.
    #[error("rejected: {0}")]
    Rejected(LedgerError),

    #[error("parse error: {0}")]
    Parse(String),
}

impl RemoteError {
    /// Transient errors are absorbed by the queue; everything else is a
    /// final answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }

    /// Map into the caller-facing taxonomy.
    pub fn into_ledger_error(self) -> LedgerError {
        match self {
            RemoteError::Network(msg) => LedgerError::network(msg),
            RemoteError::Conflict(msg) => LedgerError::sync_conflict(msg),
            RemoteError::Rejected(err) => err,
            RemoteError::Parse(msg) => LedgerError::network(format!("malformed response: {msg}")),
        }
    }
}

/// Async transport to the durable ledger.
///
/// Implementations must be idempotent over each command's idempotency key;
/// the flush loop re-sends commands whose ack was lost.
#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Apply one command to the durable store.
    async fn execute(
        &self,
        command: &CaixaCommand,
        device: &DeviceContext,
    ) -> Result<(), RemoteError>;

    /// Snapshot of the currently open session, if any.
    async fn fetch_current(&self) -> Result<Option<SessionSnapshot>, RemoteError>;
}

/// HTTP transport against the hosted ledger API.
#[derive(Debug)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    max_retries: u32,
}

#[derive(Serialize)]
struct CommandRequest<'a> {
    command: &'a CaixaCommand,
    device: &'a DeviceContext,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: None,
            max_retries: 3,
        }
    }

    pub fn with_token(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::new(base_url)
        }
    }

    fn endpoint(command: &CaixaCommand) -> &'static str {
        match command {
            CaixaCommand::Open { .. } => "/caixa/sessions/open",
            CaixaCommand::Close { .. } => "/caixa/sessions/close",
            CaixaCommand::RecordMovement { .. } => "/caixa/movements",
            CaixaCommand::RecordExpense { .. } => "/caixa/expenses",
        }
    }
}

#[async_trait]
impl RemoteLedger for HttpRemote {
    async fn execute(
        &self,
        command: &CaixaCommand,
        device: &DeviceContext,
    ) -> Result<(), RemoteError> {
        let url = format!("{}{}", self.base_url, Self::endpoint(command));
        let body = CommandRequest { command, device };

        let mut delay = Duration::from_secs(1);
        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            let mut req = self.client.post(&url).json(&body);
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    if status == reqwest::StatusCode::CONFLICT {
                        let text = resp.text().await.unwrap_or_default();
                        return Err(RemoteError::Conflict(text));
                    }
                    if status.is_client_error() {
                        // Deterministic rejection; typed body when the
                        // server provides one.
                        return match resp.json::<LedgerError>().await {
                            Ok(err) => Err(RemoteError::Rejected(err)),
                            Err(e) => Err(RemoteError::Parse(format!("{status}: {e}"))),
                        };
                    }
                    last_err = format!("server error {status}");
                }
                Err(e) => {
                    last_err = e.to_string();
                }
            }

            if attempt < self.max_retries {
                tracing::warn!(
                    url = %url,
                    attempt,
                    error = %last_err,
                    "transport attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(60));
            }
        }

        Err(RemoteError::Network(last_err))
    }

    async fn fetch_current(&self) -> Result<Option<SessionSnapshot>, RemoteError> {
        let url = format!("{}/caixa/sessions/current", self.base_url);

        let mut req = self.client.get(&url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NO_CONTENT || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_success() {
            return resp
                .json::<SessionSnapshot>()
                .await
                .map(Some)
                .map_err(|e| RemoteError::Parse(e.to_string()));
        }

        Err(RemoteError::Network(format!("unexpected status {status}")))
    }
}
