//! Retrying wrapper around an Alloy provider.
//!
//! Every RPC call the relay makes goes through [`ChainClient`], which adds a per-call
//! timeout and exponential backoff retries with structured retry logging. Transient node
//! hiccups are absorbed here; errors that survive the retry budget surface as
//! [`RelayError::Rpc`] or [`RelayError::Timeout`] and are handled per call site.

use std::{future::Future, time::Duration};

use alloy::{
    providers::{Provider, ProviderBuilder, RootProvider},
    pubsub::Subscription,
    rpc::types::{Filter, Log},
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use tokio::time::timeout;
use tracing::info;

use crate::error::RelayError;

/// Default total timeout for a single RPC call, retries included.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of retries per RPC call.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default minimum delay between RPC retries.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(500);

/// Provider wrapper with built-in retry and timeout mechanisms.
#[derive(Clone, Debug)]
pub struct ChainClient {
    provider: RootProvider,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
}

impl ChainClient {
    /// Wraps an existing provider with the default retry settings.
    #[must_use]
    pub fn new(provider: RootProvider) -> Self {
        Self {
            provider,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
        }
    }

    /// Connects to a node endpoint (`ws://`, `wss://`, or `http(s)://`).
    ///
    /// Live subscriptions require a pubsub-capable (WebSocket/IPC) endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Rpc`] if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let provider = ProviderBuilder::new().connect(url).await?;
        Ok(Self::new(provider.root().clone()))
    }

    /// Sets the total per-call timeout, retries included.
    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Sets the number of retries per RPC call.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the minimum delay between retries.
    #[must_use]
    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Fetch the latest block number with retry and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Rpc`] or [`RelayError::Timeout`] once the retry budget is spent.
    pub async fn get_block_number(&self) -> Result<u64, RelayError> {
        self.with_retry(|| async { self.provider.get_block_number().await }).await
    }

    /// Fetch logs for the given [`Filter`] with retry and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Rpc`] or [`RelayError::Timeout`] once the retry budget is spent.
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RelayError> {
        self.with_retry(|| async { self.provider.get_logs(filter).await }).await
    }

    /// Open a log subscription for the given [`Filter`] with retry and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Rpc`] if the endpoint does not support pubsub or the
    /// subscription cannot be established within the retry budget.
    pub async fn subscribe_logs(&self, filter: &Filter) -> Result<Subscription<Log>, RelayError> {
        self.with_retry(|| async { self.provider.subscribe_logs(filter).await }).await
    }

    async fn with_retry<T, F, Fut>(&self, operation: F) -> Result<T, RelayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.min_delay);

        timeout(
            self.call_timeout,
            operation
                .retry(retry_strategy)
                .notify(|err: &RpcError<TransportErrorKind>, dur: Duration| {
                    info!(error = %err, "RPC error, retrying after {:?}", dur);
                })
                .sleep(tokio::time::sleep),
        )
        .await
        .map_err(|_| RelayError::Timeout)?
        .map_err(RelayError::from)
    }
}

#[cfg(test)]
mod tests {
    use alloy::{providers::mock::Asserter, rpc::client::RpcClient};
    use serde_json::json;

    use super::*;

    fn mocked_client(asserter: Asserter) -> ChainClient {
        ChainClient::new(RootProvider::new(RpcClient::mocked(asserter)))
            .with_max_retries(0)
            .with_min_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn returns_block_number_from_provider() {
        let asserter = Asserter::new();
        asserter.push_success(&json!("0x64"));

        let client = mocked_client(asserter);

        assert_eq!(client.get_block_number().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn retries_before_surfacing_an_rpc_error() {
        let asserter = Asserter::new();
        asserter.push_failure_msg("transient");
        asserter.push_success(&json!("0x2a"));

        let client = ChainClient::new(RootProvider::new(RpcClient::mocked(asserter)))
            .with_max_retries(1)
            .with_min_delay(Duration::from_millis(1));

        assert_eq!(client.get_block_number().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_rpc_error() {
        let asserter = Asserter::new();
        asserter.push_failure_msg("down");

        let client = mocked_client(asserter);

        assert!(matches!(client.get_block_number().await, Err(RelayError::Rpc(_))));
    }
}
