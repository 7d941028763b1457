//! Static, validated relay configuration.
//!
//! Event signatures are declared up front in human-readable Solidity form (for example
//! `"Transfer(address indexed from, address indexed to, uint256 value)"`) and parsed into
//! typed [`EventDescriptor`]s during [`RelayConfig::validate`]. Nothing is discovered from
//! a contract ABI at runtime.

use std::{path::PathBuf, time::Duration};

use alloy::{
    json_abi::Event,
    primitives::{Address, B256},
};
use url::Url;

use crate::error::RelayError;

/// Default number of concurrent relay workers.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 5;
/// Default delivery attempt cap per queue job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay for the queue's exponential backoff.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);
/// Default number of completed job ids retained before pruning.
pub const DEFAULT_COMPLETED_RETENTION: usize = 500;
/// Default maximum number of blocks queried per `eth_getLogs` call.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 1000;
/// Default delay before re-establishing a dropped log subscription.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A configured contract event, validated at startup.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    /// Event name as it appears in the signature (e.g. `Transfer`).
    pub name: String,
    /// Parsed ABI event used to decode raw logs.
    pub event: Event,
    /// `keccak256` of the canonical signature; the log's topic0.
    pub topic0: B256,
}

impl EventDescriptor {
    /// Parses a human-readable Solidity event signature.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the signature is not a valid event declaration.
    pub fn parse(signature: &str) -> Result<Self, RelayError> {
        let event = Event::parse(signature).map_err(|e| {
            RelayError::Config(format!("invalid event signature `{signature}`: {e}"))
        })?;
        let topic0 = event.selector();
        Ok(Self { name: event.name.clone(), event, topic0 })
    }
}

/// Everything the relay needs to run.
///
/// Construct with [`RelayConfig::new`], adjust with the `with_*` setters, then hand to
/// [`EventRelay::connect`](crate::EventRelay::connect) which calls [`validate`](Self::validate).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// WebSocket (or IPC) endpoint of the chain node.
    pub node_url: String,
    /// Address of the contract whose events are relayed.
    pub contract_address: Address,
    /// Human-readable event signatures of interest.
    pub event_signatures: Vec<String>,
    /// Base URL of the downstream consumer.
    pub downstream_base_url: String,
    /// Maximum number of concurrent relay workers.
    pub worker_concurrency: usize,
    /// Delivery attempt cap per queue job.
    pub max_attempts: u32,
    /// Base delay for the queue's exponential backoff.
    pub base_backoff: Duration,
    /// Completed job ids retained before pruning.
    pub completed_retention: usize,
    /// Maximum number of blocks per historical `eth_getLogs` query.
    pub max_block_range: u64,
    /// Delay before re-establishing a dropped log subscription.
    pub reconnect_delay: Duration,
    /// Path of the checkpoint record.
    pub checkpoint_path: PathBuf,
}

/// Output of [`RelayConfig::validate`]: the parsed pieces the relay binds to at runtime.
#[derive(Debug, Clone)]
pub struct ContractBindings {
    pub descriptors: Vec<EventDescriptor>,
    pub downstream_url: Url,
}

impl RelayConfig {
    #[must_use]
    pub fn new(
        node_url: impl Into<String>,
        contract_address: Address,
        event_signatures: Vec<String>,
        downstream_base_url: impl Into<String>,
        checkpoint_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            node_url: node_url.into(),
            contract_address,
            event_signatures,
            downstream_base_url: downstream_base_url.into(),
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            completed_retention: DEFAULT_COMPLETED_RETENTION,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            checkpoint_path: checkpoint_path.into(),
        }
    }

    #[must_use]
    pub fn with_worker_concurrency(mut self, concurrency: usize) -> Self {
        self.worker_concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    #[must_use]
    pub fn with_completed_retention(mut self, retention: usize) -> Self {
        self.completed_retention = retention;
        self
    }

    #[must_use]
    pub fn with_max_block_range(mut self, max_block_range: u64) -> Self {
        self.max_block_range = max_block_range;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Validates the configuration and parses the typed bindings.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if:
    /// * the node endpoint is empty
    /// * no event signatures are configured, or any signature is unparsable
    /// * the downstream base URL is not a valid URL
    /// * the worker concurrency, attempt cap, or max block range is zero
    pub fn validate(&self) -> Result<ContractBindings, RelayError> {
        if self.node_url.trim().is_empty() {
            return Err(RelayError::Config("node endpoint must not be empty".into()));
        }
        if self.event_signatures.is_empty() {
            return Err(RelayError::Config("at least one event signature is required".into()));
        }
        if self.worker_concurrency == 0 {
            return Err(RelayError::Config("worker concurrency must be greater than 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(RelayError::Config("max attempts must be greater than 0".into()));
        }
        if self.max_block_range == 0 {
            return Err(RelayError::Config("max block range must be greater than 0".into()));
        }

        let downstream_url = Url::parse(&self.downstream_base_url).map_err(|e| {
            RelayError::Config(format!(
                "invalid downstream base URL `{}`: {e}",
                self.downstream_base_url
            ))
        })?;

        let descriptors = self
            .event_signatures
            .iter()
            .map(|signature| EventDescriptor::parse(signature))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ContractBindings { descriptors, downstream_url })
    }
}
