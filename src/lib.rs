//! Event-Relay streams EVM contract events to a downstream HTTP consumer with
//! at-least-once delivery.
//!
//! The main entry point is [`EventRelay`], constructed from a validated [`RelayConfig`]
//! via [`EventRelay::connect`]. Calling [`EventRelay::start`] recovers the historical gap
//! since the persisted checkpoint, then streams new events live; both paths feed one
//! durable [`RelayQueue`] drained by a bounded pool of relay workers.
//!
//! # Delivery guarantees
//!
//! Delivery is **at-least-once**: a job may be relayed more than once around retries,
//! reconnects, and restarts. The downstream consumer must be idempotent over
//! `(transactionHash, logIndex, eventName)`. There is no global total ordering across
//! events; ordering is guaranteed within a single backfill pass (by block number, then
//! log index) and enqueue order is preserved per live subscription.
//!
//! # Reorgs
//!
//! Logs flagged as removed by the node — retracted by a chain reorganization — are
//! dropped before they can reach the queue, on both the backfill and live paths.
//!
//! # Failure isolation
//!
//! Only a configuration error is fatal. An undecodable log, a failed range query, a
//! rejected enqueue, or a downstream failure affects exactly one log or job: queries for
//! other events continue, the checkpoint is not advanced past skipped work, and jobs that
//! exhaust their retry budget are parked in an inspectable failure set rather than
//! silently dropped.

pub mod backfill;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod normalizer;
pub mod provider;
pub mod queue;
pub mod relay;
pub mod subscriber;

pub use backfill::BackfillScanner;
pub use checkpoint::CheckpointStore;
pub use config::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BLOCK_RANGE, DEFAULT_WORKER_CONCURRENCY, EventDescriptor,
    RelayConfig,
};
pub use error::RelayError;
pub use lifecycle::EventRelay;
pub use normalizer::CanonicalEvent;
pub use provider::ChainClient;
pub use queue::{FailedJob, JobHandle, RelayJob, RelayQueue, RetryPolicy};
pub use relay::{RelayWorkerPool, event_path_segment};
pub use subscriber::LiveSubscriber;
