use std::sync::Arc;

use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;

/// Errors emitted by the relay.
///
/// Only [`RelayError::Config`] is fatal at startup; every other variant is isolated to the
/// single RPC call, log, or queue job it affects.
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    /// Required configuration is missing or invalid. The process should not proceed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The underlying RPC transport returned an error.
    #[error("RPC error: {0}")]
    Rpc(Arc<RpcError<TransportErrorKind>>),

    /// A timeout elapsed while waiting for an RPC response.
    #[error("operation timed out")]
    Timeout,

    /// The log subscription ended (for example, the underlying WebSocket closed).
    #[error("log subscription closed")]
    SubscriptionClosed,

    /// A log could not be decoded against its configured event descriptor.
    ///
    /// Affects only the offending log; scanning and subscribing continue.
    #[error("failed to decode `{event}` log: {reason}")]
    Decode { event: String, reason: String },

    /// The work queue no longer accepts jobs.
    ///
    /// The checkpoint is not advanced for the affected event, so the next
    /// checkpoint-bounded backfill re-attempts it.
    #[error("work queue is closed")]
    QueueClosed,

    /// The downstream consumer answered with a non-2xx status.
    #[error("downstream returned status {status}")]
    RelayRejected { status: u16 },

    /// The downstream request failed at the transport level.
    #[error("downstream request failed: {0}")]
    Http(Arc<reqwest::Error>),
}

impl From<RpcError<TransportErrorKind>> for RelayError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        RelayError::Rpc(Arc::new(error))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(error: reqwest::Error) -> Self {
        RelayError::Http(Arc::new(error))
    }
}
