//! Wiring and lifecycle.
//!
//! [`EventRelay`] is the explicit context object owning every moving part: the chain
//! client, the validated contract bindings, the work queue, the relay worker pool, and the
//! live subscriber task. It replaces a process-global resource bundle; construct one per
//! contract set and keep it for the life of the process.
//!
//! Startup ordering is deliberate: the backfill over `[checkpoint + 1, current_height]` is
//! awaited and the checkpoint advanced *before* the live subscriber starts, so the live
//! path cannot enqueue blocks the backfill has not reached and the backfilled range is not
//! re-processed. Blocks mined between the height read and the first subscription delivery
//! are recovered by the subscriber's reconnect catch-up and, across restarts, by the next
//! checkpoint-bounded backfill.

use std::{ops::RangeInclusive, sync::Arc};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    backfill::BackfillScanner,
    checkpoint::CheckpointStore,
    config::{ContractBindings, RelayConfig},
    error::RelayError,
    provider::ChainClient,
    queue::{RelayQueue, RetryPolicy},
    relay::RelayWorkerPool,
    subscriber::LiveSubscriber,
};

/// The relay's resource bundle: everything needed to recover, stream, and deliver events.
pub struct EventRelay {
    config: RelayConfig,
    bindings: ContractBindings,
    client: ChainClient,
    queue: Arc<RelayQueue>,
    checkpoint: CheckpointStore,
    workers: Option<RelayWorkerPool>,
    subscriber: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    started: bool,
}

impl EventRelay {
    /// Validates the configuration and connects to the node endpoint.
    ///
    /// # Errors
    ///
    /// * [`RelayError::Config`] if the configuration is invalid — fatal, do not proceed.
    /// * [`RelayError::Rpc`] if the node connection cannot be established.
    pub async fn connect(config: RelayConfig) -> Result<Self, RelayError> {
        let bindings = config.validate()?;
        let client = ChainClient::connect(&config.node_url).await?;
        Ok(Self::assemble(config, bindings, client))
    }

    /// Like [`connect`](Self::connect), but wraps an already-built client.
    ///
    /// Useful for tests and for callers that tune [`ChainClient`] retry settings.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the configuration is invalid.
    pub fn with_client(config: RelayConfig, client: ChainClient) -> Result<Self, RelayError> {
        let bindings = config.validate()?;
        Ok(Self::assemble(config, bindings, client))
    }

    fn assemble(config: RelayConfig, bindings: ContractBindings, client: ChainClient) -> Self {
        let queue = RelayQueue::new(
            RetryPolicy { max_attempts: config.max_attempts, base_delay: config.base_backoff },
            config.completed_retention,
        );
        let checkpoint = CheckpointStore::new(&config.checkpoint_path);
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            bindings,
            client,
            queue,
            checkpoint,
            workers: None,
            subscriber: None,
            shutdown,
            started: false,
        }
    }

    /// Starts the relay. Idempotent: a second call is a no-op.
    ///
    /// Sequence: start the worker pool (so backfilled jobs drain as they arrive), run the
    /// checkpoint-bounded backfill to completion, advance the checkpoint, then spawn the
    /// live subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the current chain height cannot be read; already-started
    /// workers keep draining and the call may be retried.
    pub async fn start(&mut self) -> Result<(), RelayError> {
        if self.started {
            info!("event relay already started");
            return Ok(());
        }

        if self.workers.is_none() {
            self.workers = Some(RelayWorkerPool::start(
                Arc::clone(&self.queue),
                reqwest::Client::new(),
                self.bindings.downstream_url.clone(),
                self.config.worker_concurrency,
            ));
        }

        self.catch_up().await?;

        let subscriber = LiveSubscriber::new(
            self.client.clone(),
            self.config.contract_address,
            Arc::new(self.bindings.descriptors.clone()),
            Arc::clone(&self.queue),
            self.checkpoint.clone(),
            self.backfill_scanner(),
            self.config.reconnect_delay,
        );
        self.subscriber = Some(tokio::spawn(subscriber.run(self.shutdown.subscribe())));

        self.started = true;
        info!(
            contract = %self.config.contract_address,
            events = self.bindings.descriptors.len(),
            workers = self.config.worker_concurrency,
            "event relay started"
        );
        Ok(())
    }

    /// Runs one checkpoint-bounded backfill pass.
    ///
    /// Returns the scanned range, or `None` when the checkpoint already matches the
    /// current height and backfill is skipped entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if the current chain height cannot be read.
    pub async fn catch_up(&self) -> Result<Option<RangeInclusive<u64>>, RelayError> {
        let checkpoint = self.checkpoint.read();
        let latest = self.client.get_block_number().await?;

        if checkpoint >= latest {
            info!(checkpoint, latest, "checkpoint is current, skipping backfill");
            return Ok(None);
        }

        let from = checkpoint + 1;
        let enqueued = self.backfill_scanner().scan(from, latest).await;
        info!(from, to = latest, enqueued, "startup backfill finished");

        // A missed write only means the next restart re-backfills an already-relayed
        // range; at-least-once delivery is preserved either way.
        if let Err(error) = self.checkpoint.write(latest) {
            warn!(error = %error, "failed to persist checkpoint after backfill");
        }

        Ok(Some(from..=latest))
    }

    fn backfill_scanner(&self) -> BackfillScanner {
        BackfillScanner::new(
            self.client.clone(),
            self.config.contract_address,
            Arc::new(self.bindings.descriptors.clone()),
            self.config.max_block_range,
            Arc::clone(&self.queue),
        )
    }

    /// The shared work queue, for inspection (failure set, pending depth).
    #[must_use]
    pub fn queue(&self) -> &Arc<RelayQueue> {
        &self.queue
    }

    /// The checkpoint store backing this relay.
    #[must_use]
    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Stops the live subscriber, closes the queue, and waits for the workers to drain.
    ///
    /// In-flight relay attempts run to their own completion or retry exhaustion; nothing
    /// is forcibly aborted. After shutdown, construct a fresh [`EventRelay`] to restart.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(subscriber) = self.subscriber.take() {
            if let Err(error) = subscriber.await {
                warn!(error = %error, "live subscriber did not shut down cleanly");
            }
        }

        self.queue.close();
        if let Some(workers) = self.workers.take() {
            workers.join().await;
        }

        info!("event relay stopped");
    }
}
