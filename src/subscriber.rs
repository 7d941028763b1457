//! Live event subscription.
//!
//! One forwarder task per configured event pumps logs from a WebSocket subscription onto an
//! internal channel; a single consumer loop normalizes, enqueues, and advances the
//! checkpoint. Keeping a lone consumer makes backpressure and cancellation explicit and
//! serializes checkpoint writes.
//!
//! When the subscription drops, the supervisor waits out a reconnect delay, backfills
//! `[checkpoint + 1, latest]` to recover anything missed while disconnected, and
//! re-subscribes. Per-event failures (undecodable log, enqueue rejection) never terminate
//! the subscription.

use std::{sync::Arc, time::Duration};

use alloy::{
    primitives::Address,
    rpc::types::{Filter, Log},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::{
    backfill::BackfillScanner,
    checkpoint::CheckpointStore,
    config::EventDescriptor,
    error::RelayError,
    normalizer::normalize,
    provider::ChainClient,
    queue::RelayQueue,
};

/// Capacity of the internal channel between subscription forwarders and the consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Streams new logs for the configured events and feeds them into the work queue.
pub struct LiveSubscriber {
    client: ChainClient,
    contract: Address,
    descriptors: Arc<Vec<EventDescriptor>>,
    queue: Arc<RelayQueue>,
    checkpoint: CheckpointStore,
    backfill: BackfillScanner,
    reconnect_delay: Duration,
}

impl LiveSubscriber {
    #[must_use]
    pub fn new(
        client: ChainClient,
        contract: Address,
        descriptors: Arc<Vec<EventDescriptor>>,
        queue: Arc<RelayQueue>,
        checkpoint: CheckpointStore,
        backfill: BackfillScanner,
        reconnect_delay: Duration,
    ) -> Self {
        Self { client, contract, descriptors, queue, checkpoint, backfill, reconnect_delay }
    }

    /// Runs the subscription until `shutdown` flips to `true`.
    ///
    /// Reconnects on subscription loss, recovering the missed block range from the
    /// checkpoint before re-subscribing.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut first_connect = true;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if !first_connect {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(self.reconnect_delay) => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                self.catch_up().await;
            }
            first_connect = false;

            let (mut receiver, forwarders) = match self.open_subscriptions().await {
                Ok(parts) => parts,
                Err(error) => {
                    error!(error = %error, "failed to establish log subscription");
                    continue;
                }
            };

            info!(events = self.descriptors.len(), "live subscription established");
            self.consume(&mut receiver, &mut shutdown).await;

            // Dropping the set aborts any forwarders still attached to a half-open socket.
            drop(forwarders);

            if *shutdown.borrow() {
                break;
            }
            warn!(error = %RelayError::SubscriptionClosed, "reconnecting");
        }

        info!("live subscriber stopped");
    }

    /// Recovers events missed while disconnected: backfills `[checkpoint + 1, latest]`
    /// and advances the checkpoint.
    async fn catch_up(&self) {
        let from = self.checkpoint.read().saturating_add(1);
        match self.client.get_block_number().await {
            Ok(latest) if from <= latest => {
                let enqueued = self.backfill.scan(from, latest).await;
                info!(from, to = latest, enqueued, "recovered events missed while disconnected");
                if let Err(error) = self.checkpoint.write(latest) {
                    warn!(error = %error, "failed to persist checkpoint after catch-up");
                }
            }
            Ok(latest) => {
                debug!(checkpoint = from - 1, latest, "checkpoint is current, nothing to recover");
            }
            Err(error) => {
                warn!(error = %error, "failed to read chain height for catch-up");
            }
        }
    }

    /// Opens one log subscription per configured event and spawns the forwarder tasks.
    async fn open_subscriptions(
        &self,
    ) -> Result<(mpsc::Receiver<(usize, Log)>, JoinSet<()>), RelayError> {
        let (sender, receiver) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let mut forwarders = JoinSet::new();

        for (index, descriptor) in self.descriptors.iter().enumerate() {
            let filter =
                Filter::new().address(self.contract).event_signature(descriptor.topic0);
            let subscription = self.client.subscribe_logs(&filter).await?;
            let sender = sender.clone();

            forwarders.spawn(async move {
                let mut stream = subscription.into_stream();
                while let Some(log) = stream.next().await {
                    if sender.send((index, log)).await.is_err() {
                        return;
                    }
                }
            });
        }

        Ok((receiver, forwarders))
    }

    /// Drains the internal channel until every forwarder is gone (subscription loss) or
    /// shutdown is signalled.
    async fn consume(
        &self,
        receiver: &mut mpsc::Receiver<(usize, Log)>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                item = receiver.recv() => {
                    let Some((index, log)) = item else { return };
                    self.handle_log(&self.descriptors[index], log);
                }
            }
        }
    }

    /// Processes a single live log.
    ///
    /// Reorg-retracted logs are dropped before they can reach the queue. The checkpoint is
    /// advanced only after a successful enqueue, so a skipped event is re-attempted by the
    /// next checkpoint-bounded backfill.
    fn handle_log(&self, descriptor: &EventDescriptor, log: Log) {
        if log.removed {
            debug!(event = %descriptor.name, "reorg retracted log, dropping");
            return;
        }

        let event = match normalize(descriptor, &log) {
            Ok(event) => event,
            Err(error) => {
                warn!(event = %descriptor.name, error = %error, "skipping undecodable live log");
                return;
            }
        };

        let block_number = event.block_number;
        match self.queue.enqueue(event.event_name.clone(), event) {
            Ok(_) => {
                if let Err(error) = self.checkpoint.write(block_number) {
                    warn!(error = %error, "failed to persist checkpoint");
                }
            }
            Err(error) => {
                warn!(
                    event = %descriptor.name,
                    error = %error,
                    "failed to enqueue live event, checkpoint not advanced"
                );
            }
        }
    }
}
