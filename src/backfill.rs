//! Historical gap recovery.
//!
//! The backfill scanner queries a closed block range for every configured event, normalizes
//! the results, orders them globally by `(block_number, log_index)`, and enqueues them
//! sequentially so queue arrival order matches chain order. It is run once at startup over
//! `[checkpoint + 1, current_height]` and again after every subscription reconnect.

use std::{ops::RangeInclusive, sync::Arc};

use alloy::{primitives::Address, rpc::types::Filter};
use tracing::{debug, info, warn};

use crate::{
    config::EventDescriptor,
    error::RelayError,
    normalizer::{CanonicalEvent, normalize},
    provider::ChainClient,
    queue::RelayQueue,
};

/// Splits `[from, to]` into consecutive inclusive chunks of at most `step` blocks.
struct BlockRanges {
    next: u64,
    to: u64,
    step: u64,
}

impl BlockRanges {
    fn new(from: u64, to: u64, step: u64) -> Self {
        debug_assert!(step > 0);
        Self { next: from, to, step }
    }
}

impl Iterator for BlockRanges {
    type Item = RangeInclusive<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.to {
            return None;
        }
        let start = self.next;
        let end = self.to.min(start.saturating_add(self.step - 1));
        self.next = end.saturating_add(1);
        Some(start..=end)
    }
}

/// Scans a closed block range and feeds the results into the work queue.
#[derive(Debug, Clone)]
pub struct BackfillScanner {
    client: ChainClient,
    contract: Address,
    descriptors: Arc<Vec<EventDescriptor>>,
    max_block_range: u64,
    queue: Arc<RelayQueue>,
}

impl BackfillScanner {
    #[must_use]
    pub fn new(
        client: ChainClient,
        contract: Address,
        descriptors: Arc<Vec<EventDescriptor>>,
        max_block_range: u64,
        queue: Arc<RelayQueue>,
    ) -> Self {
        Self { client, contract, descriptors, max_block_range, queue }
    }

    /// Backfills `[from, to]` and returns the number of events enqueued.
    ///
    /// A no-op when `from > to`. Per-event query failures and per-item enqueue failures are
    /// logged and skipped; neither aborts the rest of the scan. Events are enqueued
    /// sequentially in `(block_number, log_index)` ascending order.
    pub async fn scan(&self, from: u64, to: u64) -> usize {
        if from > to {
            debug!(from, to, "empty backfill range, nothing to do");
            return 0;
        }

        let mut events = Vec::new();
        for descriptor in self.descriptors.iter() {
            match self.collect(descriptor, from, to).await {
                Ok(mut found) => events.append(&mut found),
                Err(error) => warn!(
                    event = %descriptor.name,
                    error = %error,
                    from,
                    to,
                    "historical query failed, continuing with remaining events"
                ),
            }
        }

        // A single block can emit several relevant logs; log index is the tie-break the
        // downstream consumer relies on.
        events.sort_by_key(|event| (event.block_number, event.log_index));

        let mut enqueued = 0;
        for event in events {
            match self.queue.enqueue(event.event_name.clone(), event) {
                Ok(_) => enqueued += 1,
                Err(error) => {
                    warn!(error = %error, "failed to enqueue backfilled event, skipping");
                }
            }
        }

        info!(from, to, enqueued, "backfill complete");
        enqueued
    }

    /// Collects and normalizes all logs for one event descriptor over `[from, to]`,
    /// querying at most `max_block_range` blocks per RPC call.
    async fn collect(
        &self,
        descriptor: &EventDescriptor,
        from: u64,
        to: u64,
    ) -> Result<Vec<CanonicalEvent>, RelayError> {
        let mut events = Vec::new();

        for range in BlockRanges::new(from, to, self.max_block_range) {
            let filter = Filter::new()
                .address(self.contract)
                .event_signature(descriptor.topic0)
                .from_block(*range.start())
                .to_block(*range.end());

            let logs = self.client.get_logs(&filter).await?;
            if !logs.is_empty() {
                debug!(
                    event = %descriptor.name,
                    log_count = logs.len(),
                    block_range = ?range,
                    "found logs for event in block range"
                );
            }

            for log in logs {
                if log.removed {
                    debug!(event = %descriptor.name, "skipping reorg-retracted log");
                    continue;
                }
                match normalize(descriptor, &log) {
                    Ok(event) => events.push(event),
                    Err(error) => {
                        warn!(event = %descriptor.name, error = %error, "skipping undecodable log");
                    }
                }
            }
        }

        Ok(events)
    }
}
