//! At-least-once work queue with retry and exponential backoff.
//!
//! Jobs are delivered in arrival (FIFO) order. A failed job is re-enqueued after a backoff
//! delay until its attempt cap is reached, at which point it is parked in a failure set that
//! is retained for inspection. Completed job ids are kept only up to a retention cap.
//!
//! The queue performs no deduplication: re-running a backfill over the same range produces
//! duplicate entries by design, and the downstream consumer is expected to be idempotent
//! over `(transaction_hash, log_index, event_name)`.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::{error::RelayError, normalizer::CanonicalEvent};

/// Bounded attempts with exponential backoff between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of delivery attempts before a job is parked in the failure set.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each attempt after that.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before retrying a job whose `attempts_made` deliveries have all failed.
    #[must_use]
    pub fn delay_after(&self, attempts_made: u32) -> Duration {
        // Shift is capped so pathological attempt counts cannot overflow the multiplier.
        let exponent = attempts_made.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// A unit of relay work: one canonical event addressed by its event name.
#[derive(Debug, Clone)]
pub struct RelayJob {
    pub id: u64,
    pub name: String,
    pub payload: CanonicalEvent,
    /// 1-based attempt counter; incremented when the job is re-enqueued for retry.
    pub attempt: u32,
}

/// A job that exhausted its retry budget, retained for inspection.
#[derive(Debug, Clone)]
pub struct FailedJob {
    pub job: RelayJob,
    pub reason: String,
}

/// Handle returned by [`RelayQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    id: u64,
}

impl JobHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<RelayJob>,
    in_flight: usize,
    /// Jobs sleeping out a backoff delay before re-entering `pending`.
    scheduled: usize,
    completed: VecDeque<u64>,
    failed: Vec<FailedJob>,
    closed: bool,
    next_id: u64,
}

/// The shared job queue between the event producers (backfill scanner, live subscriber)
/// and the relay worker pool.
#[derive(Debug)]
pub struct RelayQueue {
    state: Mutex<QueueState>,
    policy: RetryPolicy,
    completed_retention: usize,
    notify: Notify,
}

impl RelayQueue {
    #[must_use]
    pub fn new(policy: RetryPolicy, completed_retention: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            policy,
            completed_retention,
            notify: Notify::new(),
        })
    }

    /// Appends a job in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::QueueClosed`] once [`close`](Self::close) has been called.
    pub fn enqueue(
        &self,
        name: impl Into<String>,
        payload: CanonicalEvent,
    ) -> Result<JobHandle, RelayError> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        if state.closed {
            return Err(RelayError::QueueClosed);
        }

        state.next_id += 1;
        let id = state.next_id;
        state.pending.push_back(RelayJob { id, name: name.into(), payload, attempt: 1 });
        drop(state);

        self.notify.notify_waiters();
        Ok(JobHandle { id })
    }

    /// Pulls the next job in arrival order, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and fully drained: no pending jobs, no
    /// in-flight deliveries, and no retries sleeping out their backoff.
    pub async fn dequeue(self: &Arc<Self>) -> Option<RelayJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking state, so a notification landing
            // between the check and the await is not lost.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().expect("queue lock poisoned");
                if let Some(job) = state.pending.pop_front() {
                    state.in_flight += 1;
                    return Some(job);
                }
                if state.closed && state.in_flight == 0 && state.scheduled == 0 {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Records terminal success for `job` and prunes completed history past the cap.
    pub fn complete(&self, job: &RelayJob) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.in_flight -= 1;
        state.completed.push_back(job.id);
        while state.completed.len() > self.completed_retention {
            state.completed.pop_front();
        }
        drop(state);

        self.notify.notify_waiters();
    }

    /// Records a failed delivery attempt.
    ///
    /// If attempts remain, the job is re-enqueued after the policy's backoff delay.
    /// Otherwise it is parked in the failure set, which is retained indefinitely.
    pub fn fail(self: &Arc<Self>, mut job: RelayJob, reason: impl fmt::Display) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.in_flight -= 1;

        if job.attempt >= self.policy.max_attempts {
            warn!(
                job_id = job.id,
                event = %job.name,
                attempts = job.attempt,
                reason = %reason,
                "retry budget exhausted, parking job in failure set"
            );
            state.failed.push(FailedJob { job, reason: reason.to_string() });
            drop(state);
            self.notify.notify_waiters();
            return;
        }

        let delay = self.policy.delay_after(job.attempt);
        job.attempt += 1;
        state.scheduled += 1;
        drop(state);

        debug!(job_id = job.id, event = %job.name, attempt = job.attempt, delay = ?delay, "scheduling retry");

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = queue.state.lock().expect("queue lock poisoned");
            state.scheduled -= 1;
            state.pending.push_back(job);
            drop(state);
            queue.notify.notify_waiters();
        });
    }

    /// Stops accepting new jobs. Already-enqueued jobs (including pending retries) are
    /// still drained by the workers.
    pub fn close(&self) {
        self.state.lock().expect("queue lock poisoned").closed = true;
        self.notify.notify_waiters();
    }

    /// Jobs that exhausted their retry budget.
    #[must_use]
    pub fn failed(&self) -> Vec<FailedJob> {
        self.state.lock().expect("queue lock poisoned").failed.clone()
    }

    /// Number of jobs waiting to be dequeued.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").pending.len()
    }

    /// Number of completed job ids currently retained.
    #[must_use]
    pub fn completed_len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").completed.len()
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use tokio::time::{Duration, Instant, pause};

    use super::*;

    fn test_event(block_number: u64, log_index: u64) -> CanonicalEvent {
        CanonicalEvent {
            event_name: "Transfer".into(),
            args: IndexMap::new(),
            block_number,
            transaction_hash: "0xabc".into(),
            log_index,
            removed: false,
            source_contract: "0x0000000000000000000000000000000000000001".into(),
        }
    }

    fn test_queue(max_attempts: u32) -> Arc<RelayQueue> {
        RelayQueue::new(
            RetryPolicy { max_attempts, base_delay: Duration::from_secs(1) },
            10,
        )
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy { max_attempts: 5, base_delay: Duration::from_secs(1) };

        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn dequeues_in_arrival_order() {
        let queue = test_queue(3);

        queue.enqueue("Transfer", test_event(100, 1)).unwrap();
        queue.enqueue("Transfer", test_event(100, 2)).unwrap();
        queue.enqueue("Transfer", test_event(101, 0)).unwrap();

        let first = queue.dequeue().await.unwrap();
        let second = queue.dequeue().await.unwrap();
        let third = queue.dequeue().await.unwrap();

        assert_eq!((first.payload.block_number, first.payload.log_index), (100, 1));
        assert_eq!((second.payload.block_number, second.payload.log_index), (100, 2));
        assert_eq!((third.payload.block_number, third.payload.log_index), (101, 0));
    }

    #[tokio::test]
    async fn enqueue_after_close_is_rejected() {
        let queue = test_queue(3);
        queue.close();

        let result = queue.enqueue("Transfer", test_event(1, 0));

        assert!(matches!(result, Err(RelayError::QueueClosed)));
    }

    #[tokio::test]
    async fn dequeue_returns_none_when_closed_and_drained() {
        let queue = test_queue(3);

        queue.enqueue("Transfer", test_event(1, 0)).unwrap();
        queue.close();

        let job = queue.dequeue().await.unwrap();
        queue.complete(&job);

        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn failed_job_is_retried_after_backoff() {
        pause();
        let queue = test_queue(3);

        queue.enqueue("Transfer", test_event(1, 0)).unwrap();
        let job = queue.dequeue().await.unwrap();
        assert_eq!(job.attempt, 1);

        let before = Instant::now();
        queue.fail(job, "downstream returned status 500");

        let job = queue.dequeue().await.unwrap();
        assert_eq!(job.attempt, 2);
        assert!(Instant::now() - before >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn exhausted_job_lands_in_failure_set() {
        pause();
        let queue = test_queue(2);

        queue.enqueue("Transfer", test_event(1, 0)).unwrap();

        let job = queue.dequeue().await.unwrap();
        queue.fail(job, "boom");
        let job = queue.dequeue().await.unwrap();
        assert_eq!(job.attempt, 2);
        queue.fail(job, "boom again");
        queue.close();

        assert!(queue.dequeue().await.is_none());

        let failed = queue.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job.attempt, 2);
        assert_eq!(failed[0].reason, "boom again");
    }

    #[tokio::test]
    async fn retry_sleeping_out_backoff_blocks_drain() {
        pause();
        let queue = test_queue(3);

        queue.enqueue("Transfer", test_event(1, 0)).unwrap();
        let job = queue.dequeue().await.unwrap();
        queue.fail(job, "transient");
        queue.close();

        // The retry is still sleeping, so the queue must not report drained.
        let pending_retry = queue.dequeue().await;
        assert_eq!(pending_retry.as_ref().map(|j| j.attempt), Some(2));

        queue.complete(&pending_retry.unwrap());
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn completed_history_is_pruned_past_retention() {
        let queue = RelayQueue::new(
            RetryPolicy { max_attempts: 1, base_delay: Duration::from_millis(1) },
            2,
        );

        for i in 0..5 {
            queue.enqueue("Transfer", test_event(i, 0)).unwrap();
            let job = queue.dequeue().await.unwrap();
            queue.complete(&job);
        }

        assert_eq!(queue.completed_len(), 2);
    }

    #[tokio::test]
    async fn no_deduplication_across_identical_payloads() {
        let queue = test_queue(3);
        let event = test_event(100, 1);

        let first = queue.enqueue("Transfer", event.clone()).unwrap();
        let second = queue.enqueue("Transfer", event).unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(queue.pending_len(), 2);
    }

    #[tokio::test]
    async fn dequeue_waits_for_late_enqueue() {
        let queue = test_queue(3);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::task::yield_now().await;
        queue.enqueue("Transfer", test_event(5, 0)).unwrap();

        let job = waiter.await.unwrap().unwrap();
        assert_eq!(job.payload.block_number, 5);
    }
}
