//! Relay worker pool.
//!
//! Up to `concurrency` workers pull jobs from the queue and POST each canonical payload to
//! `{downstream_base_url}/api/events/{kebab-case(event_name)}`. Any transport error or
//! non-2xx response is a handler failure, which hands the job back to the queue's retry
//! policy. Relay order to the downstream consumer is not guaranteed across workers even
//! though enqueue order is.

use std::sync::Arc;

use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use crate::{
    error::RelayError,
    queue::{RelayJob, RelayQueue},
};

/// Derives the downstream path token for an event name.
///
/// A stable, URL-safe kebab-case transform: `TransferSingle` becomes `transfer-single` and
/// acronym runs collapse (`URIChanged` becomes `uri-changed`).
#[must_use]
pub fn event_path_segment(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev_is_lower =
                i > 0 && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
            let next_is_lower = chars.get(i + 1).is_some_and(char::is_ascii_lowercase);
            if i > 0 && (prev_is_lower || next_is_lower) {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

/// Bounded-concurrency consumers draining the work queue.
pub struct RelayWorkerPool {
    workers: tokio::task::JoinSet<()>,
}

impl RelayWorkerPool {
    /// Spawns `concurrency` workers that relay jobs until the queue is closed and drained.
    #[must_use]
    pub fn start(
        queue: Arc<RelayQueue>,
        client: Client,
        base_url: Url,
        concurrency: usize,
    ) -> Self {
        let mut workers = tokio::task::JoinSet::new();

        for worker_id in 0..concurrency {
            let queue = Arc::clone(&queue);
            let client = client.clone();
            let base_url = base_url.clone();

            workers.spawn(async move {
                while let Some(job) = queue.dequeue().await {
                    match deliver(&client, &base_url, &job).await {
                        Ok(()) => {
                            info!(worker_id, job_id = job.id, event = %job.name, "relayed event");
                            queue.complete(&job);
                        }
                        Err(error) => {
                            warn!(
                                worker_id,
                                job_id = job.id,
                                event = %job.name,
                                attempt = job.attempt,
                                error = %error,
                                "relay attempt failed"
                            );
                            queue.fail(job, error);
                        }
                    }
                }
            });
        }

        Self { workers }
    }

    /// Waits for every worker to exit.
    ///
    /// Workers exit once the queue is closed and drained; in-flight deliveries run to
    /// completion or retry exhaustion first.
    pub async fn join(mut self) {
        while self.workers.join_next().await.is_some() {}
    }
}

/// POSTs one job's canonical payload downstream.
///
/// Any 2xx response is success; anything else is a failure handed back to the retry policy.
async fn deliver(client: &Client, base_url: &Url, job: &RelayJob) -> Result<(), RelayError> {
    let url = format!(
        "{}/api/events/{}",
        base_url.as_str().trim_end_matches('/'),
        event_path_segment(&job.name)
    );

    let response = client.post(url).json(&job.payload).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::RelayRejected { status: status.as_u16() });
    }
    Ok(())
}
