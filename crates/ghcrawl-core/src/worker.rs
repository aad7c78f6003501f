//! Credential-bound fetch worker.
//!
//! Each worker owns one [`RemoteApi`] client and competes with its siblings
//! for items on the shared request queue. Outcomes go to the writer over a
//! near-unbuffered channel, so a worker never runs more than one item ahead
//! of the writer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::api::RemoteApi;
use crate::error::FetchError;
use crate::ratelimit::{RateLimitPolicy, sleep_cancellable};
use crate::retry::RetryPolicy;
use crate::types::{FetchOutcome, Page, QuotaInfo, WorkItem, Workflow};

/// Default per-request deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Request queue receiver shared by all workers; whoever holds the lock dequeues next
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    pub request_timeout: Duration,
    pub rate_limit: RateLimitPolicy,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            rate_limit: RateLimitPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-worker counters, returned when the loop exits
#[derive(Debug, Default, Clone)]
pub struct WorkerStats {
    pub label: String,
    pub fetched: usize,
    pub retries: usize,
    pub dead_letters: Vec<WorkItem>,
}

enum Pages {
    Complete(FetchOutcome),
    RateLimited(QuotaInfo),
}

enum ItemResult {
    Done(FetchOutcome),
    DeadLetter,
    /// Cancelled mid-retry; not persisted so the next run picks it up again
    Abandoned,
}

pub struct FetchWorker<A: RemoteApi> {
    api: A,
    workflow: Workflow,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl<A: RemoteApi> FetchWorker<A> {
    pub fn new(api: A, workflow: Workflow, config: WorkerConfig, cancel: CancellationToken) -> Self {
        Self {
            api,
            workflow,
            config,
            cancel,
        }
    }

    /// Loop until the request queue is closed and drained, cancellation fires,
    /// or the writer goes away.
    pub async fn run(
        self,
        requests: SharedReceiver,
        results: mpsc::Sender<FetchOutcome>,
    ) -> WorkerStats {
        let label = self.api.label().to_string();
        let mut stats = WorkerStats {
            label: label.clone(),
            ..Default::default()
        };

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                item = next_item(&requests) => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            log::info!("[{label}] fetching {} {}", self.workflow, item.lookup_key);
            let outcome = match self.fetch_item(&item, &mut stats).await {
                ItemResult::Done(outcome) => outcome,
                ItemResult::DeadLetter => {
                    stats.dead_letters.push(item);
                    continue;
                }
                ItemResult::Abandoned => break,
            };
            stats.fetched += 1;

            let quota = outcome.quota;
            if results.send(outcome).await.is_err() {
                log::warn!("[{label}] result queue closed, stopping");
                break;
            }

            if let Some(wait) = self.config.rate_limit.sleep_for(&quota, Utc::now()) {
                log::info!(
                    "[{label}] {} calls left, sleeping {}s until quota reset",
                    quota.remaining,
                    wait.as_secs()
                );
                sleep_cancellable(wait, &self.cancel).await;
            }
        }

        log::debug!(
            "[{label}] worker done: {} fetched, {} retries, {} dead letters",
            stats.fetched,
            stats.retries,
            stats.dead_letters.len()
        );
        stats
    }

    /// Fetch one item, retrying calls that produced no response
    async fn fetch_item(&self, item: &WorkItem, stats: &mut WorkerStats) -> ItemResult {
        let label = self.api.label();
        let retry = self.config.retry;
        let mut attempt = 0u32;

        loop {
            let failure = match self.fetch_pages(item).await {
                Ok(Pages::Complete(outcome)) => return ItemResult::Done(outcome),
                Ok(Pages::RateLimited(quota)) => {
                    let wait = self.config.rate_limit.until_reset(&quota, Utc::now());
                    log::warn!(
                        "[{label}] rate limited on {}, sleeping {}s",
                        item.lookup_key,
                        wait.as_secs()
                    );
                    if !sleep_cancellable(wait, &self.cancel).await {
                        return ItemResult::Abandoned;
                    }
                    // Quota waits do not count against the retry budget
                    continue;
                }
                Err(e) if !e.is_retryable() => {
                    log::error!("[{label}] {}: {e}", item.lookup_key);
                    return ItemResult::DeadLetter;
                }
                Err(e) => e,
            };

            if !retry.allows(attempt) {
                log::error!(
                    "[{label}] giving up on {} after {} attempts: {failure}",
                    item.lookup_key,
                    attempt + 1
                );
                return ItemResult::DeadLetter;
            }
            attempt += 1;
            stats.retries += 1;

            let delay = retry.backoff(attempt);
            log::warn!(
                "[{label}] {} failed ({failure}), retry {attempt}/{} in {}s",
                item.lookup_key,
                retry.max_retries,
                delay.as_secs_f32()
            );
            if !sleep_cancellable(delay, &self.cancel).await {
                return ItemResult::Abandoned;
            }
        }
    }

    /// Issue the call, following page cursors for paginated workflows and
    /// folding every page into one outcome.
    async fn fetch_pages(&self, item: &WorkItem) -> Result<Pages, FetchError> {
        let mut cursor = None;
        let mut collected: Vec<Value> = Vec::new();
        let mut first_status = None;

        loop {
            let page = self.call(item, cursor).await?;
            if page.is_rate_limited() {
                return Ok(Pages::RateLimited(page.quota));
            }
            let success = (200..300).contains(&page.status);
            if let Some(number) = cursor.filter(|_| !success) {
                // Partial member lists are never persisted; the whole item is retried
                return Err(FetchError::Incomplete {
                    status: page.status,
                    page: number,
                });
            }
            if !self.workflow.is_paginated() || !success {
                return Ok(Pages::Complete(FetchOutcome {
                    status: page.status,
                    item: item.clone(),
                    quota: page.quota,
                    entity: page.entity,
                }));
            }

            let status = *first_status.get_or_insert(page.status);
            let Page {
                quota,
                entity,
                next_page,
                ..
            } = page;
            match entity {
                Some(Value::Array(values)) => collected.extend(values),
                Some(other) => collected.push(other),
                None => {}
            }

            match next_page {
                Some(next) if cursor.is_none_or(|current| next > current) => {
                    cursor = Some(next)
                }
                _ => {
                    return Ok(Pages::Complete(FetchOutcome {
                        status,
                        item: item.clone(),
                        quota,
                        entity: Some(Value::Array(collected)),
                    }));
                }
            }
        }
    }

    async fn call(&self, item: &WorkItem, page: Option<u32>) -> Result<Page, FetchError> {
        let request = self.api.fetch(self.workflow, &item.lookup_key, page);
        tokio::time::timeout(self.config.request_timeout, request)
            .await
            .unwrap_or(Err(FetchError::Timeout))
    }
}

async fn next_item(requests: &SharedReceiver) -> Option<WorkItem> {
    requests.lock().await.recv().await
}
