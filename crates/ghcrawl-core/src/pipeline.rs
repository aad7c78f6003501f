//! Orchestrator: wires backlog, fetch workers and the result writer together.
//!
//! Shutdown always runs in the same order, interrupted or not: the request
//! queue closes, workers drain and exit, the result queue closes, the writer
//! drains and seals its archive file. Cancellation only makes the first two
//! steps finish sooner.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::api::RemoteApi;
use crate::backlog::{BacklogInput, BacklogStats};
use crate::persist::Persistence;
use crate::progress::ProgressContext;
use crate::runtime::SHARED_RUNTIME;
use crate::sink::{DEFAULT_ROTATE_BYTES, RotatingSink};
use crate::types::{FetchOutcome, WorkItem, Workflow};
use crate::worker::{FetchWorker, WorkerConfig};
use crate::writer::{ResultWriter, WriterStats};

/// Default request queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Single-slot hand-off between workers and the writer
const RESULT_QUEUE_CAPACITY: usize = 1;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub workflow: Workflow,
    /// Fetch items even when the store already has them
    pub refetch: bool,
    /// Archive directory; `None` writes to the store only
    pub output_dir: Option<PathBuf>,
    pub rotate_bytes: u64,
    pub queue_capacity: usize,
    pub worker: WorkerConfig,
}

impl PipelineConfig {
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            refetch: false,
            output_dir: None,
            rotate_bytes: DEFAULT_ROTATE_BYTES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker: WorkerConfig::default(),
        }
    }
}

/// Result of one pipeline run
#[derive(Debug, Default)]
pub struct Summary {
    pub queued: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub fetched: usize,
    pub retries: usize,
    pub dead_letters: Vec<WorkItem>,
    pub dead_letter_file: Option<PathBuf>,
    pub writer: WriterStats,
    pub elapsed: Duration,
    pub interrupted: bool,
}

/// Run one harvesting pass.
///
/// `clients` holds one API client per credential, each driving its own worker.
/// `checker` answers existence checks for the backlog; `store` is handed to
/// the writer and used by nothing else. Must be called from outside the
/// shared runtime.
pub fn run_pipeline<A: RemoteApi>(
    config: &PipelineConfig,
    backlog: BacklogInput,
    clients: Vec<A>,
    checker: Option<&dyn Persistence>,
    store: Box<dyn Persistence>,
    cancel: &CancellationToken,
    progress: &ProgressContext,
) -> Result<Summary> {
    let start = Instant::now();
    let workflow = config.workflow;

    if clients.is_empty() {
        bail!("No credentials configured for {workflow}");
    }
    let backlog = backlog.open()?;
    let sink = match &config.output_dir {
        Some(dir) => Some(
            RotatingSink::new(dir, workflow.file_prefix(), config.rotate_bytes)
                .with_context(|| format!("Cannot prepare output directory {}", dir.display()))?,
        ),
        None => None,
    };

    let (request_tx, request_rx) = mpsc::channel::<WorkItem>(config.queue_capacity.max(1));
    let (result_tx, result_rx) = mpsc::channel::<FetchOutcome>(RESULT_QUEUE_CAPACITY);

    let stage = progress.stage_line(workflow.name());
    let writer = ResultWriter::new(workflow, store, sink, cancel.clone(), stage)
        .spawn(result_rx)
        .context("Failed to spawn result writer")?;

    log::info!("Starting {} {workflow} workers", clients.len());
    let requests = Arc::new(Mutex::new(request_rx));
    let workers: Vec<_> = clients
        .into_iter()
        .map(|api| {
            let worker = FetchWorker::new(api, workflow, config.worker, cancel.clone());
            SHARED_RUNTIME.spawn(worker.run(requests.clone(), result_tx.clone()))
        })
        .collect();
    drop(requests);

    let fed = backlog.feed(
        workflow,
        checker,
        config.refetch,
        &request_tx,
        cancel,
        SHARED_RUNTIME.handle(),
    );
    drop(request_tx);

    let worker_results = SHARED_RUNTIME.block_on(join_all(workers));
    drop(result_tx);

    let writer_result = writer
        .join()
        .map_err(|_| anyhow!("Result writer panicked"))
        .and_then(|r| r);

    let mut summary = Summary {
        interrupted: cancel.is_cancelled(),
        ..Default::default()
    };
    for result in worker_results {
        match result {
            Ok(stats) => {
                summary.fetched += stats.fetched;
                summary.retries += stats.retries;
                summary.dead_letters.extend(stats.dead_letters);
            }
            Err(e) => log::error!("Fetch worker failed: {e}"),
        }
    }

    summary.writer = writer_result?;
    let BacklogStats {
        queued,
        skipped,
        malformed,
        ..
    } = fed?;
    summary.queued = queued;
    summary.skipped = skipped;
    summary.malformed = malformed;

    if !summary.dead_letters.is_empty() {
        summary.dead_letter_file = match &config.output_dir {
            Some(dir) => Some(write_dead_letters(dir, workflow, &summary.dead_letters)?),
            None => {
                for item in &summary.dead_letters {
                    log::warn!("dead letter: {} {}", item.external_id, item.lookup_key);
                }
                None
            }
        };
    }

    summary.elapsed = start.elapsed();
    Ok(summary)
}

/// Write dead letters in backlog format so they can be fed back in
pub fn write_dead_letters(dir: &Path, workflow: Workflow, items: &[WorkItem]) -> Result<PathBuf> {
    let path = dir.join(format!(
        "{}_dead_letters_{}.txt",
        workflow.file_prefix(),
        Utc::now().timestamp()
    ));
    let mut body = String::new();
    for item in items {
        let _ = writeln!(body, "- {} {}", item.external_id, item.lookup_key);
    }
    std::fs::write(&path, body)
        .with_context(|| format!("Failed to write dead letters to {}", path.display()))?;
    log::warn!("{} dead letters written to {}", items.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::{BacklogLine, parse_line};
    use tempfile::TempDir;

    #[test]
    fn dead_letters_round_trip_as_backlog() {
        let dir = TempDir::new().unwrap();
        let items = vec![WorkItem::new(1, "a/b"), WorkItem::new(-123, "c/d")];
        let path = write_dead_letters(dir.path(), Workflow::Repos, &items).unwrap();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("github_repos_dead_letters_"));
        let parsed: Vec<_> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(parse_line)
            .collect();
        assert_eq!(
            parsed,
            items.into_iter().map(BacklogLine::Item).collect::<Vec<_>>()
        );
    }

    #[test]
    fn defaults() {
        let config = PipelineConfig::new(Workflow::Users);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.rotate_bytes, 100_000_000);
        assert!(!config.refetch);
    }
}
