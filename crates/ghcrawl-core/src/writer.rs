//! Single result writer: relational upserts plus the rotating archive

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::ProgressBar;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::persist::Persistence;
use crate::progress::fmt_num;
use crate::sink::RotatingSink;
use crate::types::{FetchOutcome, Workflow};

/// Counters from one writer run
#[derive(Debug, Default, Clone)]
pub struct WriterStats {
    /// Outcomes consumed from the result queue
    pub written: usize,
    pub status_only: usize,
    pub drifted: usize,
    pub archived: usize,
    pub db_errors: usize,
    pub files: Vec<PathBuf>,
}

/// Consumes outcomes in arrival order on a dedicated thread.
///
/// The writer is the only owner of the store handle and the archive files.
/// It drains the result queue until every sender is gone and does not watch
/// cancellation itself; on a fatal archive error it cancels `cancel` so the
/// rest of the pipeline winds down.
pub struct ResultWriter {
    workflow: Workflow,
    store: Box<dyn Persistence>,
    sink: Option<RotatingSink>,
    cancel: CancellationToken,
    stage: ProgressBar,
}

impl ResultWriter {
    pub fn new(
        workflow: Workflow,
        store: Box<dyn Persistence>,
        sink: Option<RotatingSink>,
        cancel: CancellationToken,
        stage: ProgressBar,
    ) -> Self {
        Self {
            workflow,
            store,
            sink,
            cancel,
            stage,
        }
    }

    pub fn spawn(
        self,
        results: mpsc::Receiver<FetchOutcome>,
    ) -> std::io::Result<JoinHandle<Result<WriterStats>>> {
        thread::Builder::new()
            .name("result-writer".into())
            .spawn(move || self.run(results))
    }

    pub fn run(mut self, mut results: mpsc::Receiver<FetchOutcome>) -> Result<WriterStats> {
        let mut stats = WriterStats::default();

        while let Some(outcome) = results.blocking_recv() {
            if let Err(e) = self.write(&outcome, &mut stats) {
                log::error!("Result writer stopping: {e:#}");
                self.cancel.cancel();
                // Seal what was already archived before giving up
                if let Some(sink) = self.sink.take() {
                    if let Err(close_err) = sink.finish() {
                        log::error!("Failed to close archive: {close_err}");
                    }
                }
                self.stage.abandon();
                return Err(e);
            }
            self.stage.set_message(format!(
                "{} written, {} status-only, {} archived",
                fmt_num(stats.written),
                fmt_num(stats.status_only),
                fmt_num(stats.archived)
            ));
        }

        if let Some(sink) = self.sink.take() {
            stats.files = sink.finish().context("Failed to close archive file")?;
        }
        self.stage.finish_and_clear();
        Ok(stats)
    }

    /// Persist one outcome. Only archive I/O errors are returned; store
    /// errors are logged and counted.
    fn write(&mut self, outcome: &FetchOutcome, stats: &mut WriterStats) -> Result<()> {
        let workflow = self.workflow;
        let item = &outcome.item;
        let fetched_at = Utc::now();
        log::info!(
            "writing {workflow} {} ({})",
            item.lookup_key,
            outcome.status
        );
        stats.written += 1;

        let Some(entity) = &outcome.entity else {
            if !item.has_known_id() {
                log::warn!(
                    "No id for {} (HTTP {}), status not recorded",
                    item.lookup_key,
                    outcome.status
                );
                return Ok(());
            }
            let r = self.store.upsert_status(
                workflow,
                item.external_id,
                &item.lookup_key,
                outcome.status,
                fetched_at,
            );
            count_db_error(r, stats, &item.lookup_key);
            stats.status_only += 1;
            return Ok(());
        };

        if outcome.has_identity_drift(workflow) {
            log::info!(
                "{} moved from id {} to {}",
                item.lookup_key,
                item.external_id,
                outcome.reported_id(workflow).unwrap_or_default()
            );
            let r = self.store.upsert_status(
                workflow,
                item.external_id,
                &item.lookup_key,
                404,
                fetched_at,
            );
            count_db_error(r, stats, &item.lookup_key);
            stats.drifted += 1;
        }

        let r = self
            .store
            .upsert_entity(workflow, item, entity, outcome.status, fetched_at);
        count_db_error(r, stats, &item.lookup_key);

        if outcome.status == 200 {
            if let (Some(sink), Some(record)) =
                (self.sink.as_mut(), outcome.archive_record(workflow))
            {
                sink.append(&record)
                    .with_context(|| format!("Failed to archive {}", item.lookup_key))?;
                stats.archived += 1;
            }
        }
        Ok(())
    }
}

fn count_db_error(result: Result<()>, stats: &mut WriterStats, key: &str) {
    if let Err(e) = result {
        log::error!("Store write failed for {key}: {e:#}");
        stats.db_errors += 1;
    }
}
