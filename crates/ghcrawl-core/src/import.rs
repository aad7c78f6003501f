//! Re-import archived NDJSON files into the store

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::persist::Persistence;
use crate::progress::ProgressContext;
use crate::stream::{is_complete_gzip, open_lines};
use crate::types::{UNKNOWN_ID, WorkItem, Workflow};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub files: usize,
    pub skipped_files: usize,
    pub records: usize,
    pub db_errors: usize,
    pub interrupted: bool,
}

/// Archive files for `workflow` in `dir`, oldest first
pub fn archive_files(dir: &Path, workflow: Workflow) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(format!("{}_*.json.gz", workflow.file_prefix()));
    let pattern = pattern.to_string_lossy();
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("Invalid archive pattern {pattern}"))?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    Ok(files)
}

/// Fetch time encoded in `{prefix}_{unix_ts}.json.gz`
pub fn fetched_at_from_name(path: &Path, workflow: Workflow) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;
    let ts = name
        .strip_prefix(workflow.file_prefix())?
        .strip_prefix('_')?
        .strip_suffix(".json.gz")?
        .parse::<i64>()
        .ok()?;
    DateTime::from_timestamp(ts, 0)
}

/// Request identity and payload for one archived line
fn record_parts(workflow: Workflow, record: Value) -> Result<(WorkItem, Value)> {
    match workflow {
        Workflow::Members => {
            let id = record.get("id").and_then(Value::as_i64);
            let login = record.get("login").and_then(Value::as_str);
            let (Some(id), Some(login)) = (id, login) else {
                bail!("membership record without id/login");
            };
            let item = WorkItem::new(id, login);
            let members = record.get("members").cloned().unwrap_or(Value::Array(vec![]));
            Ok((item, members))
        }
        Workflow::Repos | Workflow::Users => {
            let key_field = if workflow == Workflow::Repos {
                "full_name"
            } else {
                "login"
            };
            let id = record.get("id").and_then(Value::as_i64).unwrap_or(UNKNOWN_ID);
            let key = record
                .get(key_field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok((WorkItem::new(id, key), record))
        }
    }
}

/// Upsert every archived record of `workflow` found in `dir` with status 200.
///
/// Incomplete gzip files (a run that crashed mid-write) are skipped with a
/// warning. A line that is not valid JSON aborts the import.
pub fn import_archive(
    dir: &Path,
    workflow: Workflow,
    store: &mut dyn Persistence,
    cancel: &CancellationToken,
    progress: &ProgressContext,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let files = archive_files(dir, workflow)?;
    log::info!("Found {} {workflow} archive files in {}", files.len(), dir.display());

    for path in files {
        if cancel.is_cancelled() {
            summary.interrupted = true;
            break;
        }
        let Some(fetched_at) = fetched_at_from_name(&path, workflow) else {
            log::warn!("Skipping {}: no timestamp in name", path.display());
            summary.skipped_files += 1;
            continue;
        };
        if !is_complete_gzip(&path) {
            log::warn!("Skipping incomplete archive {}", path.display());
            summary.skipped_files += 1;
            continue;
        }

        let (reader, counter, size) =
            open_lines(&path).with_context(|| format!("Cannot open {}", path.display()))?;
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let bar = progress.bytes_bar(&name, size);

        let mut records = 0;
        for (idx, line) in reader.lines().enumerate() {
            if cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            let line = line.with_context(|| format!("{}:{}", path.display(), idx + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Value = serde_json::from_str(&line)
                .with_context(|| format!("Malformed JSON at {}:{}", path.display(), idx + 1))?;
            let (item, entity) = record_parts(workflow, record)
                .with_context(|| format!("{}:{}", path.display(), idx + 1))?;

            if let Err(e) = store.upsert_entity(workflow, &item, &entity, 200, fetched_at) {
                log::error!("Store write failed for {}: {e:#}", item.lookup_key);
                summary.db_errors += 1;
            }
            records += 1;
            bar.set_position(counter.load(std::sync::atomic::Ordering::Relaxed));
        }
        bar.finish_and_clear();

        log::info!("Imported {records} records from {name}");
        summary.records += records;
        summary.files += 1;
    }

    Ok(summary)
}
