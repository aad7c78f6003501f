//! Harvest subcommands - fetch repos, users or organization members

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use tokio_util::sync::CancellationToken;

use ghcrawl_core::{
    BacklogInput, PipelineConfig, SharedProgress, Summary, Workflow, bridge_to_token, fmt_num,
    run_pipeline,
};
use ghcrawl_github::GitHubClient;
use ghcrawl_store::DuckDbStore;

use super::{Outcome, print_summary};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// Backlog file of `<tag> <id> <key>` lines; the tag column is ignored (.gz accepted)
    #[arg(short, long)]
    pub backlog: Option<PathBuf>,

    /// Fetch items even if the database already has them
    #[arg(long)]
    pub refetch: bool,

    /// Archive directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write to the database only, without a JSON archive
    #[arg(long, conflicts_with = "output")]
    pub no_archive: bool,

    /// Maximum retry attempts for unreachable items
    #[arg(long)]
    pub max_retries: Option<u32>,
}

pub fn run(
    workflow: Workflow,
    args: HarvestArgs,
    config: &Config,
    progress: &SharedProgress,
) -> Result<Outcome> {
    let credentials = config.credentials();
    if credentials.is_empty() {
        bail!("No usable credentials: add [[credentials]] to the config or set GITHUB_TOKEN");
    }
    let options = config.client_options();
    let clients = credentials
        .iter()
        .map(|c| GitHubClient::new(c, &options))
        .collect::<Result<Vec<_>>>()?;
    log::info!("{workflow}: {} credential(s)", clients.len());

    let store = DuckDbStore::open(&config.database.path)?;
    let checker = store.try_clone()?;

    let backlog = match args.backlog {
        Some(path) => BacklogInput::File(path),
        None if workflow == Workflow::Members => {
            let pending = checker
                .pending_organizations()
                .context("Failed to build the organization backlog")?;
            log::info!("{} organizations without membership data", fmt_num(pending.len()));
            BacklogInput::Items(pending)
        }
        None => bail!("--backlog is required for {workflow}"),
    };

    let output_dir = if args.no_archive {
        None
    } else {
        Some(args.output.unwrap_or_else(|| config.output.dir.clone()))
    };

    let pipeline = PipelineConfig {
        refetch: args.refetch,
        output_dir,
        rotate_bytes: config.output.rotate_bytes,
        queue_capacity: config.pipeline.queue_capacity,
        worker: config.worker_config(args.max_retries),
        ..PipelineConfig::new(workflow)
    };

    let cancel = CancellationToken::new();
    let _watcher = bridge_to_token(cancel.clone());

    let result = run_pipeline(
        &pipeline,
        backlog,
        clients,
        Some(&checker),
        Box::new(store),
        &cancel,
        progress,
    );
    // Stops the signal watcher
    cancel.cancel();
    let summary = result?;

    report(workflow, &summary);
    Ok(if summary.interrupted {
        Outcome::Interrupted
    } else {
        Outcome::Completed
    })
}

fn report(workflow: Workflow, summary: &Summary) {
    let mut rows = vec![
        ("Queued", fmt_num(summary.queued)),
        ("Skipped (in database)", fmt_num(summary.skipped)),
        ("Malformed lines", fmt_num(summary.malformed)),
        ("Fetched", fmt_num(summary.fetched)),
        ("Retries", fmt_num(summary.retries)),
        ("Written", fmt_num(summary.writer.written)),
        ("Status only", fmt_num(summary.writer.status_only)),
        ("Identity drift", fmt_num(summary.writer.drifted)),
        ("Archived", fmt_num(summary.writer.archived)),
        ("Database errors", fmt_num(summary.writer.db_errors)),
        ("Dead letters", fmt_num(summary.dead_letters.len())),
    ];
    if let Some(path) = &summary.dead_letter_file {
        rows.push(("Dead letter file", path.display().to_string()));
    }
    for file in &summary.writer.files {
        rows.push(("Archive", file.display().to_string()));
    }
    rows.push(("Elapsed", format!("{:.1}s", summary.elapsed.as_secs_f64())));
    if summary.interrupted {
        rows.push(("Status", "interrupted".to_string()));
    }

    let title = format!("Harvest {workflow}");
    print_summary(&title, &rows);
}
