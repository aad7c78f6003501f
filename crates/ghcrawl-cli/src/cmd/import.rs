//! Import subcommand - replay archived JSON into the database

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use tokio_util::sync::CancellationToken;

use ghcrawl_core::{SharedProgress, Workflow, bridge_to_token, fmt_num, import_archive};
use ghcrawl_store::DuckDbStore;

use super::{Outcome, print_summary};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Which archive files to replay
    #[arg(short, long, value_enum)]
    pub workflow: WorkflowArg,

    /// Archive directory (default: [output] dir from the config)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum WorkflowArg {
    Repos,
    Users,
    Members,
}

impl From<WorkflowArg> for Workflow {
    fn from(w: WorkflowArg) -> Self {
        match w {
            WorkflowArg::Repos => Workflow::Repos,
            WorkflowArg::Users => Workflow::Users,
            WorkflowArg::Members => Workflow::Members,
        }
    }
}

pub fn run(args: ImportArgs, config: &Config, progress: &SharedProgress) -> Result<Outcome> {
    let workflow = Workflow::from(args.workflow);
    let dir = args.dir.unwrap_or_else(|| config.output.dir.clone());
    let mut store = DuckDbStore::open(&config.database.path)?;

    let cancel = CancellationToken::new();
    let _watcher = bridge_to_token(cancel.clone());
    let result = import_archive(&dir, workflow, &mut store, &cancel, progress);
    cancel.cancel();
    let summary = result?;

    print_summary(
        &format!("Import {workflow}"),
        &[
            ("Directory", dir.display().to_string()),
            ("Files", fmt_num(summary.files)),
            ("Skipped files", fmt_num(summary.skipped_files)),
            ("Records", fmt_num(summary.records)),
            ("Database errors", fmt_num(summary.db_errors)),
        ],
    );
    Ok(if summary.interrupted {
        Outcome::Interrupted
    } else {
        Outcome::Completed
    })
}
