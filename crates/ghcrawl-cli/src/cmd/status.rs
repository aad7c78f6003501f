//! Status subcommand - database and archive overview

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use ghcrawl_core::import::archive_files;
use ghcrawl_core::{Workflow, fmt_num};
use ghcrawl_store::DuckDbStore;

use super::print_summary;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Archive directory to inspect (default: [output] dir from the config)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let store = DuckDbStore::open(&config.database.path)?;
    let counts = store.counts()?;
    let pending = store.pending_organizations()?.len();

    let as_num = |n: i64| fmt_num(usize::try_from(n).unwrap_or(0));
    let mut rows = vec![
        ("Database", config.database.path.display().to_string()),
        ("Repositories", as_num(counts.repos)),
        ("  fetched", as_num(counts.repos_fetched)),
        ("Users", as_num(counts.users)),
        ("  fetched", as_num(counts.users_fetched)),
        ("Organizations fetched", as_num(counts.organizations_fetched)),
        ("Organizations pending", fmt_num(pending)),
        ("Memberships", as_num(counts.memberships)),
    ];

    let dir = args.dir.unwrap_or_else(|| config.output.dir.clone());
    if dir.is_dir() {
        for workflow in [Workflow::Repos, Workflow::Users, Workflow::Members] {
            let files = archive_files(&dir, workflow)?;
            let bytes: u64 = files
                .iter()
                .filter_map(|f| std::fs::metadata(f).ok())
                .map(|m| m.len())
                .sum();
            rows.push((
                workflow.name(),
                format!("{} archive files, {:.1} MB", files.len(), bytes as f64 / 1e6),
            ));
        }
    } else {
        rows.push(("Archive", format!("{} (missing)", dir.display())));
    }

    print_summary("Status", &rows);
    Ok(())
}
