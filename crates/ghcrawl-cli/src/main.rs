//! ghcrawl - harvest GitHub repositories, users and organization members
//!
//! Backlogs are fetched concurrently (one worker per API token) and persisted
//! to DuckDB plus a rotating gzip JSON archive.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use ghcrawl_core::Workflow;

mod cmd;
mod config;

use cmd::Outcome;
use config::Config;

/// Exit code after a signal-initiated drain
const EXIT_INTERRUPTED: u8 = 130;
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "ghcrawl")]
#[command(about = "Harvest GitHub repositories, users and organization members")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./ghcrawl.toml or ~/.config/ghcrawl/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch repositories listed in a backlog of `<tag> <id> <owner/name>` lines
    Repos(cmd::harvest::HarvestArgs),
    /// Fetch users listed in a backlog of `<tag> <id> <login>` lines
    Users(cmd::harvest::HarvestArgs),
    /// Fetch organization members (backlog defaults to organizations in the database)
    Members(cmd::harvest::HarvestArgs),
    /// Load archived JSON files into the database
    Import(cmd::import::ImportArgs),
    /// Show database and archive counts
    Status(cmd::status::StatusArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let progress = Arc::new(ghcrawl_core::ProgressContext::new());

    // Logging:
    //   TTY:     warn unless --debug, progress bars show activity
    //   non-TTY: info unless --quiet/--debug
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = cli.quiet || (is_tty && !cli.debug);
    ghcrawl_core::init_logging(quiet, cli.debug, multi);

    match run(cli, &progress) {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::Interrupted) => {
            log::warn!("Interrupted, partial results were saved");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn run(cli: Cli, progress: &ghcrawl_core::SharedProgress) -> Result<Outcome> {
    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Repos(args) => harvest(Workflow::Repos, args, &config, progress),
        Command::Users(args) => harvest(Workflow::Users, args, &config, progress),
        Command::Members(args) => harvest(Workflow::Members, args, &config, progress),
        Command::Import(args) => {
            ghcrawl_core::install_signal_handlers()?;
            cmd::import::run(args, &config, progress)
        }
        Command::Status(args) => cmd::status::run(args, &config).map(|()| Outcome::Completed),
        Command::Config => {
            show_config(&config);
            Ok(Outcome::Completed)
        }
    }
}

fn harvest(
    workflow: Workflow,
    args: cmd::harvest::HarvestArgs,
    config: &Config,
    progress: &ghcrawl_core::SharedProgress,
) -> Result<Outcome> {
    ghcrawl_core::install_signal_handlers()?;
    cmd::harvest::run(workflow, args, config, progress)
}

fn show_config(config: &Config) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec![
        "Database",
        &config.database.path.display().to_string(),
    ]);
    table.add_row(vec![
        "Archive directory",
        &config.output.dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Rotate after",
        &format!("{} bytes", config.output.rotate_bytes),
    ]);
    table.add_row(vec!["API base URL", &config.api.base_url]);
    table.add_row(vec!["User agent", &config.api.user_agent]);
    table.add_row(vec![
        "Request timeout",
        &format!("{}s", config.api.request_timeout),
    ]);
    table.add_row(vec![
        "Queue capacity",
        &config.pipeline.queue_capacity.to_string(),
    ]);
    table.add_row(vec![
        "Quota floor",
        &format!(
            "{} calls (+{}s after reset)",
            config.pipeline.quota_floor, config.pipeline.quota_buffer
        ),
    ]);
    table.add_row(vec!["Max retries", &config.pipeline.max_retries.to_string()]);

    let credentials = config.credentials();
    let accounts = if credentials.is_empty() {
        "not set".to_string()
    } else {
        credentials
            .iter()
            .map(|c| c.account.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    table.add_row(vec!["Credentials", &accounts]);

    eprintln!("\n{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_harvest_flags() {
        let cli = Cli::try_parse_from([
            "ghcrawl", "repos", "--backlog", "repos.txt", "--refetch", "--max-retries", "1",
        ])
        .unwrap();
        match cli.command {
            Command::Repos(args) => {
                assert_eq!(args.backlog.as_deref(), Some(std::path::Path::new("repos.txt")));
                assert!(args.refetch);
                assert_eq!(args.max_retries, Some(1));
                assert!(!args.no_archive);
            }
            _ => panic!("expected repos"),
        }
    }

    #[test]
    fn help_describes_three_column_backlog() {
        use clap::CommandFactory;
        use ghcrawl_core::backlog::{BacklogLine, parse_line};

        let cli = Cli::command();
        let repos = cli.find_subcommand("repos").unwrap();
        let about = repos.get_about().unwrap().to_string();
        assert!(about.contains("<tag> <id> <owner/name>"), "{about}");
        let backlog = repos
            .get_arguments()
            .find(|a| a.get_id() == "backlog")
            .unwrap();
        let help = backlog.get_help().unwrap().to_string();
        assert!(help.contains("<tag> <id> <key>"), "{help}");

        assert_eq!(
            parse_line("repo 42 octo/cat"),
            BacklogLine::Item(ghcrawl_core::WorkItem::new(42, "octo/cat"))
        );
        assert_eq!(parse_line("42 octo/cat"), BacklogLine::Malformed);
    }

    #[test]
    fn members_backlog_is_optional() {
        let cli = Cli::try_parse_from(["ghcrawl", "members", "--debug"]).unwrap();
        assert!(cli.debug);
        assert!(matches!(cli.command, Command::Members(ref a) if a.backlog.is_none()));
    }

    #[test]
    fn archive_flags_conflict() {
        assert!(
            Cli::try_parse_from(["ghcrawl", "users", "--no-archive", "--output", "out"]).is_err()
        );
    }

    #[test]
    fn import_requires_workflow() {
        assert!(Cli::try_parse_from(["ghcrawl", "import"]).is_err());
        let cli = Cli::try_parse_from(["ghcrawl", "import", "-w", "members"]).unwrap();
        match cli.command {
            Command::Import(args) => {
                assert_eq!(Workflow::from(args.workflow), Workflow::Members)
            }
            _ => panic!("expected import"),
        }
    }
}
