//! Backlog source: reads candidate items and feeds the bounded request queue

use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::persist::Persistence;
use crate::stream::{LineReader, open_lines};
use crate::types::{WorkItem, Workflow};

/// Where candidate items come from
#[derive(Debug)]
pub enum BacklogInput {
    /// Three-column text file `{ignored} {id} {key}`, optionally `.gz`
    File(PathBuf),
    /// Items already materialized (e.g. queried from the store)
    Items(Vec<WorkItem>),
}

/// Outcome of parsing one backlog line
#[derive(Debug, PartialEq, Eq)]
pub enum BacklogLine {
    Item(WorkItem),
    Malformed,
}

/// Parse a whitespace-separated `{ignored} {id} {key}` line.
///
/// Any other token count, or a non-integer id, is malformed.
pub fn parse_line(line: &str) -> BacklogLine {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 3 {
        return BacklogLine::Malformed;
    }
    match tokens[1].parse::<i64>() {
        Ok(id) => BacklogLine::Item(WorkItem::new(id, tokens[2])),
        Err(_) => BacklogLine::Malformed,
    }
}

/// Counters from one pass over the backlog
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BacklogStats {
    pub queued: usize,
    pub skipped: usize,
    pub malformed: usize,
    /// Stopped early because cancellation fired or the queue closed
    pub stopped_early: bool,
}

enum Source {
    Lines(LineReader),
    Items(std::vec::IntoIter<WorkItem>),
}

/// An opened backlog, ready to be fed into the request queue
pub struct Backlog {
    source: Source,
    label: String,
}

impl std::fmt::Debug for Backlog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backlog")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl BacklogInput {
    /// Open the input. Failure here is fatal and happens before any worker starts.
    pub fn open(self) -> Result<Backlog> {
        match self {
            Self::File(path) => {
                let (reader, _, size) = open_lines(&path)
                    .with_context(|| format!("Cannot open backlog {}", path.display()))?;
                log::info!("Backlog {} ({} bytes)", path.display(), size);
                Ok(Backlog {
                    source: Source::Lines(reader),
                    label: path.display().to_string(),
                })
            }
            Self::Items(items) => {
                log::info!("Backlog of {} queried items", items.len());
                Ok(Backlog {
                    source: Source::Items(items.into_iter()),
                    label: "query".to_string(),
                })
            }
        }
    }
}

impl Backlog {
    fn next_line(&mut self) -> Option<io::Result<BacklogLine>> {
        match &mut self.source {
            Source::Items(items) => items.next().map(|i| Ok(BacklogLine::Item(i))),
            Source::Lines(reader) => {
                let mut buf = String::new();
                match reader.read_line(&mut buf) {
                    Ok(0) => None,
                    Ok(_) => Some(Ok(parse_line(&buf))),
                    // Undecodable bytes only spoil the current line
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        Some(Ok(BacklogLine::Malformed))
                    }
                    Err(e) => Some(Err(e)),
                }
            }
        }
    }

    /// Push items into `requests` until the input is exhausted, cancellation
    /// fires, or every consumer has gone away.
    ///
    /// Unless `refetch` is set, items already known to `checker` are skipped.
    /// Sends block while the queue is full; the wait observes `cancel`.
    pub fn feed(
        mut self,
        workflow: Workflow,
        checker: Option<&dyn Persistence>,
        refetch: bool,
        requests: &mpsc::Sender<WorkItem>,
        cancel: &CancellationToken,
        runtime: &Handle,
    ) -> Result<BacklogStats> {
        let mut stats = BacklogStats::default();

        while let Some(line) = self.next_line() {
            if cancel.is_cancelled() {
                stats.stopped_early = true;
                break;
            }
            let item = match line.with_context(|| format!("Failed reading {}", self.label))? {
                BacklogLine::Item(item) => item,
                BacklogLine::Malformed => {
                    stats.malformed += 1;
                    continue;
                }
            };

            if !refetch && item.has_known_id() {
                if let Some(store) = checker {
                    match store.has_entity(workflow, item.external_id) {
                        Ok(true) => {
                            stats.skipped += 1;
                            continue;
                        }
                        Ok(false) => {}
                        Err(e) => log::warn!(
                            "Failed to query {workflow} status '{}': {e:#}",
                            item.lookup_key
                        ),
                    }
                }
            }

            let sent = runtime.block_on(async {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    r = requests.send(item) => r.is_ok(),
                }
            });
            if !sent {
                stats.stopped_early = true;
                break;
            }
            stats.queued += 1;
        }

        log::info!(
            "Backlog {}: {} queued, {} skipped, {} malformed{}",
            self.label,
            stats.queued,
            stats.skipped,
            stats.malformed,
            if stats.stopped_early {
                " (stopped early)"
            } else {
                ""
            }
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use chrono::{DateTime, Utc};
    use serde_json::Value;
    use tempfile::TempDir;

    use crate::runtime::SHARED_RUNTIME;
    use crate::types::UNKNOWN_ID;

    struct KnownIds(HashSet<i64>);

    impl Persistence for KnownIds {
        fn has_entity(&self, _: Workflow, id: i64) -> Result<bool> {
            Ok(self.0.contains(&id))
        }
        fn upsert_status(
            &mut self,
            _: Workflow,
            _: i64,
            _: &str,
            _: u16,
            _: DateTime<Utc>,
        ) -> Result<()> {
            unreachable!()
        }
        fn upsert_entity(
            &mut self,
            _: Workflow,
            _: &WorkItem,
            _: &Value,
            _: u16,
            _: DateTime<Utc>,
        ) -> Result<()> {
            unreachable!()
        }
    }

    fn feed_all(
        input: BacklogInput,
        checker: Option<&dyn Persistence>,
        refetch: bool,
    ) -> (BacklogStats, Vec<WorkItem>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let cancel = CancellationToken::new();
        let stats = input
            .open()
            .unwrap()
            .feed(
                Workflow::Repos,
                checker,
                refetch,
                &tx,
                &cancel,
                SHARED_RUNTIME.handle(),
            )
            .unwrap();
        drop(tx);
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        (stats, items)
    }

    #[test]
    fn parse_three_columns() {
        assert_eq!(
            parse_line("repo 42 octo/cat\n"),
            BacklogLine::Item(WorkItem::new(42, "octo/cat"))
        );
    }

    #[test]
    fn parse_wrong_token_count() {
        assert_eq!(parse_line("42 octo/cat"), BacklogLine::Malformed);
        assert_eq!(parse_line("a 42 octo/cat extra"), BacklogLine::Malformed);
        assert_eq!(parse_line(""), BacklogLine::Malformed);
    }

    #[test]
    fn parse_non_numeric_id() {
        assert_eq!(parse_line("x abc octo/cat"), BacklogLine::Malformed);
    }

    #[test]
    fn file_backlog_skips_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backlog.txt");
        std::fs::write(&path, "x 1 a/a\nbroken line\nx 2 b/b\n\nx 3 c/c\n").unwrap();

        let (stats, items) = feed_all(BacklogInput::File(path), None, false);
        assert_eq!(stats.queued, 3);
        assert_eq!(stats.malformed, 2);
        assert_eq!(
            items.iter().map(|i| i.external_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn known_items_skipped_unless_refetch() {
        let known = KnownIds(HashSet::from([2]));
        let input = || {
            BacklogInput::Items(vec![
                WorkItem::new(1, "a"),
                WorkItem::new(2, "b"),
                WorkItem::new(UNKNOWN_ID, "c"),
            ])
        };

        let (stats, items) = feed_all(input(), Some(&known), false);
        assert_eq!(stats.skipped, 1);
        assert_eq!(items.len(), 2);

        let (stats, items) = feed_all(input(), Some(&known), true);
        assert_eq!(stats.skipped, 0);
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = BacklogInput::File(dir.path().join("missing.gz"))
            .open()
            .unwrap_err();
        assert!(format!("{err:#}").contains("Cannot open backlog"));
    }

    #[test]
    fn cancelled_feed_stops_early() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = BacklogInput::Items(vec![WorkItem::new(1, "a"), WorkItem::new(2, "b")])
            .open()
            .unwrap()
            .feed(
                Workflow::Users,
                None,
                false,
                &tx,
                &cancel,
                SHARED_RUNTIME.handle(),
            )
            .unwrap();
        assert!(stats.stopped_early);
        assert_eq!(stats.queued, 0);
    }

    #[test]
    fn closed_queue_stops_early() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let cancel = CancellationToken::new();
        let stats = BacklogInput::Items(vec![WorkItem::new(1, "a")])
            .open()
            .unwrap()
            .feed(
                Workflow::Users,
                None,
                false,
                &tx,
                &cancel,
                SHARED_RUNTIME.handle(),
            )
            .unwrap();
        assert!(stats.stopped_early);
    }

    #[test]
    fn full_queue_blocks_feed() {
        let (tx, mut rx) = mpsc::channel(2);
        let cancel = CancellationToken::new();
        let items = (1..=5).map(|i| WorkItem::new(i, format!("u{i}"))).collect();
        let backlog = BacklogInput::Items(items).open().unwrap();
        let feeder = std::thread::spawn(move || {
            backlog
                .feed(
                    Workflow::Users,
                    None,
                    false,
                    &tx,
                    &cancel,
                    SHARED_RUNTIME.handle(),
                )
                .unwrap()
        });

        std::thread::sleep(std::time::Duration::from_millis(200));
        assert!(!feeder.is_finished(), "feed returned with a full queue");

        let received: Vec<i64> = (0..5)
            .map(|_| rx.blocking_recv().unwrap().external_id)
            .collect();
        assert_eq!(received, vec![1, 2, 3, 4, 5]);
        let stats = feeder.join().unwrap();
        assert_eq!(stats.queued, 5);
        assert!(!stats.stopped_early);
    }
}
