//! Rotating gzip NDJSON archive with atomic tmp→rename

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::Value;

/// Rotate once this many uncompressed bytes went into the current file
pub const DEFAULT_ROTATE_BYTES: u64 = 100_000_000;

const WRITE_BUF_SIZE: usize = 256 * 1024;

/// One open archive file; bytes are counted before compression
struct OutputFile {
    encoder: GzEncoder<BufWriter<File>>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

impl std::fmt::Debug for OutputFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputFile")
            .field("final_path", &self.final_path)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl OutputFile {
    fn create(final_path: PathBuf) -> io::Result<Self> {
        let mut tmp_name = final_path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = final_path.with_file_name(tmp_name);
        let file = File::create(&tmp_path)?;
        Ok(Self {
            encoder: GzEncoder::new(
                BufWriter::with_capacity(WRITE_BUF_SIZE, file),
                Compression::default(),
            ),
            tmp_path,
            final_path,
            bytes_written: 0,
        })
    }

    /// Append one line plus its newline
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.encoder.write_all(line)?;
        self.encoder.write_all(b"\n")?;
        self.bytes_written += line.len() as u64 + 1;
        Ok(())
    }

    /// Finish the gzip stream, sync and atomically rename tmp → final
    fn close(self) -> io::Result<PathBuf> {
        let buffered = self.encoder.finish()?;
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(self.final_path)
    }
}

/// Size-rotated sequence of `{prefix}_{unix_ts}.json.gz` files.
///
/// A file is opened lazily on the first append after creation or rotation.
#[derive(Debug)]
pub struct RotatingSink {
    dir: PathBuf,
    prefix: String,
    threshold: u64,
    current: Option<OutputFile>,
    last_ts: i64,
    closed: Vec<PathBuf>,
}

impl RotatingSink {
    pub fn new(dir: &Path, prefix: &str, threshold: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        report_stale_tmp_files(dir, prefix)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            threshold: threshold.max(1),
            current: None,
            last_ts: i64::MIN,
            closed: Vec::new(),
        })
    }

    /// Serialize `record` as one line; rotate when the threshold is reached
    pub fn append(&mut self, record: &Value) -> io::Result<()> {
        let line = serde_json::to_vec(record)?;
        let file = match self.current.take() {
            Some(file) => file,
            None => self.open_next()?,
        };
        let file = self.current.insert(file);
        file.write_line(&line)?;

        if file.bytes_written >= self.threshold {
            self.rotate()?;
        }
        Ok(())
    }

    /// Close the current file; the next append opens a fresh one
    pub fn rotate(&mut self) -> io::Result<()> {
        if let Some(file) = self.current.take() {
            let bytes = file.bytes_written;
            let path = file.close()?;
            log::info!("Closed {} ({} bytes)", path.display(), bytes);
            self.closed.push(path);
        }
        Ok(())
    }

    /// Close any open file and return every file this sink produced
    pub fn finish(mut self) -> io::Result<Vec<PathBuf>> {
        self.rotate()?;
        Ok(self.closed)
    }

    fn open_next(&mut self) -> io::Result<OutputFile> {
        // Two rotations within one second would collide; take the next free second
        let mut ts = Utc::now().timestamp().max(self.last_ts + 1);
        let mut path = self.file_path(ts);
        while path.exists() || tmp_sibling(&path).exists() {
            ts += 1;
            path = self.file_path(ts);
        }
        self.last_ts = ts;
        log::debug!("Opening {}", path.display());
        OutputFile::create(path)
    }

    fn file_path(&self, ts: i64) -> PathBuf {
        self.dir.join(format!("{}_{ts}.json.gz", self.prefix))
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Warn about `.tmp` files left by a crashed run. They are kept for inspection.
pub fn report_stale_tmp_files(dir: &Path, prefix: &str) -> io::Result<Vec<PathBuf>> {
    let mut stale = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path.file_name().and_then(|n| n.to_str()).is_some_and(|name| {
            name.starts_with(prefix) && name.ends_with(".tmp")
        });
        if matches {
            log::warn!("Stale tmp file from an interrupted run: {}", path.display());
            stale.push(path);
        }
    }
    Ok(stale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    use flate2::read::MultiGzDecoder;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::stream::is_complete_gzip;

    fn read_lines(path: &Path) -> Vec<String> {
        let reader = BufReader::new(MultiGzDecoder::new(File::open(path).unwrap()));
        reader.lines().map(|l| l.unwrap()).collect()
    }

    #[test]
    fn append_then_finish_renames() {
        let dir = TempDir::new().unwrap();
        let mut sink = RotatingSink::new(dir.path(), "github_repos", DEFAULT_ROTATE_BYTES).unwrap();
        sink.append(&json!({"id": 1})).unwrap();
        sink.append(&json!({"id": 2})).unwrap();
        let files = sink.finish().unwrap();

        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("github_repos_") && name.ends_with(".json.gz"));
        assert!(is_complete_gzip(&files[0]));
        assert_eq!(read_lines(&files[0]), vec![r#"{"id":1}"#, r#"{"id":2}"#]);
        assert!(report_stale_tmp_files(dir.path(), "github_repos").unwrap().is_empty());
    }

    #[test]
    fn no_appends_no_files() {
        let dir = TempDir::new().unwrap();
        let sink = RotatingSink::new(dir.path(), "github_users", 10).unwrap();
        assert!(sink.finish().unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn rotation_bounds_file_size() {
        let dir = TempDir::new().unwrap();
        let threshold = 200;
        let mut sink = RotatingSink::new(dir.path(), "github_users", threshold).unwrap();
        let mut max_record = 0;
        for i in 0..50 {
            let record = json!({"id": i, "login": "x".repeat(i % 17)});
            max_record = max_record.max(serde_json::to_vec(&record).unwrap().len() as u64 + 1);
            sink.append(&record).unwrap();
        }
        let files = sink.finish().unwrap();
        assert!(files.len() > 2);

        let mut total_lines = 0;
        for (i, path) in files.iter().enumerate() {
            let lines = read_lines(path);
            total_lines += lines.len();
            let size: u64 = lines.iter().map(|l| l.len() as u64 + 1).sum();
            if i + 1 < files.len() {
                assert!(size >= threshold, "{} is {size} bytes", path.display());
                assert!(size < threshold + max_record);
            }
        }
        assert_eq!(total_lines, 50);

        let mut names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        names.dedup();
        assert_eq!(names.len(), files.len());
    }

    #[test]
    fn existing_name_bumps_timestamp() {
        let dir = TempDir::new().unwrap();
        let ts = Utc::now().timestamp();
        for t in ts..ts + 3 {
            fs::write(dir.path().join(format!("github_repos_{t}.json.gz")), b"old").unwrap();
        }
        let mut sink = RotatingSink::new(dir.path(), "github_repos", 1_000).unwrap();
        sink.append(&json!({"id": 1})).unwrap();
        let files = sink.finish().unwrap();
        assert_eq!(read_lines(&files[0]).len(), 1);
        for t in ts..ts + 3 {
            assert_eq!(
                fs::read(dir.path().join(format!("github_repos_{t}.json.gz"))).unwrap(),
                b"old"
            );
        }
    }

    #[test]
    fn stale_tmp_reported_not_removed() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("github_users_1.json.gz.tmp");
        fs::write(&stale, b"partial").unwrap();
        fs::write(dir.path().join("other.tmp"), b"unrelated").unwrap();

        let found = report_stale_tmp_files(dir.path(), "github_users").unwrap();
        assert_eq!(found, vec![stale.clone()]);
        RotatingSink::new(dir.path(), "github_users", 10).unwrap();
        assert!(stale.exists());
    }
}
