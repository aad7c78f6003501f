//! Local line streams over plain or gzip-compressed files.
//!
//! Backlogs and archive files are both line-oriented; a `.gz` suffix selects
//! gzip decoding. Readers count raw bytes consumed for progress reporting.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::read::MultiGzDecoder;

/// Buffer size for line readers (256KB)
const READ_BUF_SIZE: usize = 256 * 1024;

/// Shared byte counter for progress tracking
pub type ByteCounter = Arc<AtomicU64>;

/// Buffered line reader over a plain or decompressed file
pub type LineReader = Box<dyn BufRead + Send>;

/// Reader wrapper that tracks bytes read
pub struct CountingReader<R> {
    inner: R,
    count: ByteCounter,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

fn is_gzip_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Open `path` as a line stream, decompressing when it ends in `.gz`.
///
/// The first buffer is filled eagerly so a missing file or a corrupt gzip
/// header surfaces here rather than on the first line.
///
/// Returns (reader, byte_counter, file_size)
pub fn open_lines(path: &Path) -> io::Result<(LineReader, ByteCounter, u64)> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let counter = Arc::new(AtomicU64::new(0));
    let counting = CountingReader {
        inner: file,
        count: counter.clone(),
    };

    let mut reader: LineReader = if is_gzip_path(path) {
        Box::new(BufReader::with_capacity(
            READ_BUF_SIZE,
            MultiGzDecoder::new(counting),
        ))
    } else {
        Box::new(BufReader::with_capacity(READ_BUF_SIZE, counting))
    };
    reader.fill_buf()?;

    Ok((reader, counter, size))
}

/// Check that a file is a complete gzip stream (header through trailer)
pub fn is_complete_gzip(path: &Path) -> bool {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut decoder = MultiGzDecoder::new(BufReader::new(file));
    io::copy(&mut decoder, &mut io::sink()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    fn write_gz(path: &Path, content: &str) {
        let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        enc.write_all(content.as_bytes()).unwrap();
        enc.finish().unwrap();
    }

    #[test]
    fn plain_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backlog.txt");
        std::fs::write(&path, "a\nb\n").unwrap();

        let (reader, counter, size) = open_lines(&path).unwrap();
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(size, 4);
        assert_eq!(counter.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn gzip_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backlog.txt.gz");
        write_gz(&path, "x 1 a/b\nx 2 c/d\n");

        let (reader, _, _) = open_lines(&path).unwrap();
        assert_eq!(reader.lines().count(), 2);
    }

    #[test]
    fn missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(open_lines(&dir.path().join("nope.gz")).is_err());
    }

    #[test]
    fn corrupt_gzip_fails_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();
        assert!(open_lines(&path).is_err());
    }

    #[test]
    fn complete_gzip_detection() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.json.gz");
        write_gz(&good, "{}\n");
        assert!(is_complete_gzip(&good));

        let bytes = std::fs::read(&good).unwrap();
        let truncated = dir.path().join("truncated.json.gz");
        std::fs::write(&truncated, &bytes[..bytes.len() - 4]).unwrap();
        assert!(!is_complete_gzip(&truncated));

        assert!(!is_complete_gzip(&dir.path().join("missing.json.gz")));
    }
}
