//! Append-only log file writer.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// `~/.login-handshake/logs/handshake.jsonl`, if there is a home directory.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".login-handshake")
            .join("logs")
            .join("handshake.jsonl")
    })
}

/// Shared handle to the log file. Clones write to the same buffer, and each
/// write is flushed so lines from concurrent processes do not interleave.
#[derive(Clone)]
pub struct LogFileWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl LogFileWriter {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for LogFileWriter {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deeply").join("nested").join("h.jsonl");

        assert!(LogFileWriter::open(&path).is_ok());
        assert!(path.exists());
    }

    #[test]
    fn test_writes_append_and_are_visible_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.jsonl");
        std::fs::write(&path, "existing\n").unwrap();

        let mut writer = LogFileWriter::open(&path).unwrap();
        let mut clone = writer.make_writer();
        writer.write_all(b"first\n").unwrap();
        clone.write_all(b"second\n").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "existing\nfirst\nsecond\n");
    }

    #[test]
    fn test_default_path_layout() {
        if let Some(path) = default_log_path() {
            assert!(path.ends_with(".login-handshake/logs/handshake.jsonl"));
        }
    }
}
