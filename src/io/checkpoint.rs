//! Durable "next unread position" cursor for the source dataset.
//!
//! The cursor file holds two lines: the number of source lines already
//! consumed, then the byte offset where the next unread line starts. Every
//! write replaces the whole file through a temp-file rename so a reader never
//! observes half a pair.

use std::io::Write;
use std::path::{Path, PathBuf};

use atomic_write_file::AtomicWriteFile;
use serde::{Deserialize, Serialize};

use crate::constants::CHECKPOINT_LOCK_SUFFIX;
use crate::error::{CellfetchError, Result};
use crate::lock::FileLock;

/// Position of the first unread record in the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Physical lines consumed so far, i.e. the 0-based index of the next unread line.
    pub line_number: u64,
    /// Exact byte offset of that line.
    pub byte_offset: u64,
}

impl Checkpoint {
    #[must_use]
    pub fn new(line_number: u64, byte_offset: u64) -> Self {
        Self {
            line_number,
            byte_offset,
        }
    }
}

/// Single-writer cursor store. Holds an exclusive lock on `<path>.lck`.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    _lock: FileLock,
    writes: u64,
}

impl CheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(CHECKPOINT_LOCK_SUFFIX);
        let lock = FileLock::acquire(Path::new(&lock_path))?;
        Ok(Self {
            path,
            _lock: lock,
            writes: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of writes performed through this handle.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Current cursor, `{0, 0}` when nothing has been persisted yet.
    pub fn read(&self) -> Result<Checkpoint> {
        let raw = match fs_err::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Checkpoint::default());
            }
            Err(err) => return Err(err.into()),
        };
        let mut lines = raw.lines();
        let line_number = self.parse_field(lines.next(), "line number")?;
        let byte_offset = self.parse_field(lines.next(), "byte offset")?;
        Ok(Checkpoint::new(line_number, byte_offset))
    }

    /// Replace the persisted cursor.
    pub fn write(&mut self, line_number: u64, byte_offset: u64) -> Result<()> {
        let mut file = AtomicWriteFile::options().open(&self.path)?;
        write!(file, "{line_number}\n{byte_offset}\n")?;
        file.commit()?;
        self.writes += 1;
        tracing::trace!(
            target: "cellfetch::checkpoint",
            line = line_number,
            offset = byte_offset,
            "cursor persisted"
        );
        Ok(())
    }

    fn parse_field(&self, raw: Option<&str>, what: &str) -> Result<u64> {
        let value = raw.map(str::trim).unwrap_or_default();
        if value.is_empty() {
            return Ok(0);
        }
        value
            .parse::<u64>()
            .map_err(|err| CellfetchError::CheckpointCorrupt {
                path: self.path.clone(),
                reason: format!("{what} `{value}`: {err}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fresh_store_reads_origin() {
        let dir = TempDir::new().expect("temp dir");
        let store = CheckpointStore::open(dir.path().join("cursor")).expect("open");
        assert_eq!(store.read().expect("read"), Checkpoint::default());
    }

    #[test]
    fn write_then_reopen_round_trips() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("cursor");
        {
            let mut store = CheckpointStore::open(&path).expect("open");
            store.write(41, 1_234).expect("write");
            store.write(42, 1_300).expect("overwrite");
            assert_eq!(store.writes(), 2);
        }
        let store = CheckpointStore::open(&path).expect("reopen");
        assert_eq!(store.read().expect("read"), Checkpoint::new(42, 1_300));
        assert_eq!(
            std::fs::read_to_string(&path).expect("raw"),
            "42\n1300\n"
        );
    }

    #[test]
    fn tolerates_legacy_single_line_and_missing_newline() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("cursor");
        let store = CheckpointStore::open(&path).expect("open");

        std::fs::write(&path, "7").expect("seed");
        assert_eq!(store.read().expect("read"), Checkpoint::new(7, 0));

        std::fs::write(&path, "7\n99").expect("seed");
        assert_eq!(store.read().expect("read"), Checkpoint::new(7, 99));
    }

    #[test]
    fn garbage_is_fatal() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("cursor");
        let store = CheckpointStore::open(&path).expect("open");
        std::fs::write(&path, "seven\n99\n").expect("seed");
        assert!(matches!(
            store.read(),
            Err(CellfetchError::CheckpointCorrupt { .. })
        ));
    }

    #[test]
    fn second_store_on_same_cursor_is_locked_out() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("cursor");
        let _first = CheckpointStore::open(&path).expect("open");
        assert!(matches!(
            CheckpointStore::open(&path),
            Err(CellfetchError::Lock { .. })
        ));
    }
}
