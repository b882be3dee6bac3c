//! Streaming reader over the identifier dataset, kept byte-exact with the cursor.
//!
//! Responsibilities:
//! - Seek to the persisted byte offset and emit rows from there to EOF.
//! - Advance the cursor exactly once per emitted row, only after the caller
//!   has taken the row (`advance`, or implicitly on the next pull).
//! - Count bytes as they are read so the stored offset is never an estimate.

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::constants::SOURCE_FIELDS;
use crate::error::Result;
use crate::io::checkpoint::{Checkpoint, CheckpointStore};
use crate::types::{CellIdentifier, WorkItem};

/// One row pulled from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    /// Line label: the cursor's line value when this row was reached, or 1
    /// for the first line of the file. A resumed run's first row therefore
    /// carries the stored cursor line.
    pub line_number: u64,
    /// 0-based physical index of this line.
    pub line_index: u64,
    pub identifier: CellIdentifier,
    /// Offset of the first byte of this line.
    pub byte_offset: u64,
    /// Length of the line including its terminator.
    pub byte_len: u64,
    /// Row text without the line terminator.
    pub raw: String,
}

impl SourceItem {
    #[must_use]
    pub fn into_work(self) -> WorkItem {
        let origin = Checkpoint::new(self.line_index, self.byte_offset);
        WorkItem::new(self.line_number, self.identifier).with_origin(origin)
    }
}

/// Lazy, finite, non-restartable reader driving the [`CheckpointStore`].
#[derive(Debug)]
pub struct SourceReader {
    path: PathBuf,
    reader: BufReader<fs_err::File>,
    store: CheckpointStore,
    /// Position after the last committed row.
    committed: Checkpoint,
    /// Position after the last row handed out (runs ahead of `committed`).
    read_pos: Checkpoint,
    pending: Option<Checkpoint>,
    finished: bool,
    buf: Vec<u8>,
}

impl SourceReader {
    /// Open `path` and position it at the store's persisted cursor.
    pub fn open(path: impl AsRef<Path>, store: CheckpointStore) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let start = store.read()?;
        let mut file = fs_err::File::open(&path)?;
        let len = file.metadata()?.len();
        if start.byte_offset > len {
            tracing::warn!(
                source = %path.display(),
                offset = start.byte_offset,
                len,
                "cursor points past end of source; nothing left to read"
            );
        }
        file.seek(SeekFrom::Start(start.byte_offset))?;
        tracing::info!(
            source = %path.display(),
            line = start.line_number,
            offset = start.byte_offset,
            "source opened at cursor"
        );
        Ok(Self {
            path,
            reader: BufReader::new(file),
            store,
            committed: start,
            read_pos: start,
            pending: None,
            finished: false,
            buf: Vec::with_capacity(64),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last persisted position.
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        self.committed
    }

    #[must_use]
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    #[must_use]
    pub fn into_store(self) -> CheckpointStore {
        self.store
    }

    /// True once EOF was reached and the final cursor write happened.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Persist the position after the most recently emitted row.
    /// A no-op when that row was already committed.
    pub fn advance(&mut self) -> Result<()> {
        if let Some(next) = self.pending.take() {
            self.store.write(next.line_number, next.byte_offset)?;
            self.committed = next;
            tracing::debug!(
                target: "cellfetch::source",
                line = next.line_number,
                offset = next.byte_offset,
                "next line"
            );
        }
        Ok(())
    }

    /// Pull the next row. Commits the previous row's advance first.
    pub fn next_item(&mut self) -> Result<Option<SourceItem>> {
        self.advance()?;
        if self.finished {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            let read = self.reader.read_until(b'\n', &mut self.buf)? as u64;
            if read == 0 {
                return self.finish().map(|()| None);
            }
            let start = self.read_pos;
            let next = Checkpoint::new(start.line_number + 1, start.byte_offset + read);
            self.read_pos = next;

            let text = String::from_utf8_lossy(&self.buf);
            let row = text.trim_end_matches(['\n', '\r']);
            if row.trim().is_empty() || is_header(row) {
                tracing::debug!(line = start.line_number, "skipping blank or header row");
                continue;
            }

            self.pending = Some(next);
            return Ok(Some(SourceItem {
                line_number: start.line_number.max(1),
                line_index: start.line_number,
                identifier: CellIdentifier::from_row(row),
                byte_offset: start.byte_offset,
                byte_len: read,
                raw: row.to_string(),
            }));
        }
    }

    /// Move the cursor back to `position` and persist it. Later pulls read
    /// from there again. A row emitted but not yet advanced past is released
    /// either way; positions past the committed cursor are otherwise ignored.
    pub fn rewind(&mut self, position: Checkpoint) -> Result<()> {
        if position.byte_offset >= self.committed.byte_offset {
            if self.pending.take().is_some() {
                self.reader.seek(SeekFrom::Start(self.committed.byte_offset))?;
                self.read_pos = self.committed;
                self.finished = false;
            }
            return Ok(());
        }
        self.pending = None;
        self.store.write(position.line_number, position.byte_offset)?;
        self.reader.seek(SeekFrom::Start(position.byte_offset))?;
        tracing::info!(
            source = %self.path.display(),
            from_line = self.committed.line_number,
            line = position.line_number,
            offset = position.byte_offset,
            "cursor rewound to earliest unfinished row"
        );
        self.committed = position;
        self.read_pos = position;
        self.finished = false;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        let end = self.read_pos;
        self.store.write(end.line_number, end.byte_offset)?;
        self.committed = end;
        tracing::info!(
            source = %self.path.display(),
            line = end.line_number,
            offset = end.byte_offset,
            "end of source"
        );
        Ok(())
    }
}

impl Iterator for SourceReader {
    type Item = Result<SourceItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}

fn is_header(row: &str) -> bool {
    let mut fields = row.split(',').map(str::trim);
    SOURCE_FIELDS
        .iter()
        .all(|expected| fields.next().is_some_and(|f| f.eq_ignore_ascii_case(expected)))
        && fields.next().is_none()
}

/// Byte offset where 0-based physical line `line` starts, or the file length
/// when the file has fewer lines.
pub fn position_of_line(path: impl AsRef<Path>, line: u64) -> Result<u64> {
    let mut reader = BufReader::new(fs_err::File::open(path.as_ref())?);
    let mut buf = Vec::new();
    let mut offset = 0u64;
    for _ in 0..line {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        offset += read as u64;
    }
    Ok(offset)
}
