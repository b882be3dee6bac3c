//! Append-only output dataset.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::constants::{KEY_FIELD, OUTPUT_FIELDS};
use crate::error::{CellfetchError, Result};
use crate::types::CellRecord;

/// Appends resolved records, one flushed row per write.
///
/// The writer never rewrites or deduplicates earlier rows; callers must not
/// hand it the same resolved record twice.
#[derive(Debug)]
pub struct SinkWriter {
    path: PathBuf,
    file: fs_err::File,
    with_key: bool,
    rows: u64,
}

impl SinkWriter {
    /// Open (or create) `path` for appending. Writes the header into an empty
    /// file; refuses a non-empty file whose header has different columns.
    pub fn open(path: impl AsRef<Path>, with_key: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }
        let expected = header_line(with_key);
        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        if file.metadata()?.len() == 0 {
            writeln!(file, "{expected}")?;
            file.flush()?;
        } else {
            let mut existing = String::new();
            BufReader::new(fs_err::File::open(&path)?).read_line(&mut existing)?;
            let found = existing.trim_end_matches(['\n', '\r']);
            if found != expected {
                return Err(CellfetchError::SinkHeaderMismatch {
                    path,
                    expected,
                    found: found.to_string(),
                });
            }
        }
        tracing::info!(output = %path.display(), with_key, "output opened");
        Ok(Self {
            path,
            file,
            with_key,
            rows: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written through this handle.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn write(&mut self, record: &CellRecord) -> Result<()> {
        let line = self.render(record);
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.rows += 1;
        tracing::debug!(target: "cellfetch::sink", row = %line.trim_end(), "record written");
        Ok(())
    }

    fn render(&self, record: &CellRecord) -> String {
        let id = record.identifier;
        let number = |value: Option<u32>| value.map(|v| v.to_string()).unwrap_or_default();
        let mut fields: Vec<String> = Vec::with_capacity(OUTPUT_FIELDS.len() + 1);
        if self.with_key {
            fields.push(record.key.clone().unwrap_or_default());
        }
        fields.extend([
            number(id.mcc),
            number(id.mnc),
            number(id.lac),
            number(id.cid),
            record.lat.clone(),
            record.lon.clone(),
            record.address.clone(),
            record.radius.clone(),
        ]);
        let mut line = fields
            .iter()
            .map(|field| escape(field))
            .collect::<Vec<_>>()
            .join(",");
        line.push('\n');
        line
    }
}

fn header_line(with_key: bool) -> String {
    let mut columns: Vec<&str> = Vec::with_capacity(OUTPUT_FIELDS.len() + 1);
    if with_key {
        columns.push(KEY_FIELD);
    }
    columns.extend(OUTPUT_FIELDS);
    columns.join(",")
}

/// Quote a field when it holds a delimiter, quote or line break.
fn escape(field: &str) -> std::borrow::Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\"")).into()
    } else {
        field.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellIdentifier;
    use tempfile::TempDir;

    fn record(address: &str) -> CellRecord {
        CellRecord {
            key: Some("1cc00000000000200001559".into()),
            identifier: CellIdentifier::new(460, 0, 2, 5465),
            lat: "31.23".into(),
            lon: "121.47".into(),
            address: address.into(),
            radius: "500".into(),
        }
    }

    #[test]
    fn header_written_once_across_reopens() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("results").join("out.csv");
        {
            let mut sink = SinkWriter::open(&path, false).expect("open");
            sink.write(&record("Shanghai")).expect("write");
        }
        {
            let mut sink = SinkWriter::open(&path, false).expect("reopen");
            sink.write(&record("Beijing")).expect("write");
            assert_eq!(sink.rows(), 1);
        }
        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(
            contents,
            "mcc,mnc,lac,cid,lat,lon,address,radius\n\
             460,0,2,5465,31.23,121.47,Shanghai,500\n\
             460,0,2,5465,31.23,121.47,Beijing,500\n"
        );
    }

    #[test]
    fn key_column_leads_when_enabled() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("out.csv");
        let mut sink = SinkWriter::open(&path, true).expect("open");
        sink.write(&record("Shanghai")).expect("write");
        let contents = std::fs::read_to_string(&path).expect("read");
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some("key,mcc,mnc,lac,cid,lat,lon,address,radius")
        );
        assert_eq!(
            lines.next(),
            Some("1cc00000000000200001559,460,0,2,5465,31.23,121.47,Shanghai,500")
        );
    }

    #[test]
    fn addresses_with_delimiters_are_quoted() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("out.csv");
        let mut sink = SinkWriter::open(&path, false).expect("open");
        sink.write(&record("Pudong, \"Lujiazui\"")).expect("write");
        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(contents.ends_with(",\"Pudong, \"\"Lujiazui\"\"\",500\n"));
    }

    #[test]
    fn mismatched_header_is_fatal() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("out.csv");
        drop(SinkWriter::open(&path, false).expect("open"));
        let err = SinkWriter::open(&path, true).expect_err("key toggle changes columns");
        assert!(matches!(err, CellfetchError::SinkHeaderMismatch { .. }));
    }
}
