//! Identifier and record types flowing through the fetch pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::io::Checkpoint;

/// Four-field cell tower code used as the lookup key.
///
/// Fields are `None` when the source row did not carry a parseable value. Such
/// identifiers still travel through the pipeline (so the cursor advances past
/// them) and are rejected by the fetch client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellIdentifier {
    pub mcc: Option<u32>,
    pub mnc: Option<u32>,
    pub lac: Option<u32>,
    pub cid: Option<u32>,
}

impl CellIdentifier {
    #[must_use]
    pub fn new(mcc: u32, mnc: u32, lac: u32, cid: u32) -> Self {
        Self {
            mcc: Some(mcc),
            mnc: Some(mnc),
            lac: Some(lac),
            cid: Some(cid),
        }
    }

    /// Parse one `mcc,mnc,lac,cid` row. Never fails: missing, empty or
    /// non-numeric fields come back as `None`, extra fields are ignored.
    #[must_use]
    pub fn from_row(row: &str) -> Self {
        let mut fields = row.split(',').map(|field| field.trim().parse::<u32>().ok());
        let mut next = || fields.next().flatten();
        Self {
            mcc: next(),
            mnc: next(),
            lac: next(),
            cid: next(),
        }
    }

    /// All four fields present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.mcc.is_some() && self.mnc.is_some() && self.lac.is_some() && self.cid.is_some()
    }

    /// Fields in source order.
    #[must_use]
    pub fn fields(&self) -> [Option<u32>; 4] {
        [self.mcc, self.mnc, self.lac, self.cid]
    }
}

impl fmt::Display for CellIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |value: Option<u32>| value.map(|v| v.to_string()).unwrap_or_default();
        write!(
            f,
            "{}/{}/{}/{}",
            render(self.mcc),
            render(self.mnc),
            render(self.lac),
            render(self.cid)
        )
    }
}

/// A successfully resolved identifier.
///
/// Location fields are kept as the text the service returned so the output
/// dataset reproduces them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub identifier: CellIdentifier,
    pub lat: String,
    pub lon: String,
    pub address: String,
    pub radius: String,
}

/// Unit of work moved between the source, the queue and the workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Source line label used in logs.
    pub line_number: u64,
    pub identifier: CellIdentifier,
    /// Times this item went back to the queue after throttling.
    pub attempts: u32,
    /// Cursor value that re-reads this row. A shutdown that abandons the item
    /// rewinds the cursor here.
    pub origin: Checkpoint,
}

impl WorkItem {
    #[must_use]
    pub fn new(line_number: u64, identifier: CellIdentifier) -> Self {
        Self {
            line_number,
            identifier,
            attempts: 0,
            origin: Checkpoint::default(),
        }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Checkpoint) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn requeued(mut self) -> Self {
        self.attempts = self.attempts.saturating_add(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_row() {
        let id = CellIdentifier::from_row("460,0,2,5465");
        assert_eq!(id, CellIdentifier::new(460, 0, 2, 5465));
        assert!(id.is_complete());
    }

    #[test]
    fn short_and_garbage_rows_leave_fields_absent() {
        let short = CellIdentifier::from_row("460,0");
        assert_eq!(short.lac, None);
        assert_eq!(short.cid, None);
        assert!(!short.is_complete());

        let garbage = CellIdentifier::from_row("460,x,2,");
        assert_eq!(garbage.mcc, Some(460));
        assert_eq!(garbage.mnc, None);
        assert_eq!(garbage.lac, Some(2));
        assert_eq!(garbage.cid, None);
    }

    #[test]
    fn display_renders_absent_fields_empty() {
        let id = CellIdentifier {
            mcc: Some(460),
            mnc: None,
            lac: Some(7),
            cid: None,
        };
        assert_eq!(id.to_string(), "460//7/");
    }
}
