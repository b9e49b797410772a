//! Row mutations, entries and bulk batches.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// Timestamp attached to a written cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellTimestamp {
    /// The server stamps the cell with its own clock on arrival.
    ServerAssigned,
    /// An explicit timestamp in microseconds.
    Micros(i64),
}

/// Half-open range of cell timestamps, `[start, end)`.
///
/// A missing `end` means "to infinity".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRange {
    /// Inclusive start, in microseconds.
    pub start_micros: i64,
    /// Exclusive end, in microseconds.
    pub end_micros: Option<i64>,
}

impl TimestampRange {
    /// Returns true if `ts` falls within the range.
    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start_micros && self.end_micros.map_or(true, |end| ts < end)
    }
}

/// A single change applied to one row.
///
/// Mutations are immutable once built; an [`Entry`] owns its mutations for
/// its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Writes `value` into a cell.
    SetCell {
        /// Column family.
        family: String,
        /// Column qualifier.
        column: String,
        /// Cell timestamp.
        timestamp: CellTimestamp,
        /// Cell value.
        value: Vec<u8>,
    },
    /// Deletes cells from one column, optionally restricted to a range.
    DeleteFromColumn {
        /// Column family.
        family: String,
        /// Column qualifier.
        column: String,
        /// Timestamp range; `None` deletes every version.
        range: Option<TimestampRange>,
    },
    /// Deletes every cell in a column family.
    DeleteFromFamily {
        /// Column family.
        family: String,
    },
    /// Deletes the whole row.
    DeleteFromRow,
    /// Appends bytes to the latest value of a cell.
    AppendValue {
        /// Column family.
        family: String,
        /// Column qualifier.
        column: String,
        /// Bytes to append.
        value: Vec<u8>,
    },
    /// Adds `delta` to the latest value of a cell, read as a big-endian i64.
    IncrementAmount {
        /// Column family.
        family: String,
        /// Column qualifier.
        column: String,
        /// Amount to add.
        delta: i64,
    },
}

impl Mutation {
    /// Creates a `SetCell` with an explicit timestamp.
    pub fn set_cell(
        family: impl Into<String>,
        column: impl Into<String>,
        timestamp_micros: i64,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Mutation::SetCell {
            family: family.into(),
            column: column.into(),
            timestamp: CellTimestamp::Micros(timestamp_micros),
            value: value.into(),
        }
    }

    /// Creates a `SetCell` stamped by the server.
    pub fn set_cell_server_time(
        family: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Mutation::SetCell {
            family: family.into(),
            column: column.into(),
            timestamp: CellTimestamp::ServerAssigned,
            value: value.into(),
        }
    }

    /// Creates a `DeleteFromColumn` covering every version.
    pub fn delete_from_column(family: impl Into<String>, column: impl Into<String>) -> Self {
        Mutation::DeleteFromColumn {
            family: family.into(),
            column: column.into(),
            range: None,
        }
    }

    /// Creates a `DeleteFromFamily`.
    pub fn delete_from_family(family: impl Into<String>) -> Self {
        Mutation::DeleteFromFamily {
            family: family.into(),
        }
    }

    /// Creates an `AppendValue`.
    pub fn append_value(
        family: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Mutation::AppendValue {
            family: family.into(),
            column: column.into(),
            value: value.into(),
        }
    }

    /// Creates an `IncrementAmount`.
    pub fn increment(family: impl Into<String>, column: impl Into<String>, delta: i64) -> Self {
        Mutation::IncrementAmount {
            family: family.into(),
            column: column.into(),
            delta,
        }
    }

    /// Returns true if applying the mutation twice has the same effect as
    /// applying it once.
    ///
    /// A server-stamped `SetCell` writes a new version each time it is
    /// applied, so only explicitly timestamped writes qualify.
    pub fn is_idempotent(&self) -> bool {
        match self {
            Mutation::SetCell { timestamp, .. } => {
                matches!(timestamp, CellTimestamp::Micros(_))
            }
            Mutation::DeleteFromColumn { .. }
            | Mutation::DeleteFromFamily { .. }
            | Mutation::DeleteFromRow => true,
            Mutation::AppendValue { .. } | Mutation::IncrementAmount { .. } => false,
        }
    }
}

/// A row key together with the mutations to apply to that row.
///
/// The mutation list is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EntryRepr")]
pub struct Entry {
    row_key: String,
    mutations: Vec<Mutation>,
}

#[derive(Deserialize)]
struct EntryRepr {
    row_key: String,
    mutations: Vec<Mutation>,
}

impl TryFrom<EntryRepr> for Entry {
    type Error = ProtocolError;

    fn try_from(repr: EntryRepr) -> Result<Self, Self::Error> {
        Entry::new(repr.row_key, repr.mutations)
    }
}

impl Entry {
    /// Creates an entry, rejecting an empty mutation list.
    pub fn new(row_key: impl Into<String>, mutations: Vec<Mutation>) -> ProtocolResult<Self> {
        let row_key = row_key.into();
        if mutations.is_empty() {
            return Err(ProtocolError::EmptyEntry { row_key });
        }
        Ok(Self { row_key, mutations })
    }

    /// Creates an entry holding a single mutation.
    pub fn single(row_key: impl Into<String>, mutation: Mutation) -> Self {
        Self {
            row_key: row_key.into(),
            mutations: vec![mutation],
        }
    }

    /// Returns the row key.
    pub fn row_key(&self) -> &str {
        &self.row_key
    }

    /// Returns the mutations, in application order.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }
}

/// An ordered batch of entries submitted together.
///
/// The position of an entry in the batch is its *original index*.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkMutation {
    entries: Vec<Entry>,
}

impl BulkMutation {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// Appends an entry, builder style.
    pub fn with(mut self, entry: Entry) -> Self {
        self.push(entry);
        self
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the batch holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entries in submission order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

impl FromIterator<Entry> for BulkMutation {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for BulkMutation {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl From<Vec<Entry>> for BulkMutation {
    fn from(entries: Vec<Entry>) -> Self {
        Self { entries }
    }
}
