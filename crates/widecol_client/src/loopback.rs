//! In-process loopback table.
//!
//! [`LoopbackTable`] is a small in-memory wide-column table that decodes
//! MutateRows requests, really applies them, and streams framed responses
//! back through [`LoopbackTransport`]. Faults can be scripted per attempt to
//! reproduce lost responses and cut streams without a network.
//!
//! Useful for testing without an actual table service.

use crate::transport::{MutationStream, MutationTransport};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;
use widecol_protocol::{
    encode_frame, CellTimestamp, Entry, FrameDecoder, MutateRowsRequest, MutateRowsResponse,
    Mutation, OwnedMutateRowsRequest, ProtocolResult, ResponseEntry, Status, StatusCode,
};

/// Cells of one row: `(family, column) -> timestamp -> value`.
type Row = BTreeMap<(String, String), BTreeMap<i64, Vec<u8>>>;

/// What the table does with one position of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Do not apply the entry; report `code`.
    Reject(StatusCode),
    /// Apply the entry but report `code`, as when the server times out
    /// after committing.
    ApplyThenReject(StatusCode),
    /// Apply the entry and send no result for it.
    ApplyThenDrop,
    /// Neither apply the entry nor send a result for it.
    Drop,
}

/// Faults for one attempt.
#[derive(Debug, Clone, Default)]
pub struct AttemptFaults {
    positions: BTreeMap<usize, Fault>,
    truncate_after: Option<usize>,
    final_status: Option<Status>,
}

impl AttemptFaults {
    /// An attempt without faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `fault` to the entry at `position` of the attempt.
    pub fn at(mut self, position: usize, fault: Fault) -> Self {
        self.positions.insert(position, fault);
        self
    }

    /// Stops processing after `count` positions, as if the stream was cut.
    /// The stream then finishes with `Unavailable` unless
    /// [`AttemptFaults::finish_with`] says otherwise.
    pub fn truncate_after(mut self, count: usize) -> Self {
        self.truncate_after = Some(count);
        self
    }

    /// Overrides the final stream status.
    pub fn finish_with(mut self, status: impl Into<Status>) -> Self {
        self.final_status = Some(status.into());
        self
    }
}

/// An in-memory table that serves MutateRows requests.
#[derive(Debug)]
pub struct LoopbackTable {
    name: String,
    rows: Mutex<BTreeMap<String, Row>>,
    faults: Mutex<VecDeque<AttemptFaults>>,
    clock: AtomicI64,
    chunk_size: usize,
}

impl LoopbackTable {
    /// Creates an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(VecDeque::new()),
            clock: AtomicI64::new(1),
            chunk_size: 2,
        }
    }

    /// Sets how many results each response message carries.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues faults for a later attempt. Attempts consume queued faults in
    /// order; once the queue is empty they run without faults.
    pub fn inject(&self, faults: AttemptFaults) {
        self.faults.lock().push_back(faults);
    }

    /// Latest value of a cell.
    pub fn cell(&self, row_key: &str, family: &str, column: &str) -> Option<Vec<u8>> {
        self.rows
            .lock()
            .get(row_key)
            .and_then(|row| row.get(&(family.to_string(), column.to_string())))
            .and_then(|versions| versions.values().next_back().cloned())
    }

    /// Number of stored versions of a cell.
    pub fn versions(&self, row_key: &str, family: &str, column: &str) -> usize {
        self.rows
            .lock()
            .get(row_key)
            .and_then(|row| row.get(&(family.to_string(), column.to_string())))
            .map_or(0, |versions| versions.len())
    }

    /// Latest value of a counter cell written by `IncrementAmount`.
    pub fn counter(&self, row_key: &str, family: &str, column: &str) -> Option<i64> {
        self.cell(row_key, family, column)
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).ok())
            .map(i64::from_be_bytes)
    }

    /// Returns true if the row has any cell.
    pub fn contains_row(&self, row_key: &str) -> bool {
        self.rows.lock().contains_key(row_key)
    }

    /// Number of non-empty rows.
    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// Serves one encoded request.
    ///
    /// Returns the framed response messages and the final stream status.
    pub fn serve(&self, request: &[u8]) -> (Vec<u8>, Status) {
        let request = match OwnedMutateRowsRequest::decode(request) {
            Ok(request) => request,
            Err(e) => {
                return (
                    Vec::new(),
                    Status::new(StatusCode::InvalidArgument, e.to_string()),
                )
            }
        };
        if request.table_name != self.name {
            return (
                Vec::new(),
                Status::new(
                    StatusCode::NotFound,
                    format!("table {} not found", request.table_name),
                ),
            );
        }

        let faults = self.faults.lock().pop_front().unwrap_or_default();
        let limit = faults.truncate_after.unwrap_or(usize::MAX);
        let mut results = Vec::new();

        for (position, entry) in request.entries.iter().enumerate().take(limit) {
            let index = position as i64;
            match faults.positions.get(&position) {
                None => results.push(ResponseEntry::new(index, self.apply_entry(entry))),
                Some(Fault::Reject(code)) => results.push(ResponseEntry::new(index, *code)),
                Some(Fault::ApplyThenReject(code)) => {
                    self.apply_entry(entry);
                    results.push(ResponseEntry::new(index, *code));
                }
                Some(Fault::ApplyThenDrop) => {
                    self.apply_entry(entry);
                }
                Some(Fault::Drop) => {}
            }
        }

        let status = match (faults.final_status, faults.truncate_after) {
            (Some(status), _) => status,
            (None, Some(n)) if n < request.entries.len() => {
                Status::new(StatusCode::Unavailable, "stream reset")
            }
            _ => Status::ok(),
        };

        debug!(
            table = %self.name,
            entries = request.entries.len(),
            results = results.len(),
            %status,
            "served mutate rows"
        );

        match self.encode_results(results) {
            Ok(wire) => (wire, status),
            Err(e) => (Vec::new(), Status::new(StatusCode::Internal, e.to_string())),
        }
    }

    fn encode_results(&self, results: Vec<ResponseEntry>) -> ProtocolResult<Vec<u8>> {
        let mut wire = Vec::new();
        for chunk in results.chunks(self.chunk_size) {
            let message = MutateRowsResponse::new(chunk.to_vec());
            wire.extend_from_slice(&encode_frame(&message.encode()?)?);
        }
        Ok(wire)
    }

    /// Applies all mutations of an entry or none of them.
    fn apply_entry(&self, entry: &Entry) -> Status {
        let mut rows = self.rows.lock();
        let mut row = rows.get(entry.row_key()).cloned().unwrap_or_default();

        for mutation in entry.mutations() {
            if let Err(status) = self.apply_mutation(&mut row, mutation) {
                return status;
            }
        }

        row.retain(|_, versions| !versions.is_empty());
        if row.is_empty() {
            rows.remove(entry.row_key());
        } else {
            rows.insert(entry.row_key().to_string(), row);
        }
        Status::ok()
    }

    fn apply_mutation(&self, row: &mut Row, mutation: &Mutation) -> Result<(), Status> {
        match mutation {
            Mutation::SetCell {
                family,
                column,
                timestamp,
                value,
            } => {
                let ts = match timestamp {
                    CellTimestamp::Micros(ts) => *ts,
                    CellTimestamp::ServerAssigned => self.tick(),
                };
                row.entry((family.clone(), column.clone()))
                    .or_default()
                    .insert(ts, value.clone());
            }
            Mutation::DeleteFromColumn {
                family,
                column,
                range,
            } => {
                let key = (family.clone(), column.clone());
                match range {
                    None => {
                        row.remove(&key);
                    }
                    Some(range) => {
                        if let Some(versions) = row.get_mut(&key) {
                            versions.retain(|ts, _| !range.contains(*ts));
                        }
                    }
                }
            }
            Mutation::DeleteFromFamily { family } => {
                row.retain(|(f, _), _| f != family);
            }
            Mutation::DeleteFromRow => row.clear(),
            Mutation::AppendValue {
                family,
                column,
                value,
            } => {
                let versions = row.entry((family.clone(), column.clone())).or_default();
                let mut latest = versions.values().next_back().cloned().unwrap_or_default();
                latest.extend_from_slice(value);
                versions.insert(self.tick(), latest);
            }
            Mutation::IncrementAmount {
                family,
                column,
                delta,
            } => {
                let versions = row.entry((family.clone(), column.clone())).or_default();
                let current = match versions.values().next_back() {
                    None => 0,
                    Some(bytes) => <[u8; 8]>::try_from(bytes.as_slice())
                        .map(i64::from_be_bytes)
                        .map_err(|_| {
                            Status::new(
                                StatusCode::FailedPrecondition,
                                format!("{family}:{column} is not a 64-bit counter"),
                            )
                        })?,
                };
                let next = current.wrapping_add(*delta);
                versions.insert(self.tick(), next.to_be_bytes().to_vec());
            }
        }
        Ok(())
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }
}

/// Transport routing streams to a [`LoopbackTable`] in the same process.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    table: Arc<LoopbackTable>,
}

impl LoopbackTransport {
    /// Creates a transport connected to the given table.
    pub fn new(table: Arc<LoopbackTable>) -> Self {
        Self { table }
    }
}

impl MutationTransport for LoopbackTransport {
    type Stream = LoopbackStream;

    fn open_stream(&self, _table_name: &str) -> Result<LoopbackStream, Status> {
        Ok(LoopbackStream {
            table: Arc::clone(&self.table),
            decoder: FrameDecoder::new(),
            status: None,
        })
    }
}

/// Stream produced by [`LoopbackTransport`].
#[derive(Debug)]
pub struct LoopbackStream {
    table: Arc<LoopbackTable>,
    decoder: FrameDecoder,
    status: Option<Status>,
}

impl MutationStream for LoopbackStream {
    fn send(&mut self, request: &MutateRowsRequest<'_>) -> Result<(), Status> {
        let body = request
            .encode()
            .map_err(|e| Status::new(StatusCode::Internal, e.to_string()))?;
        let (wire, status) = self.table.serve(&body);
        self.decoder.push(&wire);
        self.status = Some(status);
        Ok(())
    }

    fn read(&mut self) -> Option<MutateRowsResponse> {
        let frame = match self.decoder.next_frame() {
            Ok(frame) => frame?,
            Err(e) => {
                self.status = Some(Status::new(StatusCode::Internal, e.to_string()));
                return None;
            }
        };
        match MutateRowsResponse::decode(&frame) {
            Ok(message) => Some(message),
            Err(e) => {
                self.status = Some(Status::new(StatusCode::Internal, e.to_string()));
                None
            }
        }
    }

    fn finish(&mut self) -> Status {
        if let Err(e) = self.decoder.finish() {
            return Status::new(StatusCode::Internal, e.to_string());
        }
        self.status
            .clone()
            .unwrap_or_else(|| Status::new(StatusCode::Cancelled, "no request sent"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use widecol_protocol::TimestampRange;

    fn serve(table: &LoopbackTable, entries: &[Entry]) -> (Vec<ResponseEntry>, Status) {
        let body = MutateRowsRequest::new(table.name(), entries).encode().unwrap();
        let (wire, status) = table.serve(&body);
        let mut decoder = FrameDecoder::new();
        decoder.push(&wire);
        let mut results = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            results.extend(MutateRowsResponse::decode(&frame).unwrap().entries);
        }
        (results, status)
    }

    #[test]
    fn applies_cells_and_deletes() {
        let table = LoopbackTable::new("t");
        let entries = vec![
            Entry::new(
                "r1",
                vec![
                    Mutation::set_cell("cf", "a", 10, "old"),
                    Mutation::set_cell("cf", "a", 20, "new"),
                    Mutation::set_cell("cf", "b", 10, "x"),
                    Mutation::set_cell("meta", "m", 10, "y"),
                ],
            )
            .unwrap(),
            Entry::single("r2", Mutation::set_cell("cf", "a", 1, "gone")),
            Entry::single("r2", Mutation::DeleteFromRow),
        ];

        let (results, status) = serve(&table, &entries);
        assert!(status.is_ok());
        assert_eq!(results.len(), 3);
        assert_eq!(table.cell("r1", "cf", "a"), Some(b"new".to_vec()));
        assert!(!table.contains_row("r2"));

        let deletes = vec![Entry::new(
            "r1",
            vec![
                Mutation::DeleteFromColumn {
                    family: "cf".into(),
                    column: "a".into(),
                    range: Some(TimestampRange {
                        start_micros: 15,
                        end_micros: None,
                    }),
                },
                Mutation::delete_from_family("meta"),
            ],
        )
        .unwrap()];
        serve(&table, &deletes);

        assert_eq!(table.cell("r1", "cf", "a"), Some(b"old".to_vec()));
        assert_eq!(table.cell("r1", "meta", "m"), None);
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn append_and_increment() {
        let table = LoopbackTable::new("t");
        let entries = vec![
            Entry::single("r", Mutation::append_value("cf", "log", "ab")),
            Entry::single("r", Mutation::append_value("cf", "log", "cd")),
            Entry::single("r", Mutation::increment("cf", "n", 5)),
            Entry::single("r", Mutation::increment("cf", "n", -2)),
        ];

        serve(&table, &entries);

        assert_eq!(table.cell("r", "cf", "log"), Some(b"abcd".to_vec()));
        assert_eq!(table.counter("r", "cf", "n"), Some(3));
    }

    #[test]
    fn failed_mutation_rolls_back_entry() {
        let table = LoopbackTable::new("t");
        let entries = vec![
            Entry::single("r", Mutation::set_cell("cf", "s", 1, "not a counter")),
            Entry::new(
                "r",
                vec![
                    Mutation::set_cell("cf", "other", 1, "x"),
                    Mutation::increment("cf", "s", 1),
                ],
            )
            .unwrap(),
        ];

        let (results, _) = serve(&table, &entries);

        assert_eq!(results[1].status.code, StatusCode::FailedPrecondition);
        assert_eq!(table.cell("r", "cf", "other"), None);
    }

    #[test]
    fn unknown_table_rejected() {
        let table = LoopbackTable::new("t");
        let body = MutateRowsRequest::new("other", &[Entry::single("r", Mutation::DeleteFromRow)])
            .encode()
            .unwrap();

        let (wire, status) = table.serve(&body);

        assert!(wire.is_empty());
        assert_eq!(status.code, StatusCode::NotFound);
    }

    #[test]
    fn scripted_faults() {
        let table = LoopbackTable::new("t").with_chunk_size(1);
        table.inject(
            AttemptFaults::new()
                .at(0, Fault::Reject(StatusCode::Unavailable))
                .at(1, Fault::ApplyThenDrop)
                .truncate_after(3),
        );
        let entries: Vec<_> = (0..4)
            .map(|i| Entry::single(format!("r{i}"), Mutation::set_cell("cf", "c", 1, "v")))
            .collect();

        let (results, status) = serve(&table, &entries);

        assert_eq!(
            results,
            vec![
                ResponseEntry::new(0, StatusCode::Unavailable),
                ResponseEntry::new(2, StatusCode::Ok),
            ]
        );
        assert_eq!(status.code, StatusCode::Unavailable);
        assert!(!table.contains_row("r0"));
        assert!(table.contains_row("r1"));
        assert!(!table.contains_row("r3"));
    }

    #[test]
    fn stream_round_trip() {
        let table = Arc::new(LoopbackTable::new("t"));
        let transport = LoopbackTransport::new(Arc::clone(&table));
        let entries = vec![Entry::single("r", Mutation::set_cell("cf", "c", 1, "v"))];

        let mut stream = transport.open_stream("t").unwrap();
        stream.send(&MutateRowsRequest::new("t", &entries)).unwrap();
        let message = stream.read().unwrap();

        assert_eq!(message.entries, vec![ResponseEntry::new(0, StatusCode::Ok)]);
        assert!(stream.read().is_none());
        assert!(stream.finish().is_ok());
    }
}
