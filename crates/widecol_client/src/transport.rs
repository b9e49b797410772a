//! Transport layer abstraction for MutateRows streams.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use widecol_protocol::{MutateRowsRequest, MutateRowsResponse, ResponseEntry, Status, StatusCode};

/// Opens MutateRows streams against the table service.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (gRPC, in-process loopback, scripted mocks for testing).
pub trait MutationTransport {
    /// Stream type produced by this transport.
    type Stream: MutationStream;

    /// Opens a stream for one attempt against `table_name`.
    fn open_stream(&self, table_name: &str) -> Result<Self::Stream, Status>;
}

/// One request/response exchange.
///
/// The caller sends exactly one request, reads response messages until
/// `read` returns `None`, then calls `finish` once.
pub trait MutationStream {
    /// Sends the request.
    fn send(&mut self, request: &MutateRowsRequest<'_>) -> Result<(), Status>;

    /// Reads the next response message, or `None` at end of stream.
    fn read(&mut self) -> Option<MutateRowsResponse>;

    /// Closes the stream and returns its final status.
    fn finish(&mut self) -> Status;
}

/// What a scripted stream does for one attempt.
#[derive(Debug, Clone)]
pub struct AttemptScript {
    open_error: Option<Status>,
    send_error: Option<Status>,
    responses: VecDeque<MutateRowsResponse>,
    final_status: Status,
}

impl AttemptScript {
    /// An attempt that returns no messages and finishes with `Ok`.
    pub fn new() -> Self {
        Self {
            open_error: None,
            send_error: None,
            responses: VecDeque::new(),
            final_status: Status::ok(),
        }
    }

    /// Adds a response message carrying `(position, code)` pairs.
    pub fn respond(mut self, results: impl IntoIterator<Item = (i64, StatusCode)>) -> Self {
        let entries = results
            .into_iter()
            .map(|(index, code)| ResponseEntry::new(index, code))
            .collect();
        self.responses.push_back(MutateRowsResponse::new(entries));
        self
    }

    /// Sets the final stream status.
    pub fn finish_with(mut self, status: impl Into<Status>) -> Self {
        self.final_status = status.into();
        self
    }

    /// Makes opening the stream fail.
    pub fn fail_open(mut self, status: impl Into<Status>) -> Self {
        self.open_error = Some(status.into());
        self
    }

    /// Makes sending the request fail; the stream then finishes with the
    /// same status.
    pub fn fail_send(mut self, status: impl Into<Status>) -> Self {
        let status = status.into();
        self.final_status = status.clone();
        self.send_error = Some(status);
        self
    }
}

impl Default for AttemptScript {
    fn default() -> Self {
        Self::new()
    }
}

/// A transport that replays one [`AttemptScript`] per opened stream and
/// records the row keys of every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<AttemptScript>>,
    requests: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedTransport {
    /// Creates a transport replaying `scripts` in order.
    pub fn new(scripts: impl IntoIterator<Item = AttemptScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues another attempt.
    pub fn push_script(&self, script: AttemptScript) {
        self.scripts.lock().push_back(script);
    }

    /// Row keys of each request sent so far, one vector per attempt.
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().clone()
    }

    /// Number of scripts not yet consumed.
    pub fn remaining_scripts(&self) -> usize {
        self.scripts.lock().len()
    }
}

impl MutationTransport for ScriptedTransport {
    type Stream = ScriptedStream;

    fn open_stream(&self, _table_name: &str) -> Result<ScriptedStream, Status> {
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| Status::new(StatusCode::Internal, "no scripted attempt left"))?;
        if let Some(status) = script.open_error {
            return Err(status);
        }
        Ok(ScriptedStream {
            script,
            sent: false,
            requests: Arc::clone(&self.requests),
        })
    }
}

/// Stream produced by [`ScriptedTransport`].
#[derive(Debug)]
pub struct ScriptedStream {
    script: AttemptScript,
    sent: bool,
    requests: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MutationStream for ScriptedStream {
    fn send(&mut self, request: &MutateRowsRequest<'_>) -> Result<(), Status> {
        self.requests.lock().push(
            request
                .entries
                .iter()
                .map(|e| e.row_key().to_string())
                .collect(),
        );
        if let Some(status) = self.script.send_error.take() {
            return Err(status);
        }
        self.sent = true;
        Ok(())
    }

    fn read(&mut self) -> Option<MutateRowsResponse> {
        if !self.sent {
            return None;
        }
        self.script.responses.pop_front()
    }

    fn finish(&mut self) -> Status {
        self.script.final_status.clone()
    }
}
