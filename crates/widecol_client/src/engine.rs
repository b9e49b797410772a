//! Bulk mutation engine.
//!
//! A [`BulkMutator`] owns one batch and executes it one attempt at a time.
//! The caller decides how many attempts to make and how long to wait
//! between them; the engine only sorts each attempt's entries into
//! "done", "retry next attempt" and "final failure".
//!
//! ## Entry lifecycle
//!
//! ```text
//! Pending -> InFlight -> Succeeded              (dropped silently)
//!                     -> Pending                (transient failure, idempotent)
//!                     -> FinalFailure           (anything else)
//! ```
//!
//! Every entry of the batch ends either as a success or in the list
//! returned by [`BulkMutator::extract_final_failures`], exactly once, with
//! its position in the original batch.

use crate::error::{ClientError, ClientResult};
use crate::policy::{DefaultRetryability, IdempotencyPolicy, RetryabilityPolicy};
use crate::transport::{MutationStream, MutationTransport};
use std::fmt;
use tracing::{debug, trace, warn};
use widecol_protocol::{BulkMutation, Entry, MutateRowsRequest, ResponseEntry, Status, StatusCode};

/// Why an entry will not be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureStatus {
    /// The server reported an error for the entry.
    Rejected(Status),
    /// No error was reported, but the entry was not confirmed either: its
    /// response was lost and resending it was unsafe, or the caller stopped
    /// retrying while it was still pending. Treat it as failed; it may or
    /// may not have been applied.
    Unconfirmed,
}

impl FailureStatus {
    /// Status code of the failure. `Unconfirmed` reports `Ok`, because no
    /// error was ever observed for it.
    pub fn code(&self) -> StatusCode {
        match self {
            FailureStatus::Rejected(status) => status.code,
            FailureStatus::Unconfirmed => StatusCode::Ok,
        }
    }

    /// Returns true for [`FailureStatus::Unconfirmed`].
    pub fn is_unconfirmed(&self) -> bool {
        matches!(self, FailureStatus::Unconfirmed)
    }
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStatus::Rejected(status) => write!(f, "rejected: {status}"),
            FailureStatus::Unconfirmed => f.write_str("unconfirmed"),
        }
    }
}

/// An entry that will not be retried by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalFailure {
    /// The entry, handed back to the caller.
    pub entry: Entry,
    /// Why it failed.
    pub status: FailureStatus,
    /// Position of the entry in the batch passed to [`BulkMutator::new`].
    pub original_index: usize,
}

impl FinalFailure {
    /// Shorthand for `self.status.code()`.
    pub fn status_code(&self) -> StatusCode {
        self.status.code()
    }
}

/// Counters describing what happened to a batch so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    /// Entries in the batch.
    pub total_entries: u64,
    /// Attempts made.
    pub attempts: u64,
    /// Entries confirmed as applied.
    pub succeeded: u64,
    /// Times an entry was queued for another attempt.
    pub retried: u64,
    /// Entries recorded as final failures.
    pub failed: u64,
    /// Response results ignored because their position was invalid or
    /// already reported.
    pub protocol_violations: u64,
}

/// An entry together with what the engine knows about it.
///
/// Keeping the classification and original index in the same slot as the
/// entry means they cannot drift apart while entries move between attempts.
#[derive(Debug)]
struct Slot {
    entry: Entry,
    is_idempotent: bool,
    original_index: usize,
}

/// Applies a batch of mutations across as many attempts as the caller makes.
///
/// The engine is synchronous and not shareable across concurrent attempts:
/// every mutating call takes `&mut self`. Wrap it in a single
/// `parking_lot::Mutex` to drive it from several threads.
pub struct BulkMutator {
    table_name: String,
    app_profile_id: Option<String>,
    retryability: Box<dyn RetryabilityPolicy>,
    pending: Vec<Slot>,
    failures: Vec<FinalFailure>,
    stats: BulkStats,
}

impl BulkMutator {
    /// Creates an engine retrying only `Unavailable` results.
    ///
    /// Each entry is classified by `idempotency` exactly once, here.
    pub fn new<P>(table_name: impl Into<String>, idempotency: &P, batch: BulkMutation) -> Self
    where
        P: IdempotencyPolicy + ?Sized,
    {
        Self::with_retryability(table_name, idempotency, DefaultRetryability, batch)
    }

    /// Creates an engine with a custom retryability policy.
    pub fn with_retryability<P, R>(
        table_name: impl Into<String>,
        idempotency: &P,
        retryability: R,
        batch: BulkMutation,
    ) -> Self
    where
        P: IdempotencyPolicy + ?Sized,
        R: RetryabilityPolicy + 'static,
    {
        let pending: Vec<Slot> = batch
            .into_iter()
            .enumerate()
            .map(|(original_index, entry)| Slot {
                is_idempotent: idempotency.is_idempotent(&entry),
                entry,
                original_index,
            })
            .collect();

        let stats = BulkStats {
            total_entries: pending.len() as u64,
            ..BulkStats::default()
        };

        Self {
            table_name: table_name.into(),
            app_profile_id: None,
            retryability: Box::new(retryability),
            pending,
            failures: Vec::new(),
            stats,
        }
    }

    /// Sets the application profile sent with every attempt.
    pub fn with_app_profile(mut self, app_profile_id: Option<String>) -> Self {
        self.app_profile_id = app_profile_id;
        self
    }

    /// Returns the table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns true if entries are waiting for another attempt.
    pub fn has_pending_work(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of entries waiting for another attempt.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns the counters accumulated so far.
    pub fn stats(&self) -> BulkStats {
        self.stats
    }

    /// Sends every pending entry in one stream and sorts the results.
    ///
    /// Entries with no reported outcome (the stream was cut, cancelled, or
    /// never opened) are retried if idempotent and recorded as
    /// [`FailureStatus::Unconfirmed`] otherwise. This happens before any
    /// error is returned, so no entry is lost on a failed attempt.
    ///
    /// Returns `Err(ClientError::Rpc)` if the stream did not finish with
    /// `Ok`; per-entry failures are not errors. Without pending entries no
    /// stream is opened.
    pub fn make_one_attempt<T>(&mut self, transport: &T) -> ClientResult<()>
    where
        T: MutationTransport + ?Sized,
    {
        if self.pending.is_empty() {
            return Ok(());
        }

        let attempt = std::mem::take(&mut self.pending);
        let mut outcomes: Vec<Option<Status>> = vec![None; attempt.len()];
        let mut violations = 0u64;

        self.stats.attempts += 1;
        let status = self.exchange(transport, &attempt, &mut outcomes, &mut violations);
        self.stats.protocol_violations += violations;

        debug!(
            table = %self.table_name,
            attempt = self.stats.attempts,
            entries = attempt.len(),
            reported = outcomes.iter().filter(|o| o.is_some()).count(),
            status = %status,
            "mutate rows attempt finished"
        );

        self.settle(attempt, outcomes);

        if status.is_ok() {
            Ok(())
        } else {
            Err(ClientError::Rpc(status))
        }
    }

    /// Returns every final failure, including entries still pending.
    ///
    /// Pending entries are reported as [`FailureStatus::Unconfirmed`]. After
    /// this call the engine is empty; a second call returns nothing.
    pub fn extract_final_failures(&mut self) -> Vec<FinalFailure> {
        let mut failures = std::mem::take(&mut self.failures);
        let leftover = std::mem::take(&mut self.pending);
        if !leftover.is_empty() {
            debug!(
                table = %self.table_name,
                count = leftover.len(),
                "reporting entries still pending as unconfirmed"
            );
        }
        self.stats.failed += leftover.len() as u64;
        failures.extend(leftover.into_iter().map(|slot| FinalFailure {
            entry: slot.entry,
            status: FailureStatus::Unconfirmed,
            original_index: slot.original_index,
        }));
        failures
    }

    /// Runs the stream and records each reported outcome by position.
    fn exchange<T>(
        &self,
        transport: &T,
        attempt: &[Slot],
        outcomes: &mut [Option<Status>],
        violations: &mut u64,
    ) -> Status
    where
        T: MutationTransport + ?Sized,
    {
        let mut stream = match transport.open_stream(&self.table_name) {
            Ok(stream) => stream,
            Err(status) => {
                warn!(table = %self.table_name, %status, "failed to open mutate rows stream");
                return status;
            }
        };

        let request = MutateRowsRequest::new(&self.table_name, attempt.iter().map(|s| &s.entry))
            .with_app_profile(self.app_profile_id.as_deref());

        if let Err(status) = stream.send(&request) {
            warn!(table = %self.table_name, %status, "failed to send mutate rows request");
            let final_status = stream.finish();
            return if final_status.is_ok() {
                status
            } else {
                final_status
            };
        }

        while let Some(message) = stream.read() {
            for ResponseEntry { index, status } in message.entries {
                let position = usize::try_from(index)
                    .ok()
                    .filter(|&position| position < outcomes.len());
                let Some(position) = position else {
                    warn!(
                        index,
                        attempt_len = outcomes.len(),
                        "ignoring result for out-of-range position"
                    );
                    *violations += 1;
                    continue;
                };
                if outcomes[position].is_some() {
                    warn!(index, "ignoring duplicate result for position");
                    *violations += 1;
                    continue;
                }
                outcomes[position] = Some(status);
            }
        }

        stream.finish()
    }

    /// Moves each entry of a finished attempt to its next state.
    fn settle(&mut self, attempt: Vec<Slot>, outcomes: Vec<Option<Status>>) {
        for (slot, outcome) in attempt.into_iter().zip(outcomes) {
            match outcome {
                Some(status) if status.is_ok() => {
                    trace!(row = slot.entry.row_key(), "entry applied");
                    self.stats.succeeded += 1;
                }
                Some(status)
                    if slot.is_idempotent && self.retryability.is_retryable(status.code) =>
                {
                    trace!(row = slot.entry.row_key(), %status, "entry queued for retry");
                    self.requeue(slot);
                }
                Some(status) => {
                    trace!(row = slot.entry.row_key(), %status, "entry failed");
                    self.fail(slot, FailureStatus::Rejected(status));
                }
                None if slot.is_idempotent => {
                    trace!(row = slot.entry.row_key(), "no result for entry, queued for retry");
                    self.requeue(slot);
                }
                None => {
                    warn!(
                        row = slot.entry.row_key(),
                        original_index = slot.original_index,
                        "no result for non-idempotent entry, reporting as unconfirmed"
                    );
                    self.fail(slot, FailureStatus::Unconfirmed);
                }
            }
        }
    }

    fn requeue(&mut self, slot: Slot) {
        self.stats.retried += 1;
        self.pending.push(slot);
    }

    fn fail(&mut self, slot: Slot, status: FailureStatus) {
        self.stats.failed += 1;
        self.failures.push(FinalFailure {
            entry: slot.entry,
            status,
            original_index: slot.original_index,
        });
    }
}

impl fmt::Debug for BulkMutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkMutator")
            .field("table_name", &self.table_name)
            .field("app_profile_id", &self.app_profile_id)
            .field("pending", &self.pending.len())
            .field("failures", &self.failures.len())
            .field("stats", &self.stats)
            .finish()
    }
}
