//! Retry loop around [`BulkMutator`].

use crate::config::TableConfig;
use crate::engine::{BulkMutator, BulkStats, FailureStatus, FinalFailure};
use crate::error::{ClientError, ClientResult};
use crate::policy::{IdempotencyPolicy, RetryableCodes, SafeIdempotencyPolicy};
use crate::transport::MutationTransport;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use widecol_protocol::{BulkMutation, Entry, Status, StatusCode};

/// Result of a [`BulkApplier::bulk_apply`] call.
#[derive(Debug, Clone)]
pub struct BulkApplyReport {
    /// Entries that were not confirmed as applied, in the order they were
    /// recorded.
    pub failures: Vec<FinalFailure>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Final status of the last attempt, `None` if no attempt was needed.
    pub last_status: Option<Status>,
    /// Engine counters.
    pub stats: BulkStats,
}

impl BulkApplyReport {
    /// Returns true if every entry was applied.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures sorted by their position in the submitted batch.
    pub fn failures_by_index(&self) -> Vec<&FinalFailure> {
        let mut sorted: Vec<_> = self.failures.iter().collect();
        sorted.sort_by_key(|f| f.original_index);
        sorted
    }
}

/// Applies batches to one table, retrying transient failures with backoff.
pub struct BulkApplier<T: MutationTransport> {
    config: TableConfig,
    transport: T,
    idempotency: Arc<dyn IdempotencyPolicy>,
}

impl<T: MutationTransport> BulkApplier<T> {
    /// Creates an applier using [`SafeIdempotencyPolicy`].
    pub fn new(config: TableConfig, transport: T) -> ClientResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            idempotency: Arc::new(SafeIdempotencyPolicy),
        })
    }

    /// Replaces the idempotency policy.
    pub fn with_idempotency_policy(mut self, policy: Arc<dyn IdempotencyPolicy>) -> Self {
        self.idempotency = policy;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Applies `batch`, retrying while entries remain pending and the retry
    /// budget allows.
    ///
    /// Per-entry failures are reported in the returned report, not as an
    /// error. The loop stops early when an attempt's stream fails with a
    /// code outside [`TableConfig::retryable_codes`].
    pub fn bulk_apply(&self, batch: BulkMutation) -> ClientResult<BulkApplyReport> {
        let retry = &self.config.retry;
        let mut mutator = BulkMutator::with_retryability(
            self.config.table_name.clone(),
            self.idempotency.as_ref(),
            RetryableCodes::new(self.config.retryable_codes.iter().copied()),
            batch,
        )
        .with_app_profile(self.config.app_profile_id.clone());

        let start = Instant::now();
        let mut attempts = 0u32;
        let mut last_status = None;

        while mutator.has_pending_work() && retry.allows_attempt(attempts, start.elapsed()) {
            if attempts > 0 {
                let delay = retry.delay_for_attempt(attempts);
                // The next attempt would start after the backoff.
                if !retry.allows_attempt(attempts, start.elapsed().saturating_add(delay)) {
                    debug!(attempt = attempts, ?delay, "time budget ends before next attempt");
                    break;
                }
                debug!(attempt = attempts, ?delay, "backing off before next attempt");
                std::thread::sleep(delay);
            }
            attempts += 1;

            let status = match mutator.make_one_attempt(&self.transport) {
                Ok(()) => Status::ok(),
                Err(ClientError::Rpc(status)) => status,
                Err(other) => return Err(other),
            };
            let stop = !status.is_ok() && !self.config.retryable_codes.contains(&status.code);
            last_status = Some(status);
            if stop {
                break;
            }
        }

        let pending = mutator.pending_len();
        if pending > 0 {
            info!(
                table = %self.config.table_name,
                attempts,
                pending,
                "giving up on entries still pending"
            );
        }

        let failures = mutator.extract_final_failures();
        Ok(BulkApplyReport {
            failures,
            attempts,
            last_status,
            stats: mutator.stats(),
        })
    }

    /// Applies a single entry.
    ///
    /// A rejected entry is returned as `ClientError::Rpc` with the entry's
    /// status; an entry left unconfirmed when the retry budget ran out is
    /// returned as `ClientError::RetriesExhausted`.
    pub fn apply(&self, entry: Entry) -> ClientResult<()> {
        let report = self.bulk_apply(BulkMutation::new().with(entry))?;
        let Some(failure) = report.failures.into_iter().next() else {
            return Ok(());
        };
        match failure.status {
            FailureStatus::Rejected(status) => Err(ClientError::Rpc(status)),
            FailureStatus::Unconfirmed => Err(ClientError::RetriesExhausted {
                attempts: report.attempts,
                last: report
                    .last_status
                    .filter(|s| !s.is_ok())
                    .unwrap_or_else(|| Status::new(StatusCode::Unknown, "mutation unconfirmed")),
            }),
        }
    }
}
