//! Idempotency and retryability policies.
//!
//! Both are injected into [`BulkMutator`](crate::BulkMutator) so callers and
//! tests can substitute their own rules.

use std::collections::BTreeSet;
use widecol_protocol::{Entry, StatusCode};

/// Decides whether an entry may be sent again without risking a different
/// end result.
pub trait IdempotencyPolicy: Send + Sync {
    /// Returns true if resending `entry` cannot change its effect.
    fn is_idempotent(&self, entry: &Entry) -> bool;
}

/// Treats an entry as idempotent only if every mutation in it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeIdempotencyPolicy;

impl IdempotencyPolicy for SafeIdempotencyPolicy {
    fn is_idempotent(&self, entry: &Entry) -> bool {
        entry.mutations().iter().all(|m| m.is_idempotent())
    }
}

/// Treats every entry as idempotent.
///
/// Only suitable when duplicated appends, increments or server-stamped
/// versions are acceptable to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetryPolicy;

impl IdempotencyPolicy for AlwaysRetryPolicy {
    fn is_idempotent(&self, _entry: &Entry) -> bool {
        true
    }
}

impl<F> IdempotencyPolicy for F
where
    F: Fn(&Entry) -> bool + Send + Sync,
{
    fn is_idempotent(&self, entry: &Entry) -> bool {
        self(entry)
    }
}

/// Decides whether a failed entry's status is transient.
///
/// `StatusCode::Ok` is never passed in; success is handled before the
/// policy is consulted.
pub trait RetryabilityPolicy: Send + Sync {
    /// Returns true if an entry failing with `code` may succeed on resend.
    fn is_retryable(&self, code: StatusCode) -> bool;
}

/// Only `Unavailable` is transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryability;

impl RetryabilityPolicy for DefaultRetryability {
    fn is_retryable(&self, code: StatusCode) -> bool {
        code == StatusCode::Unavailable
    }
}

/// A caller-chosen set of transient codes.
#[derive(Debug, Clone, Default)]
pub struct RetryableCodes {
    codes: BTreeSet<StatusCode>,
}

impl RetryableCodes {
    /// Creates a policy retrying exactly the given codes.
    pub fn new(codes: impl IntoIterator<Item = StatusCode>) -> Self {
        Self {
            codes: codes.into_iter().filter(|c| *c != StatusCode::Ok).collect(),
        }
    }

    /// Returns the configured codes.
    pub fn codes(&self) -> &BTreeSet<StatusCode> {
        &self.codes
    }
}

impl RetryabilityPolicy for RetryableCodes {
    fn is_retryable(&self, code: StatusCode) -> bool {
        self.codes.contains(&code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use widecol_protocol::Mutation;

    fn entry(mutations: Vec<Mutation>) -> Entry {
        Entry::new("row", mutations).unwrap()
    }

    #[test]
    fn safe_policy_requires_all_idempotent() {
        let policy = SafeIdempotencyPolicy;

        assert!(policy.is_idempotent(&entry(vec![
            Mutation::set_cell("cf", "a", 1, "x"),
            Mutation::delete_from_family("other"),
        ])));
        assert!(!policy.is_idempotent(&entry(vec![
            Mutation::set_cell("cf", "a", 1, "x"),
            Mutation::increment("cf", "n", 1),
        ])));
        assert!(!policy.is_idempotent(&entry(vec![Mutation::set_cell_server_time(
            "cf", "a", "x"
        )])));
    }

    #[test]
    fn always_retry_and_closure_policies() {
        let increment = entry(vec![Mutation::increment("cf", "n", 1)]);
        assert!(AlwaysRetryPolicy.is_idempotent(&increment));

        let by_key = |e: &Entry| e.row_key().starts_with("safe/");
        assert!(!by_key.is_idempotent(&increment));
        assert!(by_key.is_idempotent(&Entry::single("safe/1", Mutation::DeleteFromRow)));
    }

    #[test]
    fn default_retryability_is_unavailable_only() {
        for code in StatusCode::ALL {
            assert_eq!(
                DefaultRetryability.is_retryable(code),
                code == StatusCode::Unavailable,
                "{code}"
            );
        }
    }

    #[test]
    fn retryable_codes_ignore_ok() {
        let policy = RetryableCodes::new([
            StatusCode::Ok,
            StatusCode::Aborted,
            StatusCode::DeadlineExceeded,
        ]);
        assert_eq!(policy.codes().len(), 2);
        assert!(policy.is_retryable(StatusCode::Aborted));
        assert!(!policy.is_retryable(StatusCode::Unavailable));
        assert!(!policy.is_retryable(StatusCode::Ok));
    }
}
