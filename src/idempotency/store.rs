use crate::error::Result;
use crate::models::{Completion, Identity, Record};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result of a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// True if this call created the record.
    pub reserved: bool,
    /// The freshly inserted record, or the one that already existed.
    pub record: Record,
}

/// Data-access boundary for idempotency records.
///
/// Every method maps to a single atomic statement on the backend. No method
/// retries, and a lost compare-and-swap is reported as `Ok(false)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts the record if its identity is absent, otherwise returns the
    /// existing one. Fails on a request hash mismatch.
    async fn reserve(&self, record: &Record) -> Result<Reservation>;

    /// Reads a record. Absence is not an error.
    async fn get(&self, identity: &Identity) -> Result<Option<Record>>;

    /// Moves a `FAILED_RETRYABLE` record back to `IN_PROGRESS` under `new_lease`.
    async fn reacquire_retryable(
        &self,
        identity: &Identity,
        request_hash: &str,
        new_lease: DateTime<Utc>,
    ) -> Result<bool>;

    /// Moves an `IN_PROGRESS` record to the completion's terminal status if
    /// its lease still equals `completion.updated_at`.
    async fn complete(&self, identity: &Identity, completion: &Completion) -> Result<bool>;

    /// Deletes terminal records with `expires_at <= cutoff`.
    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
