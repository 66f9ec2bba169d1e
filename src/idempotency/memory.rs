use crate::error::{IdempotencyError, Result};
use crate::idempotency::store::{Reservation, Store};
use crate::models::record::{require_non_blank, require_timestamp};
use crate::models::{lease_now, truncate_lease, Completion, Identity, Record, Status};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Process-local store with the same compare-and-swap rules as
/// [`PostgresStore`](crate::idempotency::PostgresStore).
///
/// The map lock plays the role of the database's atomic statement: every
/// operation checks and writes under a single acquisition. Useful for tests
/// and for single-process embedders.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Identity, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Identity, Record>> {
        // A panic while holding the lock cannot leave a half-written record:
        // every mutation is a single insert or field assignment.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn reserve(&self, record: &Record) -> Result<Reservation> {
        let record = record.clone().normalized();
        record.validate_for_reserve()?;
        let identity = record.identity();

        let mut records = self.lock();
        match records.get(&identity) {
            Some(existing) if existing.request_hash != record.request_hash => {
                Err(IdempotencyError::RequestHashMismatch {
                    identity,
                    stored: existing.request_hash.clone(),
                    supplied: record.request_hash,
                })
            }
            Some(existing) => Ok(Reservation {
                reserved: false,
                record: existing.clone(),
            }),
            None => {
                records.insert(identity, record.clone());
                Ok(Reservation {
                    reserved: true,
                    record,
                })
            }
        }
    }

    async fn get(&self, identity: &Identity) -> Result<Option<Record>> {
        identity.validate()?;
        Ok(self.lock().get(identity).cloned())
    }

    async fn reacquire_retryable(
        &self,
        identity: &Identity,
        request_hash: &str,
        new_lease: DateTime<Utc>,
    ) -> Result<bool> {
        identity.validate()?;
        require_non_blank("request_hash", request_hash)?;
        require_timestamp("updated_at", new_lease)?;
        let new_lease = truncate_lease(new_lease);

        let mut records = self.lock();
        let Some(record) = records.get_mut(identity) else {
            return Ok(false);
        };
        if record.request_hash != request_hash
            || record.status != Status::FailedRetryable
            || record.expires_at <= new_lease
            || record.updated_at >= new_lease
        {
            return Ok(false);
        }

        record.status = Status::InProgress;
        record.response_code = 0;
        record.response_payload = None;
        record.error_message = None;
        record.updated_at = new_lease;
        Ok(true)
    }

    async fn complete(&self, identity: &Identity, completion: &Completion) -> Result<bool> {
        identity.validate()?;
        let lease = completion.validate()?;

        let mut records = self.lock();
        let Some(record) = records.get_mut(identity) else {
            return Ok(false);
        };
        if record.status != Status::InProgress || record.updated_at != lease {
            return Ok(false);
        }

        record.status = completion.status;
        record.response_code = completion.response_code;
        record.response_payload = completion.response_payload.clone();
        record.error_message = completion.error_message.clone();
        record.updated_at = lease_now().max(lease);
        Ok(true)
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        require_timestamp("cutoff", cutoff)?;
        let cutoff = truncate_lease(cutoff);

        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| !(record.status.is_terminal() && record.is_expired_at(cutoff)));
        Ok((before - records.len()) as u64)
    }
}
