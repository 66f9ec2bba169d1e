use crate::error::{IdempotencyError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sub-second digits kept on every timestamp written or compared.
///
/// Postgres `timestamptz` stores microseconds, so a lease token that was
/// truncated before being written reads back byte-for-byte identical.
pub const LEASE_PRECISION_DIGITS: u16 = 6;

/// Normalizes a timestamp to the lease precision.
pub fn truncate_lease(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(LEASE_PRECISION_DIGITS)
}

/// Current wall-clock time at lease precision.
pub fn lease_now() -> DateTime<Utc> {
    truncate_lease(Utc::now())
}

/// Lifecycle status of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// An attempt owns the record and is running business logic.
    InProgress,
    /// The operation succeeded; the cached response is replayed.
    Succeeded,
    /// The current attempt failed but the operation may be retried.
    FailedRetryable,
    /// The operation failed permanently; the cached error is replayed.
    FailedFinal,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::InProgress,
        Status::Succeeded,
        Status::FailedRetryable,
        Status::FailedFinal,
    ];

    /// Statuses the cleanup sweep may delete.
    pub const TERMINAL: [Status; 3] = [
        Status::Succeeded,
        Status::FailedRetryable,
        Status::FailedFinal,
    ];

    /// Column value as persisted in `idempotency_keys.status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::InProgress => "IN_PROGRESS",
            Status::Succeeded => "SUCCEEDED",
            Status::FailedRetryable => "FAILED_RETRYABLE",
            Status::FailedFinal => "FAILED_FINAL",
        }
    }

    /// Returns true if no attempt is running against the record.
    ///
    /// `FailedRetryable` is terminal for the attempt, not for the operation.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::InProgress)
    }

    /// Returns true if the stored outcome should be replayed to the caller.
    pub fn is_replayable(&self) -> bool {
        matches!(self, Status::Succeeded | Status::FailedFinal)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = IdempotencyError;

    fn from_str(s: &str) -> Result<Self> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| IdempotencyError::InvalidStatus {
                value: s.to_string(),
            })
    }
}

/// Composite identity of an idempotent operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Authenticated caller or tenant, e.g. a merchant id.
    pub principal: String,
    /// Logical operation name, e.g. a gRPC full method.
    pub method: String,
    /// Caller-supplied deduplication key.
    pub idempotency_key: String,
}

impl Identity {
    pub fn new(
        principal: impl Into<String>,
        method: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            method: method.into(),
            idempotency_key: idempotency_key.into(),
        }
    }

    /// Rejects blank identity fields.
    pub fn validate(&self) -> Result<()> {
        require_non_blank("principal", &self.principal)?;
        require_non_blank("method", &self.method)?;
        require_non_blank("idempotency_key", &self.idempotency_key)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.principal, self.method, self.idempotency_key)
    }
}

pub(crate) fn require_non_blank(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(IdempotencyError::MissingField { field });
    }
    Ok(())
}

/// Timestamps at or before the Unix epoch are treated as unset.
pub(crate) fn require_timestamp(field: &'static str, value: DateTime<Utc>) -> Result<()> {
    if value.timestamp() <= 0 {
        return Err(IdempotencyError::MissingField { field });
    }
    Ok(())
}

/// Persisted idempotency state for one operation and its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub principal: String,
    pub method: String,
    pub idempotency_key: String,
    /// Fingerprint of the request payload; immutable once created.
    pub request_hash: String,
    pub status: Status,
    pub response_code: i32,
    pub response_payload: Option<Vec<u8>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Lease token. Every owning transition writes a new value.
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Record {
    /// Builds a fresh `IN_PROGRESS` record for a first reservation.
    pub fn reservation(
        identity: Identity,
        request_hash: impl Into<String>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = truncate_lease(now);
        Self {
            principal: identity.principal,
            method: identity.method,
            idempotency_key: identity.idempotency_key,
            request_hash: request_hash.into(),
            status: Status::InProgress,
            response_code: 0,
            response_payload: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            expires_at: truncate_lease(expires_at),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(&self.principal, &self.method, &self.idempotency_key)
    }

    /// Returns true if the retention horizon has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Checks the invariants a record must hold before it is reserved.
    pub fn validate_for_reserve(&self) -> Result<()> {
        self.identity().validate()?;
        require_non_blank("request_hash", &self.request_hash)?;
        require_timestamp("expires_at", self.expires_at)?;
        require_timestamp("updated_at", self.updated_at)?;
        // Compared at lease precision: the stored values are truncated.
        let created_at = truncate_lease(self.created_at);
        let expires_at = truncate_lease(self.expires_at);
        if expires_at <= created_at {
            return Err(IdempotencyError::InvalidExpiry {
                created_at,
                expires_at,
            });
        }
        Ok(())
    }

    /// Returns the record with all timestamps at lease precision.
    pub fn normalized(mut self) -> Self {
        self.created_at = truncate_lease(self.created_at);
        self.updated_at = truncate_lease(self.updated_at);
        self.expires_at = truncate_lease(self.expires_at);
        self
    }
}

/// Outcome written by `complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub status: Status,
    pub response_code: i32,
    pub response_payload: Option<Vec<u8>>,
    pub error_message: Option<String>,
    /// Lease the caller holds. `None` means the lease returned by `begin`.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Completion {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            response_code: 0,
            response_payload: None,
            error_message: None,
            updated_at: None,
        }
    }

    pub fn succeeded(response_code: i32, response_payload: Vec<u8>) -> Self {
        Self::new(Status::Succeeded)
            .with_response_code(response_code)
            .with_payload(response_payload)
    }

    pub fn failed_retryable(error_message: impl Into<String>) -> Self {
        Self::new(Status::FailedRetryable).with_error(error_message)
    }

    pub fn failed_final(response_code: i32, error_message: impl Into<String>) -> Self {
        Self::new(Status::FailedFinal)
            .with_response_code(response_code)
            .with_error(error_message)
    }

    pub fn with_response_code(mut self, response_code: i32) -> Self {
        self.response_code = response_code;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.response_payload = Some(payload);
        self
    }

    pub fn with_error(mut self, error_message: impl Into<String>) -> Self {
        self.error_message = Some(error_message.into());
        self
    }

    pub fn with_lease(mut self, lease: DateTime<Utc>) -> Self {
        self.updated_at = Some(truncate_lease(lease));
        self
    }

    /// Checks the status is terminal and returns the lease to compare against.
    pub fn validate(&self) -> Result<DateTime<Utc>> {
        if !self.status.is_terminal() {
            return Err(IdempotencyError::NonTerminalCompletion {
                status: self.status,
            });
        }
        let lease = self
            .updated_at
            .ok_or(IdempotencyError::MissingField { field: "updated_at" })?;
        require_timestamp("updated_at", lease)?;
        Ok(truncate_lease(lease))
    }
}
