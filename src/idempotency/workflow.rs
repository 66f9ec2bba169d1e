use crate::error::Result;
use crate::idempotency::store::Store;
use crate::models::record::{require_non_blank, require_timestamp};
use crate::models::{lease_now, Completion, Identity, Record, Status};
use crate::observability::{get_metrics, mask_key};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the caller should do after `begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The caller owns a fresh reservation and must run its business logic,
    /// then echo `lease.updated_at` back through `finish`.
    Execute { lease: Record },
    /// The operation already reached a final outcome; replay it.
    Replay { existing: Record },
    /// Another attempt is active. Ask again later.
    InProgress { existing: Record },
    /// The last attempt failed retryably. The caller's retry policy decides
    /// whether to `reacquire`.
    Retryable { existing: Record },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Execute,
    Replay,
    InProgress,
    Retryable,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Execute => "EXECUTE",
            DecisionKind::Replay => "REPLAY",
            DecisionKind::InProgress => "IN_PROGRESS",
            DecisionKind::Retryable => "RETRYABLE",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Decision {
    /// Classifies an existing record found by a non-winning reservation.
    fn for_existing(existing: Record) -> Self {
        match existing.status {
            Status::InProgress => Decision::InProgress { existing },
            Status::Succeeded | Status::FailedFinal => Decision::Replay { existing },
            Status::FailedRetryable => Decision::Retryable { existing },
        }
    }

    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::Execute { .. } => DecisionKind::Execute,
            Decision::Replay { .. } => DecisionKind::Replay,
            Decision::InProgress { .. } => DecisionKind::InProgress,
            Decision::Retryable { .. } => DecisionKind::Retryable,
        }
    }

    /// The reserved or existing record behind this decision.
    pub fn record(&self) -> &Record {
        match self {
            Decision::Execute { lease } => lease,
            Decision::Replay { existing }
            | Decision::InProgress { existing }
            | Decision::Retryable { existing } => existing,
        }
    }

    pub fn into_record(self) -> Record {
        match self {
            Decision::Execute { lease } => lease,
            Decision::Replay { existing }
            | Decision::InProgress { existing }
            | Decision::Retryable { existing } => existing,
        }
    }
}

/// Configuration for the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Retention applied by `begin_with_retention`.
    pub retention_seconds: i64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            retention_seconds: 86400, // 24 hours
        }
    }
}

/// Caller-facing state machine on top of a [`Store`].
///
/// Validation failures are returned before the store is touched. Nothing is
/// retried here; a lost compare-and-swap comes back as `Ok(false)`.
pub struct Workflow<S> {
    store: S,
    config: WorkflowConfig,
}

impl<S: Store> Workflow<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, WorkflowConfig::default())
    }

    pub fn with_config(store: S, config: WorkflowConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Reserves the identity and classifies the outcome.
    #[tracing::instrument(
        skip_all,
        fields(
            principal = %identity.principal,
            method = %identity.method,
            key = %mask_key(&identity.idempotency_key)
        )
    )]
    pub async fn begin(
        &self,
        identity: &Identity,
        request_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Decision> {
        identity.validate()?;
        require_non_blank("request_hash", request_hash)?;

        let candidate = Record::reservation(identity.clone(), request_hash, lease_now(), expires_at);
        candidate.validate_for_reserve()?;

        let reservation = self.store.reserve(&candidate).await?;
        let decision = if reservation.reserved {
            Decision::Execute {
                lease: reservation.record,
            }
        } else {
            Decision::for_existing(reservation.record)
        };

        tracing::debug!(decision = %decision.kind(), "idempotency reservation classified");
        get_metrics().record_decision(decision.kind());
        Ok(decision)
    }

    /// `begin` with `expires_at` set from the configured retention.
    pub async fn begin_with_retention(
        &self,
        identity: &Identity,
        request_hash: &str,
    ) -> Result<Decision> {
        let expires_at = lease_now() + Duration::seconds(self.config.retention_seconds);
        self.begin(identity, request_hash, expires_at).await
    }

    /// Records the outcome of the attempt holding `lease`.
    ///
    /// Returns `false` if a different attempt already decided the operation;
    /// the caller must then discard its own result.
    #[tracing::instrument(skip_all, fields(principal = %lease.principal, method = %lease.method, status = %completion.status))]
    pub async fn finish(&self, lease: &Record, mut completion: Completion) -> Result<bool> {
        let identity = lease.identity();
        identity.validate()?;

        if completion.updated_at.is_none() {
            completion.updated_at = Some(lease.updated_at);
        }
        completion.validate()?;

        let applied = self.store.complete(&identity, &completion).await?;
        if !applied {
            tracing::debug!("completion lost the lease race");
        }
        Ok(applied)
    }

    /// Takes ownership of a `FAILED_RETRYABLE` record under `new_lease`.
    ///
    /// On success the caller must pass `new_lease` to `finish` via
    /// [`Completion::with_lease`].
    #[tracing::instrument(skip_all, fields(principal = %record.principal, method = %record.method))]
    pub async fn reacquire(&self, record: &Record, new_lease: DateTime<Utc>) -> Result<bool> {
        let identity = record.identity();
        identity.validate()?;
        require_non_blank("request_hash", &record.request_hash)?;
        require_timestamp("updated_at", new_lease)?;

        let applied = self
            .store
            .reacquire_retryable(&identity, &record.request_hash, new_lease)
            .await?;
        if !applied {
            tracing::debug!("reacquire lost the lease race");
        }
        Ok(applied)
    }

    /// Reads the current state of an operation.
    pub async fn get(&self, identity: &Identity) -> Result<Option<Record>> {
        identity.validate()?;
        self.store.get(identity).await
    }

    /// Deletes terminal records expired at `cutoff`. Runs only when called.
    pub async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let deleted = self.store.delete_expired(cutoff).await?;
        if deleted > 0 {
            tracing::info!("Purged {} expired idempotency records", deleted);
        }
        Ok(deleted)
    }
}
