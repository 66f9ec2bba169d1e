use crate::error::{IdempotencyError, Result};
use crate::idempotency::store::{Reservation, Store};
use crate::models::{lease_now, truncate_lease, Completion, Identity, Record, Status};
use crate::models::record::{require_non_blank, require_timestamp};
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

const RECORD_COLUMNS: &str = "principal, grpc_method, idempotency_key, request_hash, status, response_code, response_payload, error_message, created_at, updated_at, expires_at";

/// Row shape of `idempotency_keys`. Status stays a string until it is
/// checked against the closed enum.
#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    principal: String,
    grpc_method: String,
    idempotency_key: String,
    request_hash: String,
    status: String,
    response_code: i32,
    response_payload: Option<Vec<u8>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for Record {
    type Error = IdempotencyError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(Record {
            principal: row.principal,
            method: row.grpc_method,
            idempotency_key: row.idempotency_key,
            request_hash: row.request_hash,
            status: row.status.parse()?,
            response_code: row.response_code,
            response_payload: row.response_payload,
            error_message: row.error_message,
            created_at: truncate_lease(row.created_at),
            updated_at: truncate_lease(row.updated_at),
            expires_at: truncate_lease(row.expires_at),
        })
    }
}

/// PostgreSQL-backed idempotency store.
///
/// Each operation is one statement executed in its own implicit transaction,
/// so the predicate check and the write are indivisible.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trips a trivial query to check connectivity.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_if_absent(&self, record: &Record) -> Result<Option<Record>> {
        let sql = format!(
            r#"
            INSERT INTO idempotency_keys ({RECORD_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (principal, grpc_method, idempotency_key) DO NOTHING
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(&record.principal)
            .bind(&record.method)
            .bind(&record.idempotency_key)
            .bind(&record.request_hash)
            .bind(record.status.as_str())
            .bind(record.response_code)
            .bind(&record.response_payload)
            .bind(&record.error_message)
            .bind(record.created_at)
            .bind(record.updated_at)
            .bind(record.expires_at)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Record::try_from).transpose()
    }
}

/// Turns the follow-up read of a conflicting insert into a reservation.
fn resolve_conflict(record: Record, existing: Option<Record>) -> Result<Reservation> {
    let identity = record.identity();
    let existing = existing.ok_or_else(|| IdempotencyError::InconsistentState {
        identity: identity.clone(),
    })?;

    if existing.request_hash != record.request_hash {
        return Err(IdempotencyError::RequestHashMismatch {
            identity,
            stored: existing.request_hash,
            supplied: record.request_hash,
        });
    }

    Ok(Reservation {
        reserved: false,
        record: existing,
    })
}

#[async_trait]
impl Store for PostgresStore {
    #[tracing::instrument(skip_all, fields(principal = %record.principal, method = %record.method))]
    async fn reserve(&self, record: &Record) -> Result<Reservation> {
        let record = record.clone().normalized();
        record.validate_for_reserve()?;
        let timer = LatencyTimer::new();

        if let Some(inserted) = self.insert_if_absent(&record).await? {
            get_metrics().record_store_latency("reserve", timer.elapsed_ms());
            return Ok(Reservation {
                reserved: true,
                record: inserted,
            });
        }

        let existing = self.get(&record.identity()).await?;
        get_metrics().record_store_latency("reserve", timer.elapsed_ms());
        resolve_conflict(record, existing)
    }

    async fn get(&self, identity: &Identity) -> Result<Option<Record>> {
        identity.validate()?;

        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM idempotency_keys
            WHERE principal = $1 AND grpc_method = $2 AND idempotency_key = $3
            "#
        );

        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(&identity.principal)
            .bind(&identity.method)
            .bind(&identity.idempotency_key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Record::try_from).transpose()
    }

    #[tracing::instrument(skip_all, fields(principal = %identity.principal, method = %identity.method))]
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
        let timer = LatencyTimer::new();

        let result = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET status = $5,
                response_code = 0,
                response_payload = NULL,
                error_message = NULL,
                updated_at = $6
            WHERE principal = $1 AND grpc_method = $2 AND idempotency_key = $3
              AND request_hash = $4
              AND status = $7
              AND expires_at > $6
              AND updated_at < $6
            "#,
        )
        .bind(&identity.principal)
        .bind(&identity.method)
        .bind(&identity.idempotency_key)
        .bind(request_hash)
        .bind(Status::InProgress.as_str())
        .bind(new_lease)
        .bind(Status::FailedRetryable.as_str())
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        get_metrics().record_store_latency("reacquire_retryable", timer.elapsed_ms());
        get_metrics().record_cas("reacquire_retryable", applied);
        Ok(applied)
    }

    #[tracing::instrument(skip_all, fields(principal = %identity.principal, method = %identity.method, status = %completion.status))]
    async fn complete(&self, identity: &Identity, completion: &Completion) -> Result<bool> {
        identity.validate()?;
        let lease = completion.validate()?;
        // The new lease never moves backwards relative to the one being released.
        let completed_at = lease_now().max(lease);
        let timer = LatencyTimer::new();

        let result = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET status = $4,
                response_code = $5,
                response_payload = $6,
                error_message = $7,
                updated_at = $8
            WHERE principal = $1 AND grpc_method = $2 AND idempotency_key = $3
              AND status = $9
              AND updated_at = $10
            "#,
        )
        .bind(&identity.principal)
        .bind(&identity.method)
        .bind(&identity.idempotency_key)
        .bind(completion.status.as_str())
        .bind(completion.response_code)
        .bind(&completion.response_payload)
        .bind(&completion.error_message)
        .bind(completed_at)
        .bind(Status::InProgress.as_str())
        .bind(lease)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        get_metrics().record_store_latency("complete", timer.elapsed_ms());
        get_metrics().record_cas("complete", applied);
        Ok(applied)
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        require_timestamp("cutoff", cutoff)?;
        let terminal: Vec<String> = Status::TERMINAL
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();
        let timer = LatencyTimer::new();

        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_keys
            WHERE expires_at <= $1
              AND status = ANY($2)
            "#,
        )
        .bind(truncate_lease(cutoff))
        .bind(terminal)
        .execute(&self.pool)
        .await?;

        get_metrics().record_store_latency("delete_expired", timer.elapsed_ms());
        get_metrics().record_swept(result.rows_affected());
        Ok(result.rows_affected())
    }
}
