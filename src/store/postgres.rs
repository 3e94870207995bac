//! # PostgreSQL Store
//!
//! [`BatchStore`] backed by PostgreSQL through sqlx. The claim uses a single
//! `UPDATE ... WHERE rowid IN (SELECT ... FOR UPDATE SKIP LOCKED)` so
//! concurrent workers partition the queued set without blocking each other.
//!
//! Status lives in a TEXT column constrained by CHECK; payloads are JSONB.
//! Row records come back through an internal `FromRow` struct and are
//! converted to the public model, keeping the status parse in one place.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{BatchError, Result};
use crate::models::{Batch, BatchRow, BatchStatus};

use super::{BatchFinalization, BatchRowCommit, BatchStore, SlowQueryCommit};

const BATCHROW_COLUMNS: &str =
    "rowid, batch, app, op, line, context, input, status, res, blobrows, messages, doneat, doneby";

/// PostgreSQL-backed batch store
pub struct PgBatchStore {
    pool: PgPool,
}

impl PgBatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `batches` and `batchrows` tables if they do not exist
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                id UUID PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'queued'
                    CHECK (status IN ('queued', 'in_progress', 'success', 'failed', 'aborted')),
                nsuccess INTEGER NOT NULL DEFAULT 0,
                nfailed INTEGER NOT NULL DEFAULT 0,
                naborted INTEGER NOT NULL DEFAULT 0,
                outputfiles JSONB,
                reqat TIMESTAMP NOT NULL DEFAULT now(),
                doneat TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batchrows (
                rowid BIGSERIAL PRIMARY KEY,
                batch UUID NOT NULL REFERENCES batches(id),
                app TEXT NOT NULL,
                op TEXT NOT NULL,
                line INTEGER NOT NULL CHECK (line >= 0),
                context JSONB NOT NULL,
                input JSONB NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued'
                    CHECK (status IN ('queued', 'in_progress', 'success', 'failed', 'aborted')),
                res JSONB,
                blobrows JSONB,
                messages JSONB,
                doneat TIMESTAMP,
                doneby TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS ix_batchrows_claim ON batchrows(status, rowid)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS ix_batchrows_batch ON batchrows(batch, line)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert a batch record (enqueue-side helper; the dispatcher never
    /// creates batches)
    pub async fn insert_batch(&self, batch: &Batch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batches (id, status, nsuccess, nfailed, naborted, outputfiles, reqat, doneat)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(batch.id)
        .bind(batch.status.as_str())
        .bind(batch.nsuccess)
        .bind(batch.nfailed)
        .bind(batch.naborted)
        .bind(&batch.outputfiles)
        .bind(batch.reqat)
        .bind(batch.doneat)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert rows for an existing batch, returning their generated rowids
    pub async fn insert_rows(&self, rows: &[BatchRow]) -> Result<Vec<i64>> {
        let mut rowids = Vec::with_capacity(rows.len());
        let mut tx = self.pool.begin().await?;
        for row in rows {
            let (rowid,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO batchrows (batch, app, op, line, context, input, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING rowid
                "#,
            )
            .bind(row.batch)
            .bind(&row.app)
            .bind(&row.op)
            .bind(row.line)
            .bind(&row.context)
            .bind(&row.input)
            .bind(row.status.as_str())
            .fetch_one(&mut *tx)
            .await?;
            rowids.push(rowid);
        }
        tx.commit().await?;
        Ok(rowids)
    }
}

#[async_trait]
impl BatchStore for PgBatchStore {
    async fn claim_queued(&self, limit: i32, worker_id: &str) -> Result<Vec<BatchRow>> {
        let query = format!(
            r#"
            UPDATE batchrows SET status = 'in_progress', doneby = $2
            WHERE rowid IN (
                SELECT rowid FROM batchrows
                WHERE status = 'queued'
                ORDER BY rowid
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {BATCHROW_COLUMNS}
            "#
        );

        let records = sqlx::query_as::<_, BatchRowRecord>(&query)
            .bind(limit.max(0) as i64)
            .bind(worker_id)
            .fetch_all(&self.pool)
            .await?;

        let mut rows: Vec<BatchRow> = records
            .into_iter()
            .map(BatchRowRecord::into_model)
            .collect::<Result<_>>()?;
        rows.sort_by_key(|row| row.rowid);
        Ok(rows)
    }

    async fn commit_slow_query(&self, commit: SlowQueryCommit) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE batchrows
            SET status = $2, res = $3, messages = $4, doneat = $5, doneby = $6
            WHERE rowid = $1 AND status IN ('queued', 'in_progress')
            RETURNING batch
            "#,
        )
        .bind(commit.rowid)
        .bind(commit.status.as_str())
        .bind(&commit.result)
        .bind(&commit.messages)
        .bind(commit.doneat)
        .bind(&commit.doneby)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((batch_id,)) = updated {
            bump_counters(&mut tx, batch_id, commit.status).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn commit_batch_row(&self, commit: BatchRowCommit) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE batchrows
            SET status = $2, res = $3, blobrows = $4, messages = $5, doneat = $6, doneby = $7
            WHERE rowid = $1 AND status IN ('queued', 'in_progress')
            RETURNING batch
            "#,
        )
        .bind(commit.rowid)
        .bind(commit.status.as_str())
        .bind(&commit.result)
        .bind(&commit.blobrows)
        .bind(&commit.messages)
        .bind(commit.doneat)
        .bind(&commit.doneby)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((batch_id,)) = updated {
            bump_counters(&mut tx, batch_id, commit.status).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_batch_output_files(
        &self,
        batch_id: Uuid,
        output_files: &HashMap<String, String>,
    ) -> Result<()> {
        if output_files.is_empty() {
            return Ok(());
        }

        // Existing entries win on key collision
        sqlx::query(
            r#"
            UPDATE batches
            SET outputfiles = $2::jsonb || COALESCE(outputfiles, '{}'::jsonb)
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .bind(serde_json::to_value(output_files)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>> {
        let record = sqlx::query_as::<_, BatchRecord>(
            r#"
            SELECT id, status, nsuccess, nfailed, naborted, outputfiles, reqat, doneat
            FROM batches
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(BatchRecord::into_model).transpose()
    }

    async fn get_pending_rows(&self, batch_id: Uuid) -> Result<Vec<BatchRow>> {
        let query = format!(
            r#"
            SELECT {BATCHROW_COLUMNS} FROM batchrows
            WHERE batch = $1 AND status IN ('queued', 'in_progress')
            "#
        );
        let records = sqlx::query_as::<_, BatchRowRecord>(&query)
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await?;
        records.into_iter().map(BatchRowRecord::into_model).collect()
    }

    async fn get_batch_rows_sorted(&self, batch_id: Uuid) -> Result<Vec<BatchRow>> {
        let query = format!(
            r#"
            SELECT {BATCHROW_COLUMNS} FROM batchrows
            WHERE batch = $1
            ORDER BY line ASC
            "#
        );
        let records = sqlx::query_as::<_, BatchRowRecord>(&query)
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await?;
        records.into_iter().map(BatchRowRecord::into_model).collect()
    }

    async fn get_completed_batches(&self) -> Result<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT b.id FROM batches b
            WHERE b.status IN ('success', 'failed', 'aborted')
               OR (b.doneat IS NULL
                   AND EXISTS (SELECT 1 FROM batchrows r WHERE r.batch = b.id)
                   AND NOT EXISTS (
                       SELECT 1 FROM batchrows r
                       WHERE r.batch = b.id AND r.status IN ('queued', 'in_progress')
                   ))
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn finalize_batch(&self, finalization: BatchFinalization) -> Result<()> {
        // Guarded by doneat IS NULL: a finalized batch is immutable
        sqlx::query(
            r#"
            UPDATE batches
            SET status = $2,
                doneat = $3,
                outputfiles = $4::jsonb || COALESCE(outputfiles, '{}'::jsonb),
                nsuccess = $5,
                nfailed = $6,
                naborted = $7
            WHERE id = $1 AND doneat IS NULL
            "#,
        )
        .bind(finalization.batch_id)
        .bind(finalization.status.as_str())
        .bind(finalization.doneat)
        .bind(serde_json::to_value(&finalization.output_files)?)
        .bind(finalization.nsuccess)
        .bind(finalization.nfailed)
        .bind(finalization.naborted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Increment the owning batch's counter for a terminal row transition.
/// Runs inside the commit transaction, after the guarded row update.
async fn bump_counters(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    batch_id: Uuid,
    status: BatchStatus,
) -> Result<()> {
    let column = match status {
        BatchStatus::Success => "nsuccess",
        BatchStatus::Failed => "nfailed",
        BatchStatus::Aborted => "naborted",
        _ => return Ok(()),
    };
    let query = format!("UPDATE batches SET {column} = {column} + 1 WHERE id = $1");
    sqlx::query(&query).bind(batch_id).execute(&mut **tx).await?;
    Ok(())
}

/// Internal struct for batchrows query results
#[derive(FromRow)]
struct BatchRowRecord {
    rowid: i64,
    batch: Uuid,
    app: String,
    op: String,
    line: i32,
    context: serde_json::Value,
    input: serde_json::Value,
    status: String,
    res: Option<serde_json::Value>,
    blobrows: Option<serde_json::Value>,
    messages: Option<serde_json::Value>,
    doneat: Option<NaiveDateTime>,
    doneby: Option<String>,
}

impl BatchRowRecord {
    fn into_model(self) -> Result<BatchRow> {
        let status = self
            .status
            .parse::<BatchStatus>()
            .map_err(BatchError::ValidationError)?;
        Ok(BatchRow {
            rowid: self.rowid,
            batch: self.batch,
            app: self.app,
            op: self.op,
            line: self.line,
            context: self.context,
            input: self.input,
            status,
            res: self.res,
            blobrows: self.blobrows,
            messages: self.messages,
            doneat: self.doneat,
            doneby: self.doneby,
        })
    }
}

/// Internal struct for batches query results
#[derive(FromRow)]
struct BatchRecord {
    id: Uuid,
    status: String,
    nsuccess: i32,
    nfailed: i32,
    naborted: i32,
    outputfiles: Option<serde_json::Value>,
    reqat: NaiveDateTime,
    doneat: Option<NaiveDateTime>,
}

impl BatchRecord {
    fn into_model(self) -> Result<Batch> {
        let status = self
            .status
            .parse::<BatchStatus>()
            .map_err(BatchError::ValidationError)?;
        Ok(Batch {
            id: self.id,
            status,
            nsuccess: self.nsuccess,
            nfailed: self.nfailed,
            naborted: self.naborted,
            outputfiles: self.outputfiles,
            reqat: self.reqat,
            doneat: self.doneat,
        })
    }
}
