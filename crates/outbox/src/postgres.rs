use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{Dispatch, DispatchReport, OutboxId, OutboxRecord, OutboxStore, Result};

/// PostgreSQL-backed outbox store.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Inserts a record inside a caller-owned transaction.
    ///
    /// The record becomes visible to the sweeper only when the caller commits,
    /// together with whatever domain change the transaction carries.
    pub async fn enqueue_in(tx: &mut Transaction<'_, Postgres>, record: &OutboxRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox
                (id, topic, event_type, payload, sent, created_at, sent_at, attempts, last_attempt_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.topic)
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(record.sent)
        .bind(record.created_at)
        .bind(record.sent_at)
        .bind(i32::try_from(record.attempts).unwrap_or(i32::MAX))
        .bind(record.last_attempt_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<OutboxRecord> {
        Ok(OutboxRecord {
            id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
            topic: row.try_get("topic")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            sent: row.try_get("sent")?,
            created_at: row.try_get("created_at")?,
            sent_at: row.try_get("sent_at")?,
            attempts: u32::try_from(row.try_get::<i32, _>("attempts")?).unwrap_or(0),
            last_attempt_at: row.try_get("last_attempt_at")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn enqueue(&self, record: OutboxRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::enqueue_in(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn dispatch_unsent(
        &self,
        limit: usize,
        dispatch: &dyn Dispatch,
    ) -> Result<DispatchReport> {
        let mut tx = self.pool.begin().await?;

        // Rows stay locked until commit; concurrent sweepers skip them.
        let rows = sqlx::query(
            r#"
            SELECT id, topic, event_type, payload, sent, created_at, sent_at, attempts, last_attempt_at
            FROM outbox
            WHERE sent = FALSE
            ORDER BY last_attempt_at ASC NULLS FIRST, created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        let mut report = DispatchReport::default();
        for row in rows {
            let record = Self::row_to_record(row)?;
            match dispatch.dispatch(&record).await {
                Ok(()) => {
                    sqlx::query("UPDATE outbox SET sent = TRUE, sent_at = $2 WHERE id = $1")
                        .bind(record.id.as_uuid())
                        .bind(Utc::now())
                        .execute(&mut *tx)
                        .await?;
                    report.published += 1;
                }
                Err(reason) => {
                    tracing::warn!(
                        id = %record.id,
                        topic = %record.topic,
                        attempts = record.attempts + 1,
                        %reason,
                        "Outbox dispatch failed"
                    );
                    sqlx::query(
                        "UPDATE outbox SET attempts = attempts + 1, last_attempt_at = $2 WHERE id = $1",
                    )
                    .bind(record.id.as_uuid())
                    .bind(Utc::now())
                    .execute(&mut *tx)
                    .await?;
                    report.failed += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    async fn purge_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM outbox WHERE sent = TRUE AND sent_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, topic, event_type, payload, sent, created_at, sent_at, attempts, last_attempt_at
            FROM outbox
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn unsent_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE sent = FALSE")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
