//! Database operations for the outbox and dead-letter tables.

use satchel_engine::{OutboxEntry, OutboxOp};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::Row;

use super::Pool;

/// A stored outbox row from the database.
#[derive(Debug)]
pub struct StoredOutboxEntry {
    /// Monotonic enqueue sequence, the FIFO order
    pub seq: i64,
    pub id: String,
    pub collection: String,
    pub record_id: String,
    pub operation: String,
    pub payload: Option<serde_json::Value>,
    pub enqueued_at: i64,
    pub attempt_count: i64,
    pub not_before: i64,
    pub last_error: Option<String>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredOutboxEntry {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredOutboxEntry {
            seq: row.try_get("seq")?,
            id: row.try_get("id")?,
            collection: row.try_get("collection")?,
            record_id: row.try_get("record_id")?,
            operation: row.try_get("operation")?,
            payload: row
                .try_get::<Option<Json<serde_json::Value>>, _>("payload")?
                .map(|json| json.0),
            enqueued_at: row.try_get("enqueued_at")?,
            attempt_count: row.try_get("attempt_count")?,
            not_before: row.try_get("not_before")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

impl StoredOutboxEntry {
    /// Convert a database row to an engine OutboxEntry.
    pub fn into_entry(self) -> Result<OutboxEntry, String> {
        let operation = OutboxOp::parse(&self.operation)
            .ok_or_else(|| format!("unknown outbox operation: {}", self.operation))?;

        Ok(OutboxEntry {
            id: self.id,
            collection: self.collection,
            record_id: self.record_id,
            operation,
            payload: self.payload,
            enqueued_at: self.enqueued_at as u64,
            attempt_count: self.attempt_count as u32,
            not_before: self.not_before as u64,
            last_error: self.last_error,
        })
    }
}

/// Append an entry to the outbox.
pub async fn insert_entry<'e, E>(executor: E, entry: &OutboxEntry) -> Result<(), sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO outbox (
            id, collection, record_id, operation, payload,
            enqueued_at, attempt_count, not_before, last_error
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.collection)
    .bind(&entry.record_id)
    .bind(entry.operation.as_str())
    .bind(entry.payload.as_ref().map(Json))
    .bind(entry.enqueued_at as i64)
    .bind(entry.attempt_count as i64)
    .bind(entry.not_before as i64)
    .bind(&entry.last_error)
    .execute(executor)
    .await?;

    Ok(())
}

/// All queued entries in enqueue order.
pub async fn all_entries(pool: &Pool) -> Result<Vec<StoredOutboxEntry>, sqlx::Error> {
    sqlx::query_as::<_, StoredOutboxEntry>(
        "SELECT seq, id, collection, record_id, operation, payload, \
                enqueued_at, attempt_count, not_before, last_error \
         FROM outbox ORDER BY seq ASC",
    )
    .fetch_all(pool)
    .await
}

/// Remove a delivered entry.
pub async fn remove_entry<'e, E>(executor: E, id: &str) -> Result<(), sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query("DELETE FROM outbox WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Drop every queued entry for a record, e.g. once a batch upload carried
/// its latest state.
pub async fn remove_entries_for_record<'e, E>(
    executor: E,
    collection: &str,
    record_id: &str,
) -> Result<u64, sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM outbox WHERE collection = ? AND record_id = ?")
        .bind(collection)
        .bind(record_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Persist an entry's failure bookkeeping (attempt count, schedule, error).
pub async fn update_attempt(pool: &Pool, entry: &OutboxEntry) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE outbox SET attempt_count = ?, not_before = ?, last_error = ? WHERE id = ?")
        .bind(entry.attempt_count as i64)
        .bind(entry.not_before as i64)
        .bind(&entry.last_error)
        .bind(&entry.id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Count queued entries, optionally per collection and operation.
pub async fn outbox_count(
    pool: &Pool,
    collection: Option<&str>,
    operation: Option<OutboxOp>,
) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM outbox \
         WHERE (? IS NULL OR collection = ?) AND (? IS NULL OR operation = ?)",
    )
    .bind(collection)
    .bind(collection)
    .bind(operation.map(|op| op.as_str()))
    .bind(operation.map(|op| op.as_str()))
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

/// Move an exhausted entry to the dead-letter table, atomically.
pub async fn move_to_dead_letter(
    pool: &Pool,
    entry: &OutboxEntry,
    now: u64,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO dead_letter (
            id, collection, record_id, operation, payload,
            enqueued_at, attempt_count, last_error, dead_lettered_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.collection)
    .bind(&entry.record_id)
    .bind(entry.operation.as_str())
    .bind(entry.payload.as_ref().map(Json))
    .bind(entry.enqueued_at as i64)
    .bind(entry.attempt_count as i64)
    .bind(&entry.last_error)
    .bind(now as i64)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM outbox WHERE id = ?")
        .bind(&entry.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// A dead-lettered entry, kept for operator inspection.
#[derive(Debug)]
pub struct DeadLetter {
    pub id: String,
    pub collection: String,
    pub record_id: String,
    pub operation: String,
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub dead_lettered_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for DeadLetter {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(DeadLetter {
            id: row.try_get("id")?,
            collection: row.try_get("collection")?,
            record_id: row.try_get("record_id")?,
            operation: row.try_get("operation")?,
            attempt_count: row.try_get("attempt_count")?,
            last_error: row.try_get("last_error")?,
            dead_lettered_at: row.try_get("dead_lettered_at")?,
        })
    }
}

/// All dead-lettered entries, oldest first.
pub async fn dead_letters(pool: &Pool) -> Result<Vec<DeadLetter>, sqlx::Error> {
    sqlx::query_as::<_, DeadLetter>(
        "SELECT id, collection, record_id, operation, attempt_count, \
                last_error, dead_lettered_at \
         FROM dead_letter ORDER BY dead_lettered_at ASC, id ASC",
    )
    .fetch_all(pool)
    .await
}

/// Count of dead-lettered entries.
pub async fn dead_letter_count(pool: &Pool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letter")
        .fetch_one(pool)
        .await?;

    Ok(row.0)
}
