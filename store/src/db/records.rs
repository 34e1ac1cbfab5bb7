//! Database operations for the records table.

use satchel_engine::{Record, SyncStatus, VectorClock};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::Row;

use super::Pool;

/// A stored record row from the database.
#[derive(Debug)]
pub struct StoredRecord {
    pub collection: String,
    pub record_id: String,
    pub version: i64,
    pub payload: serde_json::Value,
    pub base_payload: Option<serde_json::Value>,
    pub origin_device: String,
    pub last_modified: i64,
    pub vector_clock: VectorClock,
    pub sync_status: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            collection: row.try_get("collection")?,
            record_id: row.try_get("record_id")?,
            version: row.try_get("version")?,
            payload: row.try_get::<Json<serde_json::Value>, _>("payload")?.0,
            base_payload: row
                .try_get::<Option<Json<serde_json::Value>>, _>("base_payload")?
                .map(|json| json.0),
            origin_device: row.try_get("origin_device")?,
            last_modified: row.try_get("last_modified")?,
            vector_clock: row.try_get::<Json<VectorClock>, _>("vector_clock")?.0,
            sync_status: row.try_get("sync_status")?,
        })
    }
}

impl StoredRecord {
    /// Convert a database row to an engine Record.
    pub fn into_record(self) -> Result<Record, String> {
        let sync_status = SyncStatus::parse(&self.sync_status)
            .ok_or_else(|| format!("unknown sync status: {}", self.sync_status))?;

        Ok(Record {
            id: self.record_id,
            collection: self.collection,
            payload: self.payload,
            version: self.version as u64,
            origin_device: self.origin_device,
            last_modified: self.last_modified as u64,
            vector_clock: self.vector_clock,
            sync_status,
            base_payload: self.base_payload,
        })
    }
}

const SELECT_COLUMNS: &str = "collection, record_id, version, payload, base_payload, \
     origin_device, last_modified, vector_clock, sync_status";

/// Upsert a record (insert or replace by primary key).
pub async fn upsert_record<'e, E>(executor: E, record: &Record) -> Result<(), sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO records (
            collection, record_id, version, payload, base_payload,
            origin_device, last_modified, vector_clock, sync_status
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (collection, record_id) DO UPDATE SET
            version = excluded.version,
            payload = excluded.payload,
            base_payload = excluded.base_payload,
            origin_device = excluded.origin_device,
            last_modified = excluded.last_modified,
            vector_clock = excluded.vector_clock,
            sync_status = excluded.sync_status
        "#,
    )
    .bind(&record.collection)
    .bind(&record.id)
    .bind(record.version as i64)
    .bind(Json(&record.payload))
    .bind(record.base_payload.as_ref().map(Json))
    .bind(&record.origin_device)
    .bind(record.last_modified as i64)
    .bind(Json(&record.vector_clock))
    .bind(record.sync_status.as_str())
    .execute(executor)
    .await?;

    Ok(())
}

/// Get a record by collection and ID.
pub async fn get_record<'e, E>(
    executor: E,
    collection: &str,
    record_id: &str,
) -> Result<Option<StoredRecord>, sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query_as::<_, StoredRecord>(&format!(
        "SELECT {SELECT_COLUMNS} FROM records WHERE collection = ? AND record_id = ?"
    ))
    .bind(collection)
    .bind(record_id)
    .fetch_optional(executor)
    .await
}

/// Delete a record row; returns the number of rows removed.
pub async fn delete_record<'e, E>(
    executor: E,
    collection: &str,
    record_id: &str,
) -> Result<u64, sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM records WHERE collection = ? AND record_id = ?")
        .bind(collection)
        .bind(record_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Index scan over a collection by last-modified time.
///
/// A negative SQLite LIMIT means "no limit".
pub async fn query_modified<'e, E>(
    executor: E,
    collection: &str,
    since: Option<i64>,
    until: Option<i64>,
    limit: Option<i64>,
) -> Result<Vec<StoredRecord>, sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query_as::<_, StoredRecord>(&format!(
        "SELECT {SELECT_COLUMNS} FROM records \
         WHERE collection = ? AND last_modified >= ? AND last_modified <= ? \
         ORDER BY last_modified ASC, record_id ASC \
         LIMIT ?"
    ))
    .bind(collection)
    .bind(since.unwrap_or(0))
    .bind(until.unwrap_or(i64::MAX))
    .bind(limit.unwrap_or(-1))
    .fetch_all(executor)
    .await
}

/// All records awaiting remote acknowledgment, oldest first.
pub async fn pending_records<'e, E>(
    executor: E,
    collection: &str,
) -> Result<Vec<StoredRecord>, sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query_as::<_, StoredRecord>(&format!(
        "SELECT {SELECT_COLUMNS} FROM records \
         WHERE collection = ? AND sync_status = 'pending' \
         ORDER BY last_modified ASC, record_id ASC"
    ))
    .bind(collection)
    .fetch_all(executor)
    .await
}

/// Count of records awaiting remote acknowledgment.
pub async fn pending_count<'e, E>(executor: E, collection: &str) -> Result<i64, sqlx::Error>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM records WHERE collection = ? AND sync_status = 'pending'",
    )
    .bind(collection)
    .fetch_one(executor)
    .await?;

    Ok(row.0)
}

/// Mark records as acknowledged: status `synced`, payload snapshotted as
/// the new merge baseline.
pub async fn mark_synced(
    pool: &Pool,
    collection: &str,
    record_ids: &[String],
) -> Result<(), sqlx::Error> {
    for record_id in record_ids {
        sqlx::query(
            "UPDATE records SET sync_status = 'synced', base_payload = payload \
             WHERE collection = ? AND record_id = ?",
        )
        .bind(collection)
        .bind(record_id)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Collections present in local data: stored records plus queued outbox
/// work (a deleted record survives only as its tombstone entry).
pub async fn distinct_collections(pool: &Pool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT DISTINCT collection FROM records \
         UNION SELECT DISTINCT collection FROM outbox \
         ORDER BY 1",
    )
    .fetch_all(pool)
    .await
}
