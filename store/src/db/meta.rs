//! Sync metadata: device identity and per-collection watermarks.

use super::Pool;

/// Read a metadata value.
pub async fn get_meta(pool: &Pool, key: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT value FROM sync_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
}

/// Write a metadata value.
pub async fn set_meta(pool: &Pool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sync_meta (key, value) VALUES (?, ?) \
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// The device's persistent identity: generated once, reused across
/// restarts.
pub async fn device_id(pool: &Pool) -> Result<String, sqlx::Error> {
    if let Some(existing) = get_meta(pool, "device_id").await? {
        return Ok(existing);
    }

    let generated = uuid::Uuid::new_v4().to_string();
    set_meta(pool, "device_id", &generated).await?;
    Ok(generated)
}

/// Last successful sync watermark for a collection (milliseconds).
pub async fn last_sync_at(pool: &Pool, collection: &str) -> Result<Option<u64>, sqlx::Error> {
    let value = get_meta(pool, &format!("last_sync:{collection}")).await?;
    Ok(value.and_then(|v| v.parse().ok()))
}

/// Record a collection's sync watermark.
pub async fn set_last_sync_at(
    pool: &Pool,
    collection: &str,
    timestamp: u64,
) -> Result<(), sqlx::Error> {
    set_meta(pool, &format!("last_sync:{collection}"), &timestamp.to_string()).await
}
