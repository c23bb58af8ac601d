use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::AnyPool;

/// Durable fact that one item was migrated into a pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedInsert {
    pub source: String,
    pub collection: String,
    pub item_id: String,
    pub url_hash: String,
}

/// Remote pack identity assigned to a (source, collection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRecord {
    pub title: String,
    pub short_name: String,
}

/// True iff a processed record with that exact key exists. No side effects.
pub async fn is_seen(
    pool: &AnyPool,
    source: &str,
    collection: &str,
    item_id: &str,
) -> Result<bool> {
    let hit: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM processed_items WHERE source = ? AND collection = ? AND item_id = ? LIMIT 1",
    )
    .bind(source)
    .bind(collection)
    .bind(item_id)
    .fetch_optional(pool)
    .await?;
    Ok(hit.is_some())
}

/// Insert a processed record if absent. Duplicate calls are no-ops, never an
/// error; the ledger is append-only.
pub async fn remember_item(pool: &AnyPool, rec: &ProcessedInsert) -> Result<()> {
    sqlx::query(
        "INSERT INTO processed_items(source, collection, item_id, url_hash) VALUES(?, ?, ?, ?)\n         ON CONFLICT(source, collection, item_id) DO NOTHING",
    )
    .bind(&rec.source)
    .bind(&rec.collection)
    .bind(&rec.item_id)
    .bind(&rec.url_hash)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_pack(
    pool: &AnyPool,
    source: &str,
    collection: &str,
) -> Result<Option<PackRecord>> {
    let row = sqlx::query_as::<_, (String, String)>(
        "SELECT title, short_name FROM packs WHERE source = ? AND collection = ? LIMIT 1",
    )
    .bind(source)
    .bind(collection)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(title, short_name)| PackRecord { title, short_name }))
}

/// Upsert the pack identity for a key. Replaces on conflict: a pack may
/// legitimately be re-derived after an external deletion.
pub async fn save_pack(
    pool: &AnyPool,
    source: &str,
    collection: &str,
    pack: &PackRecord,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO packs(source, collection, title, short_name) VALUES(?, ?, ?, ?)\n         ON CONFLICT(source, collection) DO UPDATE SET\n           title=excluded.title, short_name=excluded.short_name, updated_at=CURRENT_TIMESTAMP",
    )
    .bind(source)
    .bind(collection)
    .bind(&pack.title)
    .bind(&pack.short_name)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn processed_count(pool: &AnyPool, source: &str, collection: &str) -> Result<i64> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM processed_items WHERE source = ? AND collection = ?",
    )
    .bind(source)
    .bind(collection)
    .fetch_one(pool)
    .await?;
    Ok(n)
}
