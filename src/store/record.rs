/// Generic record envelope - the parent row every typed projection hangs off
use crate::error::LensResult;
use chrono::Utc;
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Record {
    pub uri: String,
    pub cid: String,
    pub did: String,
    pub collection: String,
    pub rev: Option<String>,
    pub json: String,
    pub indexed_at: String,
}

/// Last-write-wins upsert keyed by URI
pub async fn upsert(
    db: impl SqliteExecutor<'_>,
    uri: &str,
    cid: &str,
    did: &str,
    collection: &str,
    rev: Option<&str>,
    json: &str,
) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO record (uri, cid, did, collection, rev, json, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(uri) DO UPDATE SET
             cid = excluded.cid,
             rev = excluded.rev,
             json = excluded.json,
             indexed_at = excluded.indexed_at",
    )
    .bind(uri)
    .bind(cid)
    .bind(did)
    .bind(collection)
    .bind(rev)
    .bind(json)
    .bind(Utc::now().to_rfc3339())
    .execute(db)
    .await?;

    Ok(())
}

pub async fn get(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<Option<Record>> {
    let record = sqlx::query_as::<_, Record>("SELECT * FROM record WHERE uri = ?1")
        .bind(uri)
        .fetch_optional(db)
        .await?;

    Ok(record)
}

pub async fn exists(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<bool> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM record WHERE uri = ?1")
        .bind(uri)
        .fetch_one(db)
        .await?;

    Ok(n > 0)
}

/// Delete by URI; returns how many rows went away (0 for a never-seen URI,
/// which is a valid no-op under at-least-once delivery)
pub async fn delete(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<u64> {
    let result = sqlx::query("DELETE FROM record WHERE uri = ?1")
        .bind(uri)
        .execute(db)
        .await?;

    Ok(result.rows_affected())
}

pub async fn count(db: impl SqliteExecutor<'_>) -> LensResult<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM record")
        .fetch_one(db)
        .await?;

    Ok(n)
}
