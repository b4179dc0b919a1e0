/// Actor rows - one per DID this AppView has decided to remember
use crate::error::LensResult;
use chrono::Utc;
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Actor {
    pub did: String,
    pub handle: Option<String>,
    pub pds: Option<String>,
    pub status: String,
    pub backfill_status: String,
    pub created_at: Option<String>,
    pub indexed_at: String,
}

/// Insert the actor if it is not already known. Existing rows are left
/// untouched so a later sighting never clobbers a resolved handle.
pub async fn ensure(db: impl SqliteExecutor<'_>, did: &str) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO actor (did, indexed_at) VALUES (?1, ?2)
         ON CONFLICT(did) DO NOTHING",
    )
    .bind(did)
    .bind(Utc::now().to_rfc3339())
    .execute(db)
    .await?;

    Ok(())
}

pub async fn get(db: impl SqliteExecutor<'_>, did: &str) -> LensResult<Option<Actor>> {
    let actor = sqlx::query_as::<_, Actor>("SELECT * FROM actor WHERE did = ?1")
        .bind(did)
        .fetch_optional(db)
        .await?;

    Ok(actor)
}

/// The actor's handle, if the row exists and the handle has been resolved
pub async fn handle_of(db: impl SqliteExecutor<'_>, did: &str) -> LensResult<Option<String>> {
    let handle: Option<Option<String>> =
        sqlx::query_scalar("SELECT handle FROM actor WHERE did = ?1")
            .bind(did)
            .fetch_optional(db)
            .await?;

    Ok(handle.flatten())
}

pub async fn set_handle(db: impl SqliteExecutor<'_>, did: &str, handle: &str) -> LensResult<()> {
    sqlx::query("UPDATE actor SET handle = ?2, indexed_at = ?3 WHERE did = ?1")
        .bind(did)
        .bind(handle)
        .bind(Utc::now().to_rfc3339())
        .execute(db)
        .await?;

    Ok(())
}

pub async fn set_pds(db: impl SqliteExecutor<'_>, did: &str, pds: &str) -> LensResult<()> {
    sqlx::query("UPDATE actor SET pds = ?2 WHERE did = ?1")
        .bind(did)
        .bind(pds)
        .execute(db)
        .await?;

    Ok(())
}

pub async fn set_status(db: impl SqliteExecutor<'_>, did: &str, status: &str) -> LensResult<()> {
    sqlx::query("UPDATE actor SET status = ?2 WHERE did = ?1")
        .bind(did)
        .bind(status)
        .execute(db)
        .await?;

    Ok(())
}

pub async fn set_backfill_status(
    db: impl SqliteExecutor<'_>,
    did: &str,
    status: &str,
) -> LensResult<()> {
    sqlx::query("UPDATE actor SET backfill_status = ?2 WHERE did = ?1")
        .bind(did)
        .bind(status)
        .execute(db)
        .await?;

    Ok(())
}

/// Remove the actor. Records and typed rows cascade with it.
pub async fn delete(db: impl SqliteExecutor<'_>, did: &str) -> LensResult<u64> {
    let result = sqlx::query("DELETE FROM actor WHERE did = ?1")
        .bind(did)
        .execute(db)
        .await?;

    Ok(result.rows_affected())
}

pub async fn count(db: impl SqliteExecutor<'_>) -> LensResult<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM actor")
        .fetch_one(db)
        .await?;

    Ok(n)
}
