/// Follow projection - the directed edges the tracked set is derived from
use crate::error::LensResult;
use crate::lexicon::FollowRecord;
use crate::store::compute_sort_at;
use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Follow {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub subject_did: String,
    pub created_at: String,
    pub indexed_at: String,
    pub sort_at: String,
}

impl Follow {
    pub fn project(
        uri: &str,
        cid: &str,
        creator: &str,
        record: &FollowRecord,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uri: uri.to_string(),
            cid: cid.to_string(),
            creator: creator.to_string(),
            subject_did: record.subject.clone(),
            created_at: record.created_at.clone(),
            indexed_at: now.to_rfc3339(),
            sort_at: compute_sort_at(Some(&record.created_at), now),
        }
    }
}

pub async fn upsert(db: impl SqliteExecutor<'_>, follow: &Follow) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO follow (uri, cid, creator, subject_did, created_at, indexed_at, sort_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(uri) DO UPDATE SET
             cid = excluded.cid,
             subject_did = excluded.subject_did,
             created_at = excluded.created_at,
             indexed_at = excluded.indexed_at,
             sort_at = excluded.sort_at",
    )
    .bind(&follow.uri)
    .bind(&follow.cid)
    .bind(&follow.creator)
    .bind(&follow.subject_did)
    .bind(&follow.created_at)
    .bind(&follow.indexed_at)
    .bind(&follow.sort_at)
    .execute(db)
    .await?;

    Ok(())
}

/// Fetch the edge for a URI. Delete handling reads this before the cascade
/// so it knows whose membership to recompute afterwards.
pub async fn get(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<Option<Follow>> {
    let follow = sqlx::query_as::<_, Follow>("SELECT * FROM follow WHERE uri = ?1")
        .bind(uri)
        .fetch_optional(db)
        .await?;

    Ok(follow)
}

pub async fn followees_of(db: impl SqliteExecutor<'_>, did: &str) -> LensResult<Vec<String>> {
    let dids: Vec<String> =
        sqlx::query_scalar("SELECT subject_did FROM follow WHERE creator = ?1")
            .bind(did)
            .fetch_all(db)
            .await?;

    Ok(dids)
}

pub async fn count(db: impl SqliteExecutor<'_>) -> LensResult<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM follow")
        .fetch_one(db)
        .await?;

    Ok(n)
}
