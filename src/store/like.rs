/// Like projection. The table name is a SQLite keyword and stays quoted.
use crate::error::LensResult;
use crate::lexicon::LikeRecord;
use crate::store::compute_sort_at;
use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Like {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub subject_uri: String,
    pub subject_cid: String,
    pub created_at: String,
    pub indexed_at: String,
    pub sort_at: String,
}

impl Like {
    pub fn project(
        uri: &str,
        cid: &str,
        creator: &str,
        record: &LikeRecord,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uri: uri.to_string(),
            cid: cid.to_string(),
            creator: creator.to_string(),
            subject_uri: record.subject.uri.clone(),
            subject_cid: record.subject.cid.clone(),
            created_at: record.created_at.clone(),
            indexed_at: now.to_rfc3339(),
            sort_at: compute_sort_at(Some(&record.created_at), now),
        }
    }
}

pub async fn upsert(db: impl SqliteExecutor<'_>, like: &Like) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO \"like\" (uri, cid, creator, subject_uri, subject_cid, created_at,
                               indexed_at, sort_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(uri) DO UPDATE SET
             cid = excluded.cid,
             subject_uri = excluded.subject_uri,
             subject_cid = excluded.subject_cid,
             created_at = excluded.created_at,
             indexed_at = excluded.indexed_at,
             sort_at = excluded.sort_at",
    )
    .bind(&like.uri)
    .bind(&like.cid)
    .bind(&like.creator)
    .bind(&like.subject_uri)
    .bind(&like.subject_cid)
    .bind(&like.created_at)
    .bind(&like.indexed_at)
    .bind(&like.sort_at)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn get(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<Option<Like>> {
    let like = sqlx::query_as::<_, Like>("SELECT * FROM \"like\" WHERE uri = ?1")
        .bind(uri)
        .fetch_optional(db)
        .await?;

    Ok(like)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::store::{actor, record};
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_idempotent() {
        let pool = test_pool().await;
        actor::ensure(&pool, "did:plc:u").await.unwrap();

        let uri = "at://did:plc:u/app.bsky.feed.like/1";
        record::upsert(&pool, uri, "cid0", "did:plc:u", "app.bsky.feed.like", None, "{}")
            .await
            .unwrap();

        let parsed: LikeRecord = serde_json::from_value(json!({
            "subject": {"uri": "at://did:plc:s/app.bsky.feed.post/9", "cid": "bafypost"},
            "createdAt": "2024-03-01T12:00:00.000Z"
        }))
        .unwrap();
        let like = Like::project(uri, "cid1", "did:plc:u", &parsed, Utc::now());
        upsert(&pool, &like).await.unwrap();
        upsert(&pool, &like).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM \"like\"")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);

        let stored = get(&pool, uri).await.unwrap().unwrap();
        assert_eq!(stored.subject_uri, "at://did:plc:s/app.bsky.feed.post/9");
    }
}
