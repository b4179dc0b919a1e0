/// Repost projection
use crate::error::LensResult;
use crate::lexicon::RepostRecord;
use crate::store::compute_sort_at;
use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Repost {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub subject_uri: String,
    pub subject_cid: String,
    pub created_at: String,
    pub indexed_at: String,
    pub sort_at: String,
}

impl Repost {
    pub fn project(
        uri: &str,
        cid: &str,
        creator: &str,
        record: &RepostRecord,
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

pub async fn upsert(db: impl SqliteExecutor<'_>, repost: &Repost) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO repost (uri, cid, creator, subject_uri, subject_cid, created_at,
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
    .bind(&repost.uri)
    .bind(&repost.cid)
    .bind(&repost.creator)
    .bind(&repost.subject_uri)
    .bind(&repost.subject_cid)
    .bind(&repost.created_at)
    .bind(&repost.indexed_at)
    .bind(&repost.sort_at)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn get(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<Option<Repost>> {
    let repost = sqlx::query_as::<_, Repost>("SELECT * FROM repost WHERE uri = ?1")
        .bind(uri)
        .fetch_optional(db)
        .await?;

    Ok(repost)
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

        let uri = "at://did:plc:u/app.bsky.feed.repost/1";
        record::upsert(&pool, uri, "cid0", "did:plc:u", "app.bsky.feed.repost", None, "{}")
            .await
            .unwrap();

        let parsed: RepostRecord = serde_json::from_value(json!({
            "subject": {"uri": "at://did:plc:s/app.bsky.feed.post/9", "cid": "bafypost"},
            "createdAt": "2024-03-01T12:00:00.000Z"
        }))
        .unwrap();
        let repost = Repost::project(uri, "cid1", "did:plc:u", &parsed, Utc::now());
        upsert(&pool, &repost).await.unwrap();
        upsert(&pool, &repost).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repost")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);

        let stored = get(&pool, uri).await.unwrap().unwrap();
        assert_eq!(stored.subject_uri, "at://did:plc:s/app.bsky.feed.post/9");
    }
}
