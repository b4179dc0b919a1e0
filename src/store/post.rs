/// Post projection
use crate::error::LensResult;
use crate::lexicon::PostRecord;
use crate::store::compute_sort_at;
use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Post {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub text: String,
    pub langs: Option<String>,
    pub reply_root: Option<String>,
    pub reply_root_cid: Option<String>,
    pub reply_parent: Option<String>,
    pub reply_parent_cid: Option<String>,
    pub created_at: String,
    pub indexed_at: String,
    pub sort_at: String,
}

impl Post {
    /// Project a validated post record onto its row shape
    pub fn project(
        uri: &str,
        cid: &str,
        creator: &str,
        record: &PostRecord,
        now: DateTime<Utc>,
    ) -> Self {
        let (reply_root, reply_root_cid, reply_parent, reply_parent_cid) = match &record.reply {
            Some(reply) => (
                Some(reply.root.uri.clone()),
                Some(reply.root.cid.clone()),
                Some(reply.parent.uri.clone()),
                Some(reply.parent.cid.clone()),
            ),
            None => (None, None, None, None),
        };

        Self {
            uri: uri.to_string(),
            cid: cid.to_string(),
            creator: creator.to_string(),
            text: record.text.clone(),
            langs: record
                .langs
                .as_ref()
                .and_then(|langs| serde_json::to_string(langs).ok()),
            reply_root,
            reply_root_cid,
            reply_parent,
            reply_parent_cid,
            created_at: record.created_at.clone(),
            indexed_at: now.to_rfc3339(),
            sort_at: compute_sort_at(Some(&record.created_at), now),
        }
    }
}

pub async fn upsert(db: impl SqliteExecutor<'_>, post: &Post) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO post (uri, cid, creator, text, langs, reply_root, reply_root_cid,
                           reply_parent, reply_parent_cid, created_at, indexed_at, sort_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(uri) DO UPDATE SET
             cid = excluded.cid,
             text = excluded.text,
             langs = excluded.langs,
             reply_root = excluded.reply_root,
             reply_root_cid = excluded.reply_root_cid,
             reply_parent = excluded.reply_parent,
             reply_parent_cid = excluded.reply_parent_cid,
             created_at = excluded.created_at,
             indexed_at = excluded.indexed_at,
             sort_at = excluded.sort_at",
    )
    .bind(&post.uri)
    .bind(&post.cid)
    .bind(&post.creator)
    .bind(&post.text)
    .bind(&post.langs)
    .bind(&post.reply_root)
    .bind(&post.reply_root_cid)
    .bind(&post.reply_parent)
    .bind(&post.reply_parent_cid)
    .bind(&post.created_at)
    .bind(&post.indexed_at)
    .bind(&post.sort_at)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn get(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<Option<Post>> {
    let post = sqlx::query_as::<_, Post>("SELECT * FROM post WHERE uri = ?1")
        .bind(uri)
        .fetch_optional(db)
        .await?;

    Ok(post)
}

pub async fn count(db: impl SqliteExecutor<'_>) -> LensResult<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM post")
        .fetch_one(db)
        .await?;

    Ok(n)
}
