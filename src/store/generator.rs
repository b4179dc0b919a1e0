/// Feed generator projection
use crate::error::LensResult;
use crate::lexicon::GeneratorRecord;
use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Generator {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub feed_did: String,
    pub display_name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub indexed_at: String,
}

impl Generator {
    pub fn project(
        uri: &str,
        cid: &str,
        creator: &str,
        record: &GeneratorRecord,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uri: uri.to_string(),
            cid: cid.to_string(),
            creator: creator.to_string(),
            feed_did: record.did.clone(),
            display_name: record.display_name.clone(),
            description: record.description.clone(),
            created_at: record.created_at.clone(),
            indexed_at: now.to_rfc3339(),
        }
    }
}

pub async fn upsert(db: impl SqliteExecutor<'_>, generator: &Generator) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO generator (uri, cid, creator, feed_did, display_name, description,
                                created_at, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(uri) DO UPDATE SET
             cid = excluded.cid,
             feed_did = excluded.feed_did,
             display_name = excluded.display_name,
             description = excluded.description,
             created_at = excluded.created_at,
             indexed_at = excluded.indexed_at",
    )
    .bind(&generator.uri)
    .bind(&generator.cid)
    .bind(&generator.creator)
    .bind(&generator.feed_did)
    .bind(&generator.display_name)
    .bind(&generator.description)
    .bind(&generator.created_at)
    .bind(&generator.indexed_at)
    .execute(db)
    .await?;

    Ok(())
}
