/// Profile projection
use crate::error::LensResult;
use crate::lexicon::ProfileRecord;
use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Profile {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub avatar_cid: Option<String>,
    pub banner_cid: Option<String>,
    pub created_at: Option<String>,
    pub indexed_at: String,
}

impl Profile {
    pub fn project(
        uri: &str,
        cid: &str,
        creator: &str,
        record: &ProfileRecord,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uri: uri.to_string(),
            cid: cid.to_string(),
            creator: creator.to_string(),
            display_name: record.display_name.clone(),
            description: record.description.clone(),
            avatar_cid: record.avatar.as_ref().and_then(|b| b.cid_string()),
            banner_cid: record.banner.as_ref().and_then(|b| b.cid_string()),
            created_at: record.created_at.clone(),
            indexed_at: now.to_rfc3339(),
        }
    }
}

pub async fn upsert(db: impl SqliteExecutor<'_>, profile: &Profile) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO profile (uri, cid, creator, display_name, description, avatar_cid,
                              banner_cid, created_at, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(uri) DO UPDATE SET
             cid = excluded.cid,
             display_name = excluded.display_name,
             description = excluded.description,
             avatar_cid = excluded.avatar_cid,
             banner_cid = excluded.banner_cid,
             created_at = excluded.created_at,
             indexed_at = excluded.indexed_at",
    )
    .bind(&profile.uri)
    .bind(&profile.cid)
    .bind(&profile.creator)
    .bind(&profile.display_name)
    .bind(&profile.description)
    .bind(&profile.avatar_cid)
    .bind(&profile.banner_cid)
    .bind(&profile.created_at)
    .bind(&profile.indexed_at)
    .execute(db)
    .await?;

    Ok(())
}

/// An actor keeps at most one profile record, so lookup goes by creator
pub async fn get_by_creator(
    db: impl SqliteExecutor<'_>,
    did: &str,
) -> LensResult<Option<Profile>> {
    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profile WHERE creator = ?1")
        .bind(did)
        .fetch_optional(db)
        .await?;

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::store::{actor, record};
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_and_lookup_by_creator() {
        let pool = test_pool().await;
        let uri = "at://did:plc:alice/app.bsky.actor.profile/self";
        actor::ensure(&pool, "did:plc:alice").await.unwrap();
        record::upsert(&pool, uri, "cid0", "did:plc:alice", "app.bsky.actor.profile", None, "{}")
            .await
            .unwrap();

        let parsed: ProfileRecord = serde_json::from_value(json!({
            "displayName": "Alice",
            "avatar": {"ref": {"$link": "bafkavatar"}, "mimeType": "image/png"}
        }))
        .unwrap();
        let profile = Profile::project(uri, "cid1", "did:plc:alice", &parsed, Utc::now());
        upsert(&pool, &profile).await.unwrap();
        upsert(&pool, &profile).await.unwrap();

        let stored = get_by_creator(&pool, "did:plc:alice").await.unwrap().unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("Alice"));
        assert_eq!(stored.avatar_cid.as_deref(), Some("bafkavatar"));
    }
}
