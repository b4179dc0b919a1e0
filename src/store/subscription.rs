/// Subscription rows - the opted-in DIDs the tracked set grows from
use crate::error::LensResult;
use chrono::Utc;
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Subscription {
    pub actor_did: String,
    pub uri: Option<String>,
    pub invite_code: Option<String>,
    pub created_at: String,
}

/// One subscription per DID; re-subscribing refreshes the provenance fields
pub async fn upsert(
    db: impl SqliteExecutor<'_>,
    actor_did: &str,
    uri: Option<&str>,
    invite_code: Option<&str>,
) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO subscription (actor_did, uri, invite_code, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(actor_did) DO UPDATE SET
             uri = excluded.uri,
             invite_code = COALESCE(excluded.invite_code, subscription.invite_code)",
    )
    .bind(actor_did)
    .bind(uri)
    .bind(invite_code)
    .bind(Utc::now().to_rfc3339())
    .execute(db)
    .await?;

    Ok(())
}

pub async fn get(db: impl SqliteExecutor<'_>, actor_did: &str) -> LensResult<Option<Subscription>> {
    let subscription =
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscription WHERE actor_did = ?1")
            .bind(actor_did)
            .fetch_optional(db)
            .await?;

    Ok(subscription)
}

pub async fn exists(db: impl SqliteExecutor<'_>, actor_did: &str) -> LensResult<bool> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscription WHERE actor_did = ?1")
        .bind(actor_did)
        .fetch_one(db)
        .await?;

    Ok(n > 0)
}

pub async fn delete(db: impl SqliteExecutor<'_>, actor_did: &str) -> LensResult<u64> {
    let result = sqlx::query("DELETE FROM subscription WHERE actor_did = ?1")
        .bind(actor_did)
        .execute(db)
        .await?;

    Ok(result.rows_affected())
}

/// Delete by record URI (firehose deletes arrive keyed that way); returns
/// the DID that was subscribed, when there was one
pub async fn delete_by_uri(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<Option<String>> {
    let did: Option<String> =
        sqlx::query_scalar("DELETE FROM subscription WHERE uri = ?1 RETURNING actor_did")
            .bind(uri)
            .fetch_optional(db)
            .await?;

    Ok(did)
}

pub async fn all_dids(db: impl SqliteExecutor<'_>) -> LensResult<Vec<String>> {
    let dids: Vec<String> = sqlx::query_scalar("SELECT actor_did FROM subscription")
        .fetch_all(db)
        .await?;

    Ok(dids)
}

pub async fn list(db: impl SqliteExecutor<'_>) -> LensResult<Vec<Subscription>> {
    let subscriptions =
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscription ORDER BY created_at")
            .fetch_all(db)
            .await?;

    Ok(subscriptions)
}

pub async fn count(db: impl SqliteExecutor<'_>) -> LensResult<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscription")
        .fetch_one(db)
        .await?;

    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_one_subscription_per_did() {
        let pool = test_pool().await;

        upsert(&pool, "did:plc:alice", None, Some("lens-abc")).await.unwrap();
        upsert(
            &pool,
            "did:plc:alice",
            Some("at://did:plc:alice/social.aurora.lens.subscription/self"),
            None,
        )
        .await
        .unwrap();

        assert_eq!(count(&pool).await.unwrap(), 1);
        let subscription = get(&pool, "did:plc:alice").await.unwrap().unwrap();
        // Provenance survives the record-backed re-subscribe
        assert_eq!(subscription.invite_code.as_deref(), Some("lens-abc"));
        assert!(subscription.uri.is_some());
    }

    #[tokio::test]
    async fn test_delete_by_uri_returns_did() {
        let pool = test_pool().await;
        let uri = "at://did:plc:bob/social.aurora.lens.subscription/self";

        upsert(&pool, "did:plc:bob", Some(uri), None).await.unwrap();
        assert_eq!(delete_by_uri(&pool, uri).await.unwrap().as_deref(), Some("did:plc:bob"));
        assert!(!exists(&pool, "did:plc:bob").await.unwrap());

        // Unknown URI is a no-op
        assert!(delete_by_uri(&pool, uri).await.unwrap().is_none());
    }
}
