/// DID Cache - Database layer for caching DID documents and handle mappings
use crate::{
    error::{LensError, LensResult},
    identity::{CachedDidDoc, CachedHandle},
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

/// DID cache manager
#[derive(Clone)]
pub struct DidCache {
    db: SqlitePool,
    /// TTL for cached documents and handle mappings
    ttl: Duration,
}

impl DidCache {
    /// Create a new DID cache
    pub fn new(db: SqlitePool, ttl_secs: u64) -> Self {
        Self {
            db,
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Get cached DID document
    pub async fn get_did_doc(&self, did: &str) -> LensResult<Option<CachedDidDoc>> {
        let result = sqlx::query("SELECT doc, updated_at FROM did_doc WHERE did = ?1")
            .bind(did)
            .fetch_optional(&self.db)
            .await?;

        if let Some(row) = result {
            let cached_doc = CachedDidDoc {
                doc: row.try_get("doc")?,
                updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
            };

            // Check if cache is still valid
            if Utc::now() - cached_doc.updated_at < self.ttl {
                return Ok(Some(cached_doc));
            } else {
                // Cache expired, delete it
                self.delete_did_doc(did).await?;
                return Ok(None);
            }
        }

        Ok(None)
    }

    /// Cache DID document
    pub async fn cache_did_doc(&self, did: &str, doc: &str) -> LensResult<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO did_doc (did, doc, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(did) DO UPDATE SET
                 doc = excluded.doc,
                 updated_at = excluded.updated_at",
        )
        .bind(did)
        .bind(doc)
        .bind(&now)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Delete DID document from cache
    pub async fn delete_did_doc(&self, did: &str) -> LensResult<()> {
        sqlx::query("DELETE FROM did_doc WHERE did = ?1")
            .bind(did)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Get cached handle for a DID
    pub async fn get_handle(&self, did: &str) -> LensResult<Option<CachedHandle>> {
        let result = sqlx::query("SELECT handle, updated_at FROM did_handle WHERE did = ?1")
            .bind(did)
            .fetch_optional(&self.db)
            .await?;

        if let Some(row) = result {
            let cached_handle = CachedHandle {
                handle: row.try_get("handle")?,
                updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
            };

            // Check if cache is still valid
            if Utc::now() - cached_handle.updated_at < self.ttl {
                return Ok(Some(cached_handle));
            } else {
                // Cache expired, delete it
                self.delete_handle(did).await?;
                return Ok(None);
            }
        }

        Ok(None)
    }

    /// Cache handle mapping for a DID
    pub async fn cache_handle(&self, did: &str, handle: &str) -> LensResult<()> {
        let normalized = handle.to_lowercase();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO did_handle (did, handle, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(did) DO UPDATE SET
                 handle = excluded.handle,
                 updated_at = excluded.updated_at",
        )
        .bind(did)
        .bind(&normalized)
        .bind(&now)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Delete handle mapping from cache
    pub async fn delete_handle(&self, did: &str) -> LensResult<()> {
        sqlx::query("DELETE FROM did_handle WHERE did = ?1")
            .bind(did)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Drop everything cached for a DID. Identity events call this so the
    /// next resolution goes back to the source.
    pub async fn invalidate(&self, did: &str) -> LensResult<()> {
        self.delete_did_doc(did).await?;
        self.delete_handle(did).await?;
        Ok(())
    }

    /// Clean up expired cache entries
    pub async fn cleanup_expired(&self) -> LensResult<()> {
        let cutoff = (Utc::now() - self.ttl).to_rfc3339();

        sqlx::query("DELETE FROM did_doc WHERE updated_at < ?1")
            .bind(&cutoff)
            .execute(&self.db)
            .await?;

        sqlx::query("DELETE FROM did_handle WHERE updated_at < ?1")
            .bind(&cutoff)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

/// Parse RFC3339 timestamp
fn parse_timestamp(s: &str) -> LensResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LensError::Internal(format!("Invalid timestamp: {}", e)))
}
