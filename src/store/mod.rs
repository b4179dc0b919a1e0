/// Collection repositories
///
/// One module per stored shape. Every write is an idempotent upsert keyed by
/// URI (or DID for actors), and every function takes any `SqliteExecutor` so
/// callers can pass either the pool or an open transaction.
pub mod actor;
pub mod aggregates;
pub mod follow;
pub mod generator;
pub mod like;
pub mod post;
pub mod profile;
pub mod record;
pub mod repost;
pub mod subscription;

use chrono::{DateTime, Utc};

/// Feed-ordering timestamp: the record's self-reported creation time, unless
/// that is missing, unparseable or in the future, in which case the server
/// observation time wins.
pub fn compute_sort_at(created_at: Option<&str>, indexed_at: DateTime<Utc>) -> String {
    if let Some(created_at) = created_at {
        if let Ok(created) = DateTime::parse_from_rfc3339(created_at) {
            let created = created.with_timezone(&Utc);
            if created < indexed_at {
                return created.to_rfc3339();
            }
        }
    }
    indexed_at.to_rfc3339()
}
