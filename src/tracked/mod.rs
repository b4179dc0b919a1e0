/// Tracked-actor membership store
///
/// A materialized view of "who is worth indexing": every subscriber, plus
/// everyone a subscriber follows. The set lives in memory behind a sync
/// RwLock so admission checks never touch the database; mutation hooks
/// recompute the affected DIDs from the subscription and follow tables and
/// then swap just those entries. A full rebuild runs at startup and on a
/// periodic loop, which bounds how stale the view can get when firehose
/// events arrive out of order.
///
/// Invariant: a DID that is currently a subscriber or a followee of one must
/// never read as untracked. Hooks therefore recompute membership instead of
/// blindly removing, and the rebuild replaces the whole set at once.
use crate::error::LensResult;
use crate::store::{follow, subscription};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

pub struct TrackedActorStore {
    pool: SqlitePool,
    set: RwLock<HashSet<String>>,
}

impl TrackedActorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            set: RwLock::new(HashSet::new()),
        }
    }

    fn read_set(&self) -> RwLockReadGuard<'_, HashSet<String>> {
        match self.set.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_set(&self) -> RwLockWriteGuard<'_, HashSet<String>> {
        match self.set.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Point membership check
    pub fn is_tracked_actor(&self, did: &str) -> bool {
        self.read_set().contains(did)
    }

    /// Batch membership check: true when any DID is tracked
    pub fn has_tracked_actor(&self, dids: &[&str]) -> bool {
        let set = self.read_set();
        dids.iter().any(|did| set.contains(*did))
    }

    pub fn len(&self) -> usize {
        self.read_set().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_set().is_empty()
    }

    /// Rebuild the whole set from the durable tables. Runs at startup before
    /// ingestion (the warm-up) and periodically thereafter.
    pub async fn rebuild(&self) -> LensResult<usize> {
        let subscribers = subscription::all_dids(&self.pool).await?;

        let followees: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT f.subject_did
             FROM follow f JOIN subscription s ON f.creator = s.actor_did",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut fresh: HashSet<String> =
            HashSet::with_capacity(subscribers.len() + followees.len());
        fresh.extend(subscribers);
        fresh.extend(followees);

        let size = fresh.len();
        *self.write_set() = fresh;

        info!("Rebuilt tracked-actor set: {} actors", size);
        Ok(size)
    }

    /// Authoritative answer straight from SQL: subscriber, or followed by one
    async fn compute_is_tracked(&self, did: &str) -> LensResult<bool> {
        let tracked: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM subscription WHERE actor_did = ?1)
                 OR EXISTS(SELECT 1 FROM follow f
                           JOIN subscription s ON f.creator = s.actor_did
                           WHERE f.subject_did = ?1)",
        )
        .bind(did)
        .fetch_one(&self.pool)
        .await?;

        Ok(tracked)
    }

    async fn recompute(&self, did: &str) -> LensResult<bool> {
        let tracked = self.compute_is_tracked(did).await?;
        let mut set = self.write_set();
        if tracked {
            set.insert(did.to_string());
        } else {
            set.remove(did);
        }
        Ok(tracked)
    }

    /// Follow committed: when the follower is a subscriber the followee
    /// becomes tracked. No-op for follows by untracked bystanders.
    pub async fn on_follow_created(&self, actor_did: &str, subject_did: &str) -> LensResult<bool> {
        let follower_subscribed: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM subscription WHERE actor_did = ?1)")
                .bind(actor_did)
                .fetch_one(&self.pool)
                .await?;

        if !follower_subscribed {
            return Ok(false);
        }

        let newly_added = self.write_set().insert(subject_did.to_string());
        if newly_added {
            debug!("Tracking {} (followed by subscriber {})", subject_did, actor_did);
        }
        Ok(newly_added)
    }

    /// Follow deleted: the followee may still be tracked through another
    /// subscriber or its own subscription, so membership is recomputed, not
    /// dropped.
    pub async fn on_follow_deleted(&self, actor_did: &str, subject_did: &str) -> LensResult<bool> {
        let still_tracked = self.recompute(subject_did).await?;
        if !still_tracked {
            debug!(
                "Untracking {} (subscriber {} unfollowed, no other reason remains)",
                subject_did, actor_did
            );
        }
        Ok(still_tracked)
    }

    /// Subscription committed: the subscriber and everyone they already
    /// follow become tracked.
    pub async fn on_subscription_created(&self, did: &str) -> LensResult<usize> {
        let followees = follow::followees_of(&self.pool, did).await?;

        let mut set = self.write_set();
        set.insert(did.to_string());
        let mut added = 1;
        for followee in followees {
            if set.insert(followee) {
                added += 1;
            }
        }
        drop(set);

        debug!("Subscription for {} added {} tracked actors", did, added);
        Ok(added)
    }

    /// Subscription removed: the ex-subscriber and each of their followees
    /// keep membership only if some other reason still holds.
    pub async fn on_subscription_deleted(&self, did: &str) -> LensResult<()> {
        // Followees of the ex-subscriber with no remaining tracking reason
        let orphaned: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT subject_did FROM follow WHERE creator = ?1
             AND subject_did NOT IN (SELECT actor_did FROM subscription)
             AND subject_did NOT IN (
                 SELECT f.subject_did FROM follow f
                 JOIN subscription s ON f.creator = s.actor_did
             )",
        )
        .bind(did)
        .fetch_all(&self.pool)
        .await?;

        let self_tracked = self.compute_is_tracked(did).await?;

        let mut set = self.write_set();
        for followee in &orphaned {
            set.remove(followee);
        }
        if !self_tracked {
            set.remove(did);
        }
        drop(set);

        debug!(
            "Subscription for {} removed, {} followees untracked",
            did,
            orphaned.len()
        );
        Ok(())
    }

    /// Actor rows were purged (account deletion); reconcile the entry
    pub async fn on_actor_purged(&self, did: &str) -> LensResult<()> {
        self.recompute(did).await?;
        Ok(())
    }
}
