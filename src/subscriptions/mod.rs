/// Subscription lifecycle
///
/// One manager fronts both opt-in paths, admin API calls and firehose
/// subscription records. Subscribing validates the invite gate, writes the
/// durable row, updates the tracked set, and kicks off the resolve,
/// backfill, and tap pipeline for a brand-new subscriber.
pub mod invites;

pub use invites::{InviteCode, InviteCodeManager};

use crate::error::{LensError, LensResult};
use crate::jobs::Schedulers;
use crate::store::{actor, subscription, subscription::Subscription};
use crate::tracked::TrackedActorStore;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SubscriptionManager {
    db: SqlitePool,
    tracked: Arc<TrackedActorStore>,
    schedulers: Arc<Schedulers>,
    invites: InviteCodeManager,
    invite_required: bool,
}

impl SubscriptionManager {
    pub fn new(
        db: SqlitePool,
        tracked: Arc<TrackedActorStore>,
        schedulers: Arc<Schedulers>,
        invites: InviteCodeManager,
        invite_required: bool,
    ) -> Self {
        Self {
            db,
            tracked,
            schedulers,
            invites,
            invite_required,
        }
    }

    pub fn invites(&self) -> &InviteCodeManager {
        &self.invites
    }

    /// Opt a DID in. `record_uri` is set when the subscription came from a
    /// firehose record rather than the admin API.
    pub async fn subscribe(
        &self,
        did: &str,
        invite_code: Option<&str>,
        record_uri: Option<&str>,
    ) -> LensResult<()> {
        if !did.starts_with("did:") {
            return Err(LensError::Validation(format!("Not a DID: {}", did)));
        }

        // Re-subscribing refreshes provenance without burning another use.
        // This also keeps backfill replays of the subscription record inert.
        let already = subscription::exists(&self.db, did).await?;
        if !already && self.invite_required {
            let Some(code) = invite_code else {
                return Err(LensError::Validation(
                    "An invite code is required to subscribe".to_string(),
                ));
            };
            self.invites.use_code(code, did).await?;
        }

        actor::ensure(&self.db, did).await?;
        subscription::upsert(&self.db, did, record_uri, invite_code).await?;
        self.tracked.on_subscription_created(did).await?;

        if !already {
            self.start_pipeline(did).await;
            info!("Subscribed {}", did);
        }

        Ok(())
    }

    /// Admin-side opt-out
    pub async fn unsubscribe(&self, did: &str) -> LensResult<()> {
        let gone = subscription::delete(&self.db, did).await?;
        if gone == 0 {
            return Err(LensError::NotFound(format!("No subscription for {}", did)));
        }

        self.finish_unsubscribe(did).await
    }

    /// Firehose-side opt-out: the subscription record was deleted
    pub async fn unsubscribe_by_record(&self, uri: &str) -> LensResult<()> {
        let Some(did) = subscription::delete_by_uri(&self.db, uri).await? else {
            return Ok(());
        };

        self.finish_unsubscribe(&did).await
    }

    async fn finish_unsubscribe(&self, did: &str) -> LensResult<()> {
        self.tracked.on_subscription_deleted(did).await?;

        // The ex-subscriber may stay tracked through someone else's follow
        if !self.tracked.is_tracked_actor(did) {
            if let Err(e) = self.schedulers.remove_tap_repo(did).await {
                warn!("Failed to enqueue tap removal for {}: {}", did, e);
            }
        }

        info!("Unsubscribed {}", did);
        Ok(())
    }

    pub async fn get(&self, did: &str) -> LensResult<Option<Subscription>> {
        subscription::get(&self.db, did).await
    }

    pub async fn list(&self) -> LensResult<Vec<Subscription>> {
        subscription::list(&self.db).await
    }

    /// Resolve, backfill, and tap registration for a new subscriber.
    /// Fire-and-forget: the membership write is already durable and the
    /// periodic rebuild covers a lost enqueue.
    async fn start_pipeline(&self, did: &str) {
        if let Err(e) = self.schedulers.resolve_did(did).await {
            warn!("Failed to enqueue DID resolution for {}: {}", did, e);
        }
        if let Err(e) = self.schedulers.backfill(did).await {
            warn!("Failed to enqueue backfill for {}: {}", did, e);
        }
        if let Err(e) = self.schedulers.add_tap_repo(did).await {
            warn!("Failed to enqueue tap registration for {}: {}", did, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::queue::{queues, JobQueue};

    async fn create_manager(invite_required: bool) -> (SubscriptionManager, Arc<JobQueue>) {
        let pool = test_pool().await;
        let queue = Arc::new(JobQueue::new(pool.clone(), 5));
        let schedulers = Arc::new(Schedulers::new(queue.clone(), 0));
        let tracked = Arc::new(TrackedActorStore::new(pool.clone()));
        let invites = InviteCodeManager::new(pool.clone());
        (
            SubscriptionManager::new(pool, tracked, schedulers, invites, invite_required),
            queue,
        )
    }

    #[tokio::test]
    async fn test_subscribe_starts_the_pipeline() {
        let (manager, queue) = create_manager(false).await;

        manager.subscribe("did:plc:alice", None, None).await.unwrap();

        assert!(manager.tracked.is_tracked_actor("did:plc:alice"));
        assert!(queue
            .get(queues::RESOLVE_DID, "did:plc:alice")
            .await
            .unwrap()
            .is_some());
        assert!(queue
            .get(queues::BACKFILL, "did:plc:alice")
            .await
            .unwrap()
            .is_some());
        assert!(queue
            .get(queues::TAP, "add__did:plc:alice")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_invite_gate() {
        let (manager, _queue) = create_manager(true).await;

        let err = manager.subscribe("did:plc:alice", None, None).await.unwrap_err();
        assert!(matches!(err, LensError::Validation(_)));

        let err = manager
            .subscribe("did:plc:alice", Some("lens-bogus"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LensError::Validation(_)));

        let invite = manager.invites.create_invite("did:plc:admin", 1).await.unwrap();
        manager
            .subscribe("did:plc:alice", Some(&invite.code), None)
            .await
            .unwrap();
        assert!(manager.tracked.is_tracked_actor("did:plc:alice"));
    }

    #[tokio::test]
    async fn test_resubscribe_does_not_burn_a_second_use() {
        let (manager, _queue) = create_manager(true).await;
        let invite = manager.invites.create_invite("did:plc:admin", 1).await.unwrap();

        manager
            .subscribe("did:plc:alice", Some(&invite.code), None)
            .await
            .unwrap();
        // Same DID again, now record-backed, with no code at all
        manager
            .subscribe(
                "did:plc:alice",
                None,
                Some("at://did:plc:alice/social.aurora.lens.subscription/self"),
            )
            .await
            .unwrap();

        let stored = manager.invites.get_code(&invite.code).await.unwrap().unwrap();
        assert_eq!(stored.available_uses, 0);

        // The exhausted code still blocks a different account
        assert!(manager
            .subscribe("did:plc:bob", Some(&invite.code), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_rejects_non_did_subjects() {
        let (manager, _queue) = create_manager(false).await;
        let err = manager
            .subscribe("alice.example.com", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LensError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unsubscribe_untracks_and_removes_tap() {
        let (manager, queue) = create_manager(false).await;
        manager.subscribe("did:plc:alice", None, None).await.unwrap();

        manager.unsubscribe("did:plc:alice").await.unwrap();
        assert!(!manager.tracked.is_tracked_actor("did:plc:alice"));
        assert!(queue
            .get(queues::TAP, "remove__did:plc:alice")
            .await
            .unwrap()
            .is_some());

        assert!(matches!(
            manager.unsubscribe("did:plc:alice").await.unwrap_err(),
            LensError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_by_record_is_noop_for_unknown_uri() {
        let (manager, _queue) = create_manager(false).await;
        manager
            .unsubscribe_by_record("at://did:plc:ghost/social.aurora.lens.subscription/self")
            .await
            .unwrap();
    }
}
