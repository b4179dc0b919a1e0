/// Commit Indexing Use Case
///
/// Applies firehose events to the index: one transaction per commit that
/// either fully lands (actor + record envelope + typed projection) or fully
/// discards. Policy rejections and malformed payloads are terminal no-ops;
/// database errors propagate so the job queue can retry.
pub mod policy;

use crate::error::{LensError, LensResult};
use crate::firehose::events::{
    AccountData, AccountStatus, CommitData, CommitOperation, EventKind, IdentityData,
    JetstreamEvent,
};
use crate::identity::IdentityResolver;
use crate::jobs::{ActorStat, PostStat, Schedulers};
use crate::lexicon::{make_uri, Collection, RecordPayload, SubscriptionRecord};
use crate::metrics;
use crate::store::{
    actor, follow,
    follow::Follow,
    generator,
    generator::Generator,
    like,
    like::Like,
    post,
    post::Post,
    profile,
    profile::Profile,
    record, repost,
    repost::Repost,
    subscription,
};
use crate::subscriptions::SubscriptionManager;
use crate::tracked::TrackedActorStore;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;

/// How many reply hops a thread-context fetch may chase
const MAX_FETCH_DEPTH: u32 = 2;

/// Where the event being indexed came from. Decides fetch-job priority and
/// bounds recursive thread-context fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    /// Arrived over the live firehose
    Live,
    /// Pulled by a fetch job chasing thread context
    Fetch { depth: u32, live: bool },
    /// Replayed during an account backfill
    Backfill,
}

impl IndexOrigin {
    fn live(self) -> bool {
        match self {
            IndexOrigin::Live => true,
            IndexOrigin::Fetch { live, .. } => live,
            IndexOrigin::Backfill => false,
        }
    }

    /// Depth for the next thread-context fetch, None once the chase is
    /// exhausted
    fn next_fetch_depth(self) -> Option<u32> {
        match self {
            IndexOrigin::Live | IndexOrigin::Backfill => Some(1),
            IndexOrigin::Fetch { depth, .. } if depth < MAX_FETCH_DEPTH => Some(depth + 1),
            IndexOrigin::Fetch { .. } => None,
        }
    }
}

pub struct CommitIndexer {
    pool: SqlitePool,
    tracked: Arc<TrackedActorStore>,
    schedulers: Arc<Schedulers>,
    subscriptions: Arc<SubscriptionManager>,
    resolver: Arc<IdentityResolver>,
}

impl CommitIndexer {
    pub fn new(
        pool: SqlitePool,
        tracked: Arc<TrackedActorStore>,
        schedulers: Arc<Schedulers>,
        subscriptions: Arc<SubscriptionManager>,
        resolver: Arc<IdentityResolver>,
    ) -> Self {
        Self {
            pool,
            tracked,
            schedulers,
            subscriptions,
            resolver,
        }
    }

    /// Route one firehose event to its handler
    pub async fn index_event(&self, event: &JetstreamEvent, origin: IndexOrigin) -> LensResult<()> {
        match event.kind {
            EventKind::Commit => match &event.commit {
                Some(commit) => self.index_commit(&event.did, commit, origin).await,
                None => {
                    tracing::warn!("Commit event without commit body from {}", event.did);
                    Ok(())
                }
            },
            EventKind::Identity => match &event.identity {
                Some(identity) => self.index_identity(&event.did, identity).await,
                None => Ok(()),
            },
            EventKind::Account => match &event.account {
                Some(account) => self.index_account(&event.did, account).await,
                None => Ok(()),
            },
        }
    }

    /// Apply one record mutation
    pub async fn index_commit(
        &self,
        did: &str,
        commit: &CommitData,
        origin: IndexOrigin,
    ) -> LensResult<()> {
        let Some(collection) = Collection::from_nsid(&commit.collection) else {
            tracing::debug!("Skipping unindexed collection {}", commit.collection);
            return Ok(());
        };

        let uri = make_uri(did, collection.nsid(), &commit.rkey);

        match commit.operation {
            CommitOperation::Create | CommitOperation::Update => {
                self.apply_record(did, &uri, collection, commit, origin).await
            }
            CommitOperation::Delete => self.delete_record(&uri, collection).await,
        }
    }

    async fn apply_record(
        &self,
        did: &str,
        uri: &str,
        collection: Collection,
        commit: &CommitData,
        origin: IndexOrigin,
    ) -> LensResult<()> {
        let Some(raw) = &commit.record else {
            tracing::warn!("Create without a record payload, skipping {}", uri);
            metrics::record_rejected(collection.nsid());
            return Ok(());
        };

        // Malformed payloads are dropped for good, never retried
        let payload = match RecordPayload::parse(collection, raw) {
            Ok(payload) => payload,
            Err(LensError::Validation(reason)) => {
                tracing::warn!("Invalid {} record at {}: {}", collection, uri, reason);
                metrics::record_rejected(collection.nsid());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !policy::should_index(&payload, did, &self.tracked) {
            tracing::debug!("Policy rejected {}", uri);
            metrics::record_rejected(collection.nsid());
            return Ok(());
        }

        // Firehose opt-ins share the invite/backfill path with admin opt-ins
        if let RecordPayload::Subscription(sub) = &payload {
            return self.apply_subscription(did, uri, commit, sub, raw).await;
        }

        let cid = commit.cid.as_deref().unwrap_or_default();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        actor::ensure(&mut *tx, did).await?;
        record::upsert(
            &mut *tx,
            uri,
            cid,
            did,
            collection.nsid(),
            commit.rev.as_deref(),
            &raw.to_string(),
        )
        .await?;
        match &payload {
            RecordPayload::Profile(r) => {
                profile::upsert(&mut *tx, &Profile::project(uri, cid, did, r, now)).await?
            }
            RecordPayload::Post(r) => {
                post::upsert(&mut *tx, &Post::project(uri, cid, did, r, now)).await?
            }
            RecordPayload::Follow(r) => {
                follow::upsert(&mut *tx, &Follow::project(uri, cid, did, r, now)).await?
            }
            RecordPayload::Like(r) => {
                like::upsert(&mut *tx, &Like::project(uri, cid, did, r, now)).await?
            }
            RecordPayload::Repost(r) => {
                repost::upsert(&mut *tx, &Repost::project(uri, cid, did, r, now)).await?
            }
            RecordPayload::Generator(r) => {
                generator::upsert(&mut *tx, &Generator::project(uri, cid, did, r, now)).await?
            }
            RecordPayload::Subscription(_) => {}
        }
        tx.commit().await?;

        metrics::record_indexed(collection.nsid());

        // Membership hooks run SQL and matter for correctness: their errors
        // propagate to the retry policy. The whole index_commit is
        // re-runnable, the upserts above absorb the replay.
        if let RecordPayload::Follow(r) = &payload {
            let newly_tracked = self.tracked.on_follow_created(did, &r.subject).await?;
            if newly_tracked {
                self.start_tracking(&r.subject).await;
            }
        }

        // Enqueues are fire-and-forget once the write has committed
        if let Err(e) = self.schedule_follow_ups(did, &payload, origin).await {
            tracing::warn!("Post-index scheduling failed for {}: {}", uri, e);
        }

        Ok(())
    }

    /// Subscription records route through the manager so invite validation,
    /// membership, and backfill behave the same as an admin subscribe.
    async fn apply_subscription(
        &self,
        did: &str,
        uri: &str,
        commit: &CommitData,
        sub: &SubscriptionRecord,
        raw: &serde_json::Value,
    ) -> LensResult<()> {
        match self
            .subscriptions
            .subscribe(did, sub.invite_code.as_deref(), Some(uri))
            .await
        {
            Ok(()) => {}
            Err(LensError::Validation(reason)) => {
                tracing::warn!("Rejected subscription from {}: {}", did, reason);
                metrics::record_rejected(Collection::Subscription.nsid());
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        // Keep the raw envelope alongside the subscription row; the manager
        // already ensured the actor
        record::upsert(
            &self.pool,
            uri,
            commit.cid.as_deref().unwrap_or_default(),
            did,
            Collection::Subscription.nsid(),
            commit.rev.as_deref(),
            &raw.to_string(),
        )
        .await?;

        metrics::record_indexed(Collection::Subscription.nsid());
        Ok(())
    }

    async fn delete_record(&self, uri: &str, collection: Collection) -> LensResult<()> {
        if collection == Collection::Subscription {
            record::delete(&self.pool, uri).await?;
            return self.subscriptions.unsubscribe_by_record(uri).await;
        }

        // Read side-effect context before the cascade erases it
        let follow_edge = match collection {
            Collection::Follow => follow::get(&self.pool, uri).await?,
            _ => None,
        };
        let liked_subject = match collection {
            Collection::Like => like::get(&self.pool, uri).await?.map(|l| l.subject_uri),
            _ => None,
        };
        let reposted_subject = match collection {
            Collection::Repost => repost::get(&self.pool, uri).await?.map(|r| r.subject_uri),
            _ => None,
        };
        let deleted_post = match collection {
            Collection::Post => post::get(&self.pool, uri).await?,
            _ => None,
        };

        let gone = record::delete(&self.pool, uri).await?;
        if gone == 0 {
            // Deleting a never-indexed URI is a valid no-op
            tracing::debug!("Delete for unknown URI {}", uri);
            return Ok(());
        }

        if let Some(edge) = &follow_edge {
            let still_tracked = self
                .tracked
                .on_follow_deleted(&edge.creator, &edge.subject_did)
                .await?;
            if !still_tracked {
                self.stop_tracking(&edge.subject_did).await;
            }
        }

        if let Err(e) = self
            .schedule_delete_follow_ups(follow_edge, liked_subject, reposted_subject, deleted_post)
            .await
        {
            tracing::warn!("Post-delete scheduling failed for {}: {}", uri, e);
        }

        Ok(())
    }

    /// Handle changes and tombstones. Only actors we already hold rows for
    /// (or that are tracked) are worth the write.
    pub async fn index_identity(&self, did: &str, identity: &IdentityData) -> LensResult<()> {
        let known =
            actor::get(&self.pool, did).await?.is_some() || self.tracked.is_tracked_actor(did);
        if !known {
            tracing::debug!("Identity event for unknown actor {}", did);
            return Ok(());
        }

        // The cached document is stale either way
        self.resolver.invalidate(did).await?;

        match &identity.handle {
            Some(handle) => {
                actor::ensure(&self.pool, did).await?;
                actor::set_handle(&self.pool, did, handle).await?;
                tracing::debug!("Updated handle for {}: {}", did, handle);
            }
            None => {
                if let Err(e) = self.schedulers.resolve_did(did).await {
                    tracing::warn!("Failed to enqueue DID resolution for {}: {}", did, e);
                }
            }
        }

        Ok(())
    }

    /// Activation and moderation status changes
    pub async fn index_account(&self, did: &str, account: &AccountData) -> LensResult<()> {
        if actor::get(&self.pool, did).await?.is_none() {
            tracing::debug!("Account event for unknown actor {}", did);
            return Ok(());
        }

        if account.active {
            actor::set_status(&self.pool, did, "active").await?;
            return Ok(());
        }

        match account.status {
            Some(AccountStatus::Deleted) => {
                tracing::info!("Purging deleted account {}", did);
                self.purge_actor(did).await?;
            }
            Some(status) => actor::set_status(&self.pool, did, status.as_str()).await?,
            None => actor::set_status(&self.pool, did, "inactive").await?,
        }

        Ok(())
    }

    /// Drop everything held for an actor: rows cascade from the actor row,
    /// the subscription row is independent and goes separately.
    async fn purge_actor(&self, did: &str) -> LensResult<()> {
        let was_subscriber = subscription::exists(&self.pool, did).await?;

        actor::delete(&self.pool, did).await?;
        self.resolver.invalidate(did).await?;

        if was_subscriber {
            subscription::delete(&self.pool, did).await?;
            self.tracked.on_subscription_deleted(did).await?;
        } else {
            self.tracked.on_actor_purged(did).await?;
        }

        self.stop_tracking(did).await;
        Ok(())
    }

    /// Backfill and tap registration for a DID that just became tracked
    async fn start_tracking(&self, did: &str) {
        if let Err(e) = self.schedulers.backfill(did).await {
            tracing::warn!("Failed to enqueue backfill for {}: {}", did, e);
        }
        if let Err(e) = self.schedulers.add_tap_repo(did).await {
            tracing::warn!("Failed to enqueue tap registration for {}: {}", did, e);
        }
    }

    async fn stop_tracking(&self, did: &str) {
        if let Err(e) = self.schedulers.remove_tap_repo(did).await {
            tracing::warn!("Failed to enqueue tap removal for {}: {}", did, e);
        }
    }

    async fn schedule_follow_ups(
        &self,
        did: &str,
        payload: &RecordPayload,
        origin: IndexOrigin,
    ) -> LensResult<()> {
        // First sighting of an actor without a handle kicks off resolution,
        // unless a recent resolution already cached the mapping
        if actor::handle_of(&self.pool, did).await?.is_none() {
            match self.resolver.cached_handle(did).await? {
                Some(handle) => actor::set_handle(&self.pool, did, &handle).await?,
                None => {
                    self.schedulers.resolve_did(did).await?;
                }
            }
        }

        match payload {
            RecordPayload::Post(r) => {
                self.schedulers
                    .aggregate_actor_stats(did, ActorStat::Posts)
                    .await?;

                if let Some(reply) = &r.reply {
                    self.schedulers
                        .aggregate_post_stats(&reply.parent.uri, PostStat::Replies)
                        .await?;

                    // Pull in missing thread context from the author's PDS,
                    // as long as the chase budget allows
                    if let Some(depth) = origin.next_fetch_depth() {
                        let mut wanted = vec![reply.parent.uri.as_str()];
                        if reply.root.uri != reply.parent.uri {
                            wanted.push(reply.root.uri.as_str());
                        }
                        for target in wanted {
                            if !record::exists(&self.pool, target).await? {
                                self.schedulers
                                    .fetch_record(target, depth, origin.live())
                                    .await?;
                            }
                        }
                    }
                }
            }
            RecordPayload::Follow(r) => {
                self.schedulers
                    .aggregate_actor_stats(did, ActorStat::Follows)
                    .await?;
                self.schedulers
                    .aggregate_actor_stats(&r.subject, ActorStat::Followers)
                    .await?;
            }
            RecordPayload::Like(r) => {
                self.schedulers
                    .aggregate_post_stats(&r.subject.uri, PostStat::Likes)
                    .await?;
            }
            RecordPayload::Repost(r) => {
                self.schedulers
                    .aggregate_post_stats(&r.subject.uri, PostStat::Reposts)
                    .await?;
            }
            _ => {}
        }

        Ok(())
    }

    async fn schedule_delete_follow_ups(
        &self,
        follow_edge: Option<Follow>,
        liked_subject: Option<String>,
        reposted_subject: Option<String>,
        deleted_post: Option<Post>,
    ) -> LensResult<()> {
        if let Some(edge) = follow_edge {
            self.schedulers
                .aggregate_actor_stats(&edge.creator, ActorStat::Follows)
                .await?;
            self.schedulers
                .aggregate_actor_stats(&edge.subject_did, ActorStat::Followers)
                .await?;
        }
        if let Some(subject) = liked_subject {
            self.schedulers
                .aggregate_post_stats(&subject, PostStat::Likes)
                .await?;
        }
        if let Some(subject) = reposted_subject {
            self.schedulers
                .aggregate_post_stats(&subject, PostStat::Reposts)
                .await?;
        }
        if let Some(deleted) = deleted_post {
            self.schedulers
                .aggregate_actor_stats(&deleted.creator, ActorStat::Posts)
                .await?;
            if let Some(parent) = &deleted.reply_parent {
                self.schedulers
                    .aggregate_post_stats(parent, PostStat::Replies)
                    .await?;
            }
        }
        Ok(())
    }
}
