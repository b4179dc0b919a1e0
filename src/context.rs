/// Application context and dependency injection
use crate::{
    config::LensConfig,
    error::LensResult,
    identity::{DidCache, IdentityResolver},
    indexer::CommitIndexer,
    jobs::Schedulers,
    pds::{PdsClient, TapClient},
    queue::JobQueue,
    subscriptions::{InviteCodeManager, SubscriptionManager},
    tracked::TrackedActorStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
pub struct AppContext {
    pub config: LensConfig,
    pub db: SqlitePool,
    pub queue: Arc<JobQueue>,
    pub schedulers: Arc<Schedulers>,
    pub tracked: Arc<TrackedActorStore>,
    pub resolver: Arc<IdentityResolver>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub indexer: Arc<CommitIndexer>,
    pub pds: Arc<PdsClient>,
    pub tap: Option<TapClient>,
}

impl AppContext {
    /// Wire every service up from configuration. The pool must already be
    /// migrated.
    pub fn new(config: LensConfig, db: SqlitePool) -> LensResult<Arc<Self>> {
        let queue = Arc::new(JobQueue::new(db.clone(), config.queue.job_max_attempts));
        let schedulers = Arc::new(Schedulers::new(
            Arc::clone(&queue),
            config.queue.aggregate_debounce_secs,
        ));
        let tracked = Arc::new(TrackedActorStore::new(db.clone()));

        let did_cache = DidCache::new(db.clone(), config.identity.did_cache_ttl_secs);
        let resolver = Arc::new(IdentityResolver::new(
            did_cache,
            config.identity.did_plc_url.clone(),
        )?);

        let invites = InviteCodeManager::new(db.clone());
        let subscriptions = Arc::new(SubscriptionManager::new(
            db.clone(),
            Arc::clone(&tracked),
            Arc::clone(&schedulers),
            invites,
            config.invites.required,
        ));

        let indexer = Arc::new(CommitIndexer::new(
            db.clone(),
            Arc::clone(&tracked),
            Arc::clone(&schedulers),
            Arc::clone(&subscriptions),
            Arc::clone(&resolver),
        ));

        let pds = Arc::new(PdsClient::new(Arc::clone(&resolver))?);

        let tap = match &config.ingest.tap_url {
            Some(url) => Some(TapClient::new(url)?),
            None => None,
        };

        Ok(Arc::new(Self {
            config,
            db,
            queue,
            schedulers,
            tracked,
            resolver,
            subscriptions,
            indexer,
            pds,
            tap,
        }))
    }
}

/// Fresh context over an in-memory database, for unit tests
#[cfg(test)]
pub async fn test_context() -> Arc<AppContext> {
    let pool = crate::db::test_pool().await;
    AppContext::new(LensConfig::for_tests(), pool).unwrap()
}
