/// Job scheduling and execution
///
/// `Schedulers` wraps the durable queue with typed enqueues and the
/// deterministic-id conventions that make retries and bursts collapse.
/// `JobRunner` drives per-queue worker pools plus the maintenance loops
/// (stalled-job reaper, queue metrics, tracked-set rebuild, cache cleanup).
use crate::error::{LensError, LensResult};
use crate::firehose::events::JetstreamEvent;
use crate::metrics;
use crate::queue::{queues, Job, JobOptions, JobQueue};
use futures::future::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

pub mod tasks;

/// Poll pause when a queue has nothing due
const IDLE_POLL_MS: u64 = 200;

/// Post counter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStat {
    Likes,
    Reposts,
    Replies,
}

impl PostStat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStat::Likes => "likes",
            PostStat::Reposts => "reposts",
            PostStat::Replies => "replies",
        }
    }
}

/// Actor counter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorStat {
    Posts,
    Follows,
    Followers,
}

impl ActorStat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorStat::Posts => "posts",
            ActorStat::Follows => "follows",
            ActorStat::Followers => "followers",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TapAction {
    Add,
    Remove,
}

impl TapAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TapAction::Add => "add",
            TapAction::Remove => "remove",
        }
    }
}

/// Job payloads (serde JSON between scheduler and worker)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveDidJob {
    pub did: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRecordJob {
    pub uri: String,
    pub depth: u32,
    pub live: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatePostStatsJob {
    pub uri: String,
    #[serde(rename = "type")]
    pub stat: PostStat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateActorStatsJob {
    pub did: String,
    #[serde(rename = "type")]
    pub stat: ActorStat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJob {
    pub did: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapRepoJob {
    pub did: String,
    pub action: TapAction,
}

/// Typed enqueue wrappers with deterministic ids
pub struct Schedulers {
    queue: Arc<JobQueue>,
    debounce_secs: u64,
}

impl Schedulers {
    pub fn new(queue: Arc<JobQueue>, debounce_secs: u64) -> Self {
        Self {
            queue,
            debounce_secs,
        }
    }

    /// Enqueue one firehose event for indexing. The id makes redelivered
    /// frames collapse into a single job.
    pub async fn index_event(&self, event: &JetstreamEvent) -> LensResult<bool> {
        let id = format!("{}:{}", event.time_us, event.did);
        self.queue
            .enqueue(queues::INDEX, &id, event, JobOptions::default())
            .await
    }

    pub async fn resolve_did(&self, did: &str) -> LensResult<bool> {
        self.queue
            .enqueue(
                queues::RESOLVE_DID,
                did,
                &ResolveDidJob {
                    did: did.to_string(),
                },
                JobOptions::default(),
            )
            .await
    }

    /// Live fetches outrank backfill fetches so fresh traffic is never
    /// starved by a big catch-up.
    pub async fn fetch_record(&self, uri: &str, depth: u32, live: bool) -> LensResult<bool> {
        let priority = if live { 0 } else { 10 };
        self.queue
            .enqueue(
                queues::FETCH_RECORD,
                uri,
                &FetchRecordJob {
                    uri: uri.to_string(),
                    depth,
                    live,
                },
                JobOptions {
                    priority,
                    ..Default::default()
                },
            )
            .await
    }

    /// Debounced: a burst of likes on one post becomes one recount.
    pub async fn aggregate_post_stats(&self, uri: &str, stat: PostStat) -> LensResult<bool> {
        let id = format!("{}__{}", stat.as_str(), uri);
        self.queue
            .enqueue(
                queues::AGGREGATE,
                &id,
                &AggregatePostStatsJob {
                    uri: uri.to_string(),
                    stat,
                },
                JobOptions {
                    delay_secs: self.debounce_secs,
                    ..Default::default()
                },
            )
            .await
    }

    pub async fn aggregate_actor_stats(&self, did: &str, stat: ActorStat) -> LensResult<bool> {
        let id = format!("{}__{}", stat.as_str(), did);
        self.queue
            .enqueue(
                queues::AGGREGATE,
                &id,
                &AggregateActorStatsJob {
                    did: did.to_string(),
                    stat,
                },
                JobOptions {
                    delay_secs: self.debounce_secs,
                    ..Default::default()
                },
            )
            .await
    }

    pub async fn backfill(&self, did: &str) -> LensResult<bool> {
        self.queue
            .enqueue(
                queues::BACKFILL,
                did,
                &BackfillJob {
                    did: did.to_string(),
                },
                JobOptions::default(),
            )
            .await
    }

    pub async fn add_tap_repo(&self, did: &str) -> LensResult<bool> {
        self.tap_repo(did, TapAction::Add).await
    }

    pub async fn remove_tap_repo(&self, did: &str) -> LensResult<bool> {
        self.tap_repo(did, TapAction::Remove).await
    }

    async fn tap_repo(&self, did: &str, action: TapAction) -> LensResult<bool> {
        let id = format!("{}__{}", action.as_str(), did);
        self.queue
            .enqueue(
                queues::TAP,
                &id,
                &TapRepoJob {
                    did: did.to_string(),
                    action,
                },
                JobOptions::default(),
            )
            .await
    }
}

/// Drives the worker pools and maintenance loops
pub struct JobRunner {
    context: Arc<crate::context::AppContext>,
}

impl JobRunner {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start every worker pool and background loop
    pub fn start(self: Arc<Self>) {
        info!("Starting job runner");

        for queue in queues::ALL {
            tokio::spawn(Self::queue_loop(Arc::clone(&self), queue));
        }

        tokio::spawn(Self::stalled_job_reaper(Arc::clone(&self)));
        tokio::spawn(Self::queue_metrics_job(Arc::clone(&self)));
        tokio::spawn(Self::tracked_rebuild_job(Arc::clone(&self)));
        tokio::spawn(Self::did_cache_cleanup_job(Arc::clone(&self)));

        info!("Job runner started");
    }

    fn concurrency_for(&self, queue: &str) -> usize {
        let workers = &self.context.config.queue;
        let n = match queue {
            queues::INDEX => workers.index_workers,
            queues::RESOLVE_DID => workers.resolve_workers,
            queues::FETCH_RECORD => workers.fetch_workers,
            queues::AGGREGATE => workers.aggregate_workers,
            queues::BACKFILL => workers.backfill_workers,
            queues::TAP => workers.tap_workers,
            _ => 1,
        };
        n.max(1)
    }

    /// One dispatcher per queue: claim until the pool is full, then wait for
    /// a slot. Claimed jobs run as their own tasks so a slow one never
    /// blocks its siblings.
    async fn queue_loop(runner: Arc<Self>, queue: &'static str) {
        let concurrency = runner.concurrency_for(queue);
        info!("Worker pool for {} queue started ({} slots)", queue, concurrency);

        let mut in_flight: FuturesUnordered<JoinHandle<()>> = FuturesUnordered::new();

        loop {
            // Reap finished tasks without blocking
            while let Some(result) = in_flight.next().now_or_never().flatten() {
                if let Err(e) = result {
                    error!("Job task panicked on {} queue: {}", queue, e);
                }
            }

            // Refill to capacity
            while in_flight.len() < concurrency {
                match runner.context.queue.claim(queue).await {
                    Ok(Some(job)) => {
                        let runner = Arc::clone(&runner);
                        in_flight.push(tokio::spawn(async move {
                            runner.run_job(queue, job).await;
                        }));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to claim from {} queue: {}", queue, e);
                        break;
                    }
                }
            }

            if in_flight.is_empty() {
                tokio::time::sleep(Duration::from_millis(IDLE_POLL_MS)).await;
            } else if in_flight.len() >= concurrency {
                // At capacity: wait for one to finish
                if let Some(Err(e)) = in_flight.next().await {
                    error!("Job task panicked on {} queue: {}", queue, e);
                }
            } else {
                // Below capacity with nothing due: wait for a finish or a tick
                tokio::select! {
                    Some(result) = in_flight.next() => {
                        if let Err(e) = result {
                            error!("Job task panicked on {} queue: {}", queue, e);
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(IDLE_POLL_MS)) => {}
                }
            }
        }
    }

    async fn run_job(&self, queue: &'static str, job: Job) {
        let budget = Duration::from_secs(self.context.config.queue.job_timeout_secs);
        let outcome = tokio::time::timeout(budget, tasks::dispatch(&self.context, queue, &job))
            .await
            .unwrap_or_else(|_| {
                Err(LensError::Timeout(format!(
                    "exceeded the {}s job budget",
                    budget.as_secs()
                )))
            });

        match outcome {
            Ok(()) => {
                metrics::job_processed(queue);
                if let Err(e) = self.context.queue.complete(queue, &job.id).await {
                    error!("Failed to complete job {}/{}: {}", queue, job.id, e);
                }
            }
            Err(LensError::Validation(reason)) => {
                // Permanent: retrying a malformed payload can never help
                metrics::job_failed(queue);
                warn!("Dropping invalid job {}/{}: {}", queue, job.id, reason);
                if let Err(e) = self.context.queue.complete(queue, &job.id).await {
                    error!("Failed to drop job {}/{}: {}", queue, job.id, e);
                }
            }
            Err(e) => {
                metrics::job_failed(queue);
                warn!(
                    "Job {}/{} failed (attempt {}): {}",
                    queue, job.id, job.attempts, e
                );
                if let Err(e2) = self.context.queue.fail(queue, &job.id, &e.to_string()).await {
                    error!("Failed to record job failure {}/{}: {}", queue, job.id, e2);
                }
            }
        }
    }

    /// Return crashed workers' jobs to pending (runs every minute)
    async fn stalled_job_reaper(runner: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let cutoff = runner.context.config.queue.stalled_after_secs;
            match runner.context.queue.requeue_stalled(cutoff).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Requeued {} stalled jobs", count);
                    }
                }
                Err(e) => error!("Failed to requeue stalled jobs: {}", e),
            }
        }
    }

    /// Export queue depths and tracked-set size (runs every 15 seconds)
    async fn queue_metrics_job(runner: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(15));

        loop {
            interval.tick().await;

            match runner.context.queue.list_queues().await {
                Ok(stats) => {
                    for stat in stats {
                        metrics::set_queue_depth(&stat.queue, stat.pending);
                    }
                }
                Err(e) => error!("Failed to read queue stats: {}", e),
            }

            metrics::set_tracked_actors(runner.context.tracked.len() as i64);
        }
    }

    /// Periodic full rebuild bounds the staleness of the tracked set
    async fn tracked_rebuild_job(runner: Arc<Self>) {
        let secs = runner.context.config.tracked.rebuild_interval_secs.max(1);
        let mut interval = interval(Duration::from_secs(secs));
        // The warm-up rebuild already ran at startup
        interval.tick().await;

        loop {
            interval.tick().await;

            match runner.context.tracked.rebuild().await {
                Ok(count) => metrics::set_tracked_actors(count as i64),
                Err(e) => error!("Tracked-set rebuild failed: {}", e),
            }
        }
    }

    /// Cleanup expired identity cache entries (runs every 30 minutes)
    async fn did_cache_cleanup_job(runner: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(1800));

        loop {
            interval.tick().await;

            if let Err(e) = runner.context.resolver.cleanup_cache().await {
                error!("Failed to cleanup identity cache: {}", e);
            }
        }
    }
}
