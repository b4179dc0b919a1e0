/// Job handlers
///
/// One free function per queue; `dispatch` routes a claimed job to the
/// matching handler. Payload parse failures map to Validation so the runner
/// drops them instead of retrying a job that can never succeed.
use crate::context::AppContext;
use crate::error::{LensError, LensResult};
use crate::firehose::events::JetstreamEvent;
use crate::indexer::IndexOrigin;
use crate::jobs::{
    ActorStat, AggregateActorStatsJob, AggregatePostStatsJob, BackfillJob, FetchRecordJob,
    PostStat, ResolveDidJob, TapAction, TapRepoJob,
};
use crate::lexicon::{AtUri, Collection};
use crate::metrics;
use crate::queue::{queues, Job};
use crate::store::{actor, aggregates};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Records pulled per listRecords page during backfill
const BACKFILL_PAGE_SIZE: i64 = 100;

pub async fn dispatch(ctx: &AppContext, queue: &str, job: &Job) -> LensResult<()> {
    match queue {
        queues::INDEX => index_firehose_event(ctx, job).await,
        queues::RESOLVE_DID => resolve_did(ctx, job).await,
        queues::FETCH_RECORD => fetch_record(ctx, job).await,
        queues::AGGREGATE => aggregate(ctx, job).await,
        queues::BACKFILL => backfill(ctx, job).await,
        queues::TAP => tap_repo(ctx, job).await,
        other => Err(LensError::Internal(format!("Unknown queue: {}", other))),
    }
}

fn parse_payload<T: DeserializeOwned>(job: &Job) -> LensResult<T> {
    serde_json::from_str(&job.payload)
        .map_err(|e| LensError::Validation(format!("Bad {} payload: {}", job.queue, e)))
}

/// Apply one buffered firehose event
async fn index_firehose_event(ctx: &AppContext, job: &Job) -> LensResult<()> {
    let event: JetstreamEvent = parse_payload(job)?;
    ctx.indexer.index_event(&event, IndexOrigin::Live).await
}

/// Resolve a DID document and persist handle and PDS endpoint
async fn resolve_did(ctx: &AppContext, job: &Job) -> LensResult<()> {
    let payload: ResolveDidJob = parse_payload(job)?;

    let Some(resolved) = ctx.resolver.resolve(&payload.did).await? else {
        metrics::did_resolved(false);
        return Err(LensError::DidResolution(format!(
            "No document for {}",
            payload.did
        )));
    };

    actor::ensure(&ctx.db, &payload.did).await?;
    if let Some(handle) = &resolved.handle {
        actor::set_handle(&ctx.db, &payload.did, handle).await?;
    }
    if let Some(pds) = &resolved.pds_endpoint {
        actor::set_pds(&ctx.db, &payload.did, pds).await?;
    }
    metrics::did_resolved(true);

    debug!(
        "Resolved {} -> {}",
        payload.did,
        resolved.handle.as_deref().unwrap_or("(no handle)")
    );
    Ok(())
}

/// Pull one record from its author's PDS and run it through the indexer.
/// The origin carries the chase depth so reply chains terminate.
async fn fetch_record(ctx: &AppContext, job: &Job) -> LensResult<()> {
    let payload: FetchRecordJob = parse_payload(job)?;
    let uri = AtUri::parse(&payload.uri)?;

    let Some(fetched) = ctx.pds.get_record(&uri).await? else {
        // Deleted or never existed; nothing to index
        debug!("No record at {}", payload.uri);
        return Ok(());
    };
    debug!("Fetched {} (depth {})", fetched.uri, payload.depth);

    let event = JetstreamEvent::synthetic_create(
        &uri.did,
        &uri.collection,
        &uri.rkey,
        fetched.value,
        fetched.cid,
        Utc::now().timestamp_micros(),
    );
    let origin = IndexOrigin::Fetch {
        depth: payload.depth,
        live: payload.live,
    };
    ctx.indexer.index_event(&event, origin).await
}

/// The two aggregate payload shapes share one queue; their required fields
/// and disjoint stat names tell them apart.
#[derive(Deserialize)]
#[serde(untagged)]
enum AggregateJob {
    Post(AggregatePostStatsJob),
    Actor(AggregateActorStatsJob),
}

/// Recount one denormalized counter from the source rows
async fn aggregate(ctx: &AppContext, job: &Job) -> LensResult<()> {
    match parse_payload::<AggregateJob>(job)? {
        AggregateJob::Post(post) => match post.stat {
            PostStat::Likes => aggregates::recompute_post_likes(&ctx.db, &post.uri).await,
            PostStat::Reposts => aggregates::recompute_post_reposts(&ctx.db, &post.uri).await,
            PostStat::Replies => aggregates::recompute_post_replies(&ctx.db, &post.uri).await,
        },
        AggregateJob::Actor(subject) => match subject.stat {
            ActorStat::Posts => aggregates::recompute_actor_posts(&ctx.db, &subject.did).await,
            ActorStat::Follows => aggregates::recompute_actor_follows(&ctx.db, &subject.did).await,
            ActorStat::Followers => {
                aggregates::recompute_actor_followers(&ctx.db, &subject.did).await
            }
        },
    }
}

/// Page through every indexed collection in the actor's repo, replaying
/// each record through the indexer at backfill priority
async fn backfill(ctx: &AppContext, job: &Job) -> LensResult<()> {
    let payload: BackfillJob = parse_payload(job)?;
    let did = &payload.did;

    actor::ensure(&ctx.db, did).await?;
    actor::set_backfill_status(&ctx.db, did, "in_progress").await?;

    let mut indexed = 0u64;
    for collection in Collection::ALL {
        let mut cursor: Option<String> = None;
        loop {
            let page = ctx
                .pds
                .list_records(did, collection.nsid(), BACKFILL_PAGE_SIZE, cursor.as_deref())
                .await?;
            if page.records.is_empty() {
                break;
            }

            for listed in page.records {
                let uri = match AtUri::parse(&listed.uri) {
                    Ok(uri) => uri,
                    Err(e) => {
                        warn!("Skipping backfill record {}: {}", listed.uri, e);
                        continue;
                    }
                };
                let event = JetstreamEvent::synthetic_create(
                    did,
                    &uri.collection,
                    &uri.rkey,
                    listed.value,
                    Some(listed.cid),
                    Utc::now().timestamp_micros(),
                );
                ctx.indexer.index_event(&event, IndexOrigin::Backfill).await?;
                indexed += 1;
            }

            cursor = page.cursor;
            if cursor.is_none() {
                break;
            }
        }
    }

    actor::set_backfill_status(&ctx.db, did, "done").await?;
    info!("Backfilled {} records for {}", indexed, did);
    Ok(())
}

/// Keep the Tap service's repo list in sync with the tracked set
async fn tap_repo(ctx: &AppContext, job: &Job) -> LensResult<()> {
    let payload: TapRepoJob = parse_payload(job)?;

    let Some(tap) = &ctx.tap else {
        debug!(
            "Tap not configured, skipping {} for {}",
            payload.action.as_str(),
            payload.did
        );
        return Ok(());
    };

    match payload.action {
        TapAction::Add => tap.add_repo(&payload.did).await,
        TapAction::Remove => tap.remove_repo(&payload.did).await,
    }
}
