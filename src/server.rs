/// Ops HTTP server: health, metrics, queue introspection, and the
/// token-gated admin API for subscriptions and invite codes
use crate::{
    context::AppContext,
    db,
    error::{LensError, LensResult},
    metrics,
    queue::{Job, QueueStat},
    store::{
        actor::{self, Actor},
        aggregates::{self, ActorAgg, PostAgg},
        follow,
        post::{self as posts, Post},
        profile::{self, Profile},
        record::{self, Record},
        subscription::{self, Subscription},
    },
    subscriptions::InviteCode,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, Method, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Build the ops router
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    // Cross-origin admin UI needs POST/DELETE and the Authorization header
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/queues", get(queue_stats))
        .route("/stats", get(stats))
        .route(
            "/admin/subscriptions",
            get(list_subscriptions).post(create_subscription),
        )
        .route("/admin/subscriptions/:did", delete(remove_subscription))
        .route("/admin/actors/:did", get(actor_detail))
        .route("/admin/posts", get(post_detail))
        .route("/admin/records", get(record_detail))
        .route("/admin/invites", get(list_invites).post(create_invite))
        .route("/admin/invites/:code/disable", post(disable_invite))
        .route(
            "/admin/queues/:queue/dead",
            get(list_dead_jobs).delete(purge_dead_jobs),
        )
        .route("/admin/queues/:queue/dead/retry", post(retry_dead_job))
        .with_state(ctx)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

/// Bearer-token gate for the admin endpoints.
///
/// A single static token from `LENS_ADMIN_TOKEN`; when none is configured
/// every admin request is rejected.
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<Arc<AppContext>> for AdminAuth {
    type Rejection = LensError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin.token.as_deref() else {
            return Err(LensError::Authentication(
                "Admin API is disabled".to_string(),
            ));
        };

        let token = extract_bearer_token(&parts.headers).ok_or_else(|| {
            LensError::Authentication("Missing authorization header".to_string())
        })?;

        if token != expected {
            return Err(LensError::Authentication("Invalid admin token".to_string()));
        }

        Ok(AdminAuth)
    }
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

/// Health check: version plus a live database ping
async fn health(State(ctx): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    let db_ok = db::test_connection(&ctx.db).await.is_ok();

    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "did": ctx.config.service.service_did,
        "db": db_ok,
    }))
}

/// Prometheus text exposition
async fn metrics_text() -> String {
    metrics::render_metrics()
}

/// Per-queue depth counts
async fn queue_stats(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<Vec<QueueStat>>, LensError> {
    Ok(Json(ctx.queue.list_queues().await?))
}

/// Row counts for the held tables plus the live tracked-set size
async fn stats(State(ctx): State<Arc<AppContext>>) -> Result<Json<serde_json::Value>, LensError> {
    Ok(Json(json!({
        "actors": actor::count(&ctx.db).await?,
        "records": record::count(&ctx.db).await?,
        "posts": posts::count(&ctx.db).await?,
        "follows": follow::count(&ctx.db).await?,
        "subscriptions": subscription::count(&ctx.db).await?,
        "tracked_actors": ctx.tracked.len(),
    })))
}

/// All current subscriptions
async fn list_subscriptions(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
) -> Result<Json<Vec<Subscription>>, LensError> {
    Ok(Json(ctx.subscriptions.list().await?))
}

#[derive(Debug, Deserialize)]
struct CreateSubscriptionRequest {
    did: String,
    invite_code: Option<String>,
}

/// Opt a DID in on an operator's behalf. The invite gate still applies;
/// mint a code first or run with `LENS_INVITE_REQUIRED=false`.
async fn create_subscription(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<Json<Subscription>, LensError> {
    ctx.subscriptions
        .subscribe(&req.did, req.invite_code.as_deref(), None)
        .await?;

    let row = ctx
        .subscriptions
        .get(&req.did)
        .await?
        .ok_or_else(|| LensError::Internal("Subscription missing after upsert".to_string()))?;

    Ok(Json(row))
}

async fn remove_subscription(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
    Path(did): Path<String>,
) -> Result<Json<serde_json::Value>, LensError> {
    ctx.subscriptions.unsubscribe(&did).await?;

    Ok(Json(json!({ "did": did, "subscribed": false })))
}

#[derive(Debug, Serialize)]
struct ActorDetail {
    actor: Actor,
    profile: Option<Profile>,
    stats: Option<ActorAgg>,
}

/// Everything held for one actor: the row, its profile, its counters
async fn actor_detail(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
    Path(did): Path<String>,
) -> Result<Json<ActorDetail>, LensError> {
    let actor = actor::get(&ctx.db, &did)
        .await?
        .ok_or_else(|| LensError::NotFound(format!("No actor {}", did)))?;
    let profile = profile::get_by_creator(&ctx.db, &did).await?;
    let stats = aggregates::get_actor_agg(&ctx.db, &did).await?;

    Ok(Json(ActorDetail { actor, profile, stats }))
}

#[derive(Debug, Deserialize)]
struct UriQuery {
    // AT-URIs carry slashes, so they arrive as a query parameter
    uri: String,
}

#[derive(Debug, Serialize)]
struct PostDetail {
    post: Post,
    stats: Option<PostAgg>,
}

async fn post_detail(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
    Query(query): Query<UriQuery>,
) -> Result<Json<PostDetail>, LensError> {
    let post = posts::get(&ctx.db, &query.uri)
        .await?
        .ok_or_else(|| LensError::NotFound(format!("No post {}", query.uri)))?;
    let stats = aggregates::get_post_agg(&ctx.db, &query.uri).await?;

    Ok(Json(PostDetail { post, stats }))
}

/// The stored envelope for one URI, original record JSON included
async fn record_detail(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
    Query(query): Query<UriQuery>,
) -> Result<Json<Record>, LensError> {
    let stored = record::get(&ctx.db, &query.uri)
        .await?
        .ok_or_else(|| LensError::NotFound(format!("No record {}", query.uri)))?;

    Ok(Json(stored))
}

#[derive(Debug, Deserialize)]
struct ListInvitesQuery {
    #[serde(default)]
    include_disabled: bool,
}

async fn list_invites(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
    Query(query): Query<ListInvitesQuery>,
) -> Result<Json<Vec<InviteCode>>, LensError> {
    Ok(Json(
        ctx.subscriptions
            .invites()
            .list_codes(query.include_disabled)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct CreateInviteRequest {
    uses: Option<i64>,
}

/// Mint an invite code, attributed to the service DID
async fn create_invite(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
    Json(req): Json<CreateInviteRequest>,
) -> Result<Json<InviteCode>, LensError> {
    let uses = req.uses.unwrap_or(1);
    if uses < 1 {
        return Err(LensError::Validation(
            "Invite uses must be at least 1".to_string(),
        ));
    }

    let code = ctx
        .subscriptions
        .invites()
        .create_invite(&ctx.config.service.service_did, uses)
        .await?;

    Ok(Json(code))
}

async fn disable_invite(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
    Path(code): Path<String>,
) -> Result<Json<InviteCode>, LensError> {
    let invites = ctx.subscriptions.invites();
    invites.disable_code(&code).await?;

    let disabled = invites
        .get_code(&code)
        .await?
        .ok_or_else(|| LensError::NotFound(format!("Unknown invite code: {}", code)))?;

    Ok(Json(disabled))
}

#[derive(Debug, Deserialize)]
struct DeadJobsQuery {
    limit: Option<i64>,
}

/// Dead-lettered jobs for one queue, newest failure first
async fn list_dead_jobs(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
    Path(queue): Path<String>,
    Query(query): Query<DeadJobsQuery>,
) -> Result<Json<Vec<Job>>, LensError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(ctx.queue.dead_jobs(&queue, limit).await?))
}

#[derive(Debug, Deserialize)]
struct RetryDeadRequest {
    // Job ids can be AT-URIs, so the id travels in the body, not the path
    id: String,
}

/// Revive one dead job and return the refreshed row
async fn retry_dead_job(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
    Path(queue): Path<String>,
    Json(req): Json<RetryDeadRequest>,
) -> Result<Json<Job>, LensError> {
    ctx.queue.retry_dead(&queue, &req.id).await?;

    let job = ctx
        .queue
        .get(&queue, &req.id)
        .await?
        .ok_or_else(|| LensError::NotFound(format!("No job {}/{}", queue, req.id)))?;

    Ok(Json(job))
}

async fn purge_dead_jobs(
    State(ctx): State<Arc<AppContext>>,
    _auth: AdminAuth,
    Path(queue): Path<String>,
) -> Result<Json<serde_json::Value>, LensError> {
    let purged = ctx.queue.purge_dead(&queue).await?;

    Ok(Json(json!({ "queue": queue, "purged": purged })))
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Start the ops server
pub async fn serve(ctx: Arc<AppContext>) -> LensResult<()> {
    let addr = format!("{}:{}", ctx.config.service.hostname, ctx.config.service.port);

    info!("Ops server listening on {}", addr);

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| LensError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| LensError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
