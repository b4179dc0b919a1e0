/// Denormalized engagement counts, recomputed from the source tables
///
/// Recomputes are full COUNT(*) queries rather than increments so replayed
/// events can never skew a counter. The INSERT..SELECT form only touches
/// aggregates for rows we actually hold, which keeps the FK happy when an
/// edge points at a post or actor that was never admitted.
use crate::error::LensResult;
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct PostAgg {
    pub uri: String,
    pub like_count: i64,
    pub repost_count: i64,
    pub reply_count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ActorAgg {
    pub did: String,
    pub posts_count: i64,
    pub follows_count: i64,
    pub followers_count: i64,
}

pub async fn recompute_post_likes(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO post_agg (uri, like_count)
         SELECT p.uri, (SELECT COUNT(*) FROM \"like\" l WHERE l.subject_uri = p.uri)
         FROM post p WHERE p.uri = ?1
         ON CONFLICT(uri) DO UPDATE SET like_count = excluded.like_count",
    )
    .bind(uri)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn recompute_post_reposts(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO post_agg (uri, repost_count)
         SELECT p.uri, (SELECT COUNT(*) FROM repost r WHERE r.subject_uri = p.uri)
         FROM post p WHERE p.uri = ?1
         ON CONFLICT(uri) DO UPDATE SET repost_count = excluded.repost_count",
    )
    .bind(uri)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn recompute_post_replies(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO post_agg (uri, reply_count)
         SELECT p.uri, (SELECT COUNT(*) FROM post c WHERE c.reply_parent = p.uri)
         FROM post p WHERE p.uri = ?1
         ON CONFLICT(uri) DO UPDATE SET reply_count = excluded.reply_count",
    )
    .bind(uri)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn recompute_actor_posts(db: impl SqliteExecutor<'_>, did: &str) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO actor_agg (did, posts_count)
         SELECT a.did, (SELECT COUNT(*) FROM post p WHERE p.creator = a.did)
         FROM actor a WHERE a.did = ?1
         ON CONFLICT(did) DO UPDATE SET posts_count = excluded.posts_count",
    )
    .bind(did)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn recompute_actor_follows(db: impl SqliteExecutor<'_>, did: &str) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO actor_agg (did, follows_count)
         SELECT a.did, (SELECT COUNT(*) FROM follow f WHERE f.creator = a.did)
         FROM actor a WHERE a.did = ?1
         ON CONFLICT(did) DO UPDATE SET follows_count = excluded.follows_count",
    )
    .bind(did)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn recompute_actor_followers(db: impl SqliteExecutor<'_>, did: &str) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO actor_agg (did, followers_count)
         SELECT a.did, (SELECT COUNT(*) FROM follow f WHERE f.subject_did = a.did)
         FROM actor a WHERE a.did = ?1
         ON CONFLICT(did) DO UPDATE SET followers_count = excluded.followers_count",
    )
    .bind(did)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn get_post_agg(db: impl SqliteExecutor<'_>, uri: &str) -> LensResult<Option<PostAgg>> {
    let agg = sqlx::query_as::<_, PostAgg>("SELECT * FROM post_agg WHERE uri = ?1")
        .bind(uri)
        .fetch_optional(db)
        .await?;

    Ok(agg)
}

pub async fn get_actor_agg(db: impl SqliteExecutor<'_>, did: &str) -> LensResult<Option<ActorAgg>> {
    let agg = sqlx::query_as::<_, ActorAgg>("SELECT * FROM actor_agg WHERE did = ?1")
        .bind(did)
        .fetch_optional(db)
        .await?;

    Ok(agg)
}
