/// Durable named job queues over SQLite
///
/// Jobs are keyed by (queue, id): enqueueing with an id that is already
/// pending or running is a dedup no-op, which is how bursts of identical
/// triggers collapse into one job. Completed jobs are deleted, failed jobs
/// back off exponentially until max_attempts and then park as dead letters.
use crate::error::{LensError, LensResult};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;

/// Queue names
pub mod queues {
    pub const INDEX: &str = "index";
    pub const RESOLVE_DID: &str = "resolve_did";
    pub const FETCH_RECORD: &str = "fetch_record";
    pub const AGGREGATE: &str = "aggregate";
    pub const BACKFILL: &str = "backfill";
    pub const TAP: &str = "tap";

    pub const ALL: [&str; 6] = [INDEX, RESOLVE_DID, FETCH_RECORD, AGGREGATE, BACKFILL, TAP];
}

/// Per-job enqueue options
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Seconds before the job becomes due (debouncing)
    pub delay_secs: u64,
    /// Lower runs first
    pub priority: i64,
}

/// A job row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Job {
    pub queue: String,
    pub id: String,
    pub payload: String,
    pub status: String,
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    pub run_at: i64,
    pub claimed_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Introspection row for one queue
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueStat {
    pub queue: String,
    pub pending: i64,
    pub running: i64,
    pub dead: i64,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    max_attempts: i64,
}

fn backoff_secs(attempt: i64) -> i64 {
    let exp = (attempt - 1).clamp(0, 8) as u32;
    (10_i64 << exp).min(3600)
}

impl JobQueue {
    pub fn new(pool: SqlitePool, max_attempts: i64) -> Self {
        Self { pool, max_attempts }
    }

    /// Enqueue a job. Returns false when an identical pending/running job
    /// already holds the id. A dead job under the same id is revived instead
    /// of blocking the queue forever.
    pub async fn enqueue<P: Serialize>(
        &self,
        queue: &str,
        id: &str,
        payload: &P,
        options: JobOptions,
    ) -> LensResult<bool> {
        let now = Utc::now().timestamp();
        let payload = serde_json::to_string(payload)?;

        let result = sqlx::query(
            "INSERT INTO job (queue, id, payload, status, priority, attempts, max_attempts,
                              run_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, 0, ?5, ?6, ?7, ?7)
             ON CONFLICT(queue, id) DO UPDATE SET
                 payload = excluded.payload,
                 status = 'pending',
                 priority = excluded.priority,
                 attempts = 0,
                 run_at = excluded.run_at,
                 last_error = NULL,
                 claimed_at = NULL,
                 updated_at = excluded.updated_at
             WHERE job.status = 'dead'",
        )
        .bind(queue)
        .bind(id)
        .bind(&payload)
        .bind(options.priority)
        .bind(self.max_attempts)
        .bind(now + options.delay_secs as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Atomically claim the next due job: lowest priority number first, then
    /// earliest run_at. Claiming counts as an attempt.
    pub async fn claim(&self, queue: &str) -> LensResult<Option<Job>> {
        let now = Utc::now().timestamp();

        let job = sqlx::query_as::<_, Job>(
            "UPDATE job SET status = 'running', attempts = attempts + 1,
                            claimed_at = ?2, updated_at = ?2
             WHERE queue = ?1 AND id = (
                 SELECT id FROM job
                 WHERE queue = ?1 AND status = 'pending' AND run_at <= ?2
                 ORDER BY priority ASC, run_at ASC, created_at ASC
                 LIMIT 1
             )
             RETURNING *",
        )
        .bind(queue)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    pub async fn complete(&self, queue: &str, id: &str) -> LensResult<()> {
        sqlx::query("DELETE FROM job WHERE queue = ?1 AND id = ?2")
            .bind(queue)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record a failure: reschedule with exponential backoff, or park as a
    /// dead letter once attempts are exhausted.
    pub async fn fail(&self, queue: &str, id: &str, error: &str) -> LensResult<()> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT attempts, max_attempts FROM job WHERE queue = ?1 AND id = ?2")
                .bind(queue)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((attempts, max_attempts)) = row else {
            return Ok(());
        };

        let now = Utc::now().timestamp();
        if attempts >= max_attempts {
            sqlx::query(
                "UPDATE job SET status = 'dead', last_error = ?3, claimed_at = NULL,
                                updated_at = ?4
                 WHERE queue = ?1 AND id = ?2",
            )
            .bind(queue)
            .bind(id)
            .bind(error)
            .bind(now)
            .execute(&self.pool)
            .await?;

            tracing::warn!(
                "Job {}/{} dead after {} attempts: {}",
                queue,
                id,
                attempts,
                error
            );
        } else {
            let delay = backoff_secs(attempts);
            sqlx::query(
                "UPDATE job SET status = 'pending', run_at = ?3, last_error = ?4,
                                claimed_at = NULL, updated_at = ?5
                 WHERE queue = ?1 AND id = ?2",
            )
            .bind(queue)
            .bind(id)
            .bind(now + delay)
            .bind(error)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Return running jobs whose claim is older than the cutoff to pending.
    /// Crash recovery: a worker that died mid-job left it 'running'.
    pub async fn requeue_stalled(&self, stalled_after_secs: u64) -> LensResult<u64> {
        let cutoff = Utc::now().timestamp() - stalled_after_secs as i64;

        let result = sqlx::query(
            "UPDATE job SET status = 'pending', claimed_at = NULL, updated_at = ?2
             WHERE status = 'running' AND claimed_at IS NOT NULL AND claimed_at <= ?1",
        )
        .bind(cutoff)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Per-queue pending/running/dead counts
    pub async fn list_queues(&self) -> LensResult<Vec<QueueStat>> {
        let stats = sqlx::query_as::<_, QueueStat>(
            "SELECT queue,
                    SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending,
                    SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END) AS running,
                    SUM(CASE WHEN status = 'dead' THEN 1 ELSE 0 END) AS dead
             FROM job GROUP BY queue ORDER BY queue",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(stats)
    }

    pub async fn dead_jobs(&self, queue: &str, limit: i64) -> LensResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM job WHERE queue = ?1 AND status = 'dead'
             ORDER BY updated_at DESC LIMIT ?2",
        )
        .bind(queue)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Put a dead job back in rotation with a fresh attempt budget
    pub async fn retry_dead(&self, queue: &str, id: &str) -> LensResult<()> {
        let result = sqlx::query(
            "UPDATE job SET status = 'pending', attempts = 0, run_at = ?3,
                            last_error = NULL, updated_at = ?3
             WHERE queue = ?1 AND id = ?2 AND status = 'dead'",
        )
        .bind(queue)
        .bind(id)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LensError::NotFound(format!("No dead job {}/{}", queue, id)));
        }

        Ok(())
    }

    pub async fn purge_dead(&self, queue: &str) -> LensResult<u64> {
        let result = sqlx::query("DELETE FROM job WHERE queue = ?1 AND status = 'dead'")
            .bind(queue)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn get(&self, queue: &str, id: &str) -> LensResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM job WHERE queue = ?1 AND id = ?2")
            .bind(queue)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }
}

#[cfg(test)]
impl JobQueue {
    /// Pending-job depth for one queue, for test assertions
    pub async fn depth(&self, queue: &str) -> LensResult<i64> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM job WHERE queue = ?1 AND status = 'pending'")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use serde_json::json;

    async fn test_queue() -> JobQueue {
        JobQueue::new(test_pool().await, 3)
    }

    async fn age_job(queue: &JobQueue, name: &str, id: &str, secs: i64) {
        sqlx::query("UPDATE job SET run_at = run_at - ?3 WHERE queue = ?1 AND id = ?2")
            .bind(name)
            .bind(id)
            .bind(secs)
            .execute(&queue.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_same_id_dedups() {
        let queue = test_queue().await;

        assert!(queue
            .enqueue(queues::RESOLVE_DID, "did:plc:a", &json!({"did": "did:plc:a"}), JobOptions::default())
            .await
            .unwrap());
        assert!(!queue
            .enqueue(queues::RESOLVE_DID, "did:plc:a", &json!({"did": "did:plc:a"}), JobOptions::default())
            .await
            .unwrap());

        assert_eq!(queue.depth(queues::RESOLVE_DID).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delayed_job_not_due_until_delay_passes() {
        let queue = test_queue().await;

        queue
            .enqueue(
                queues::AGGREGATE,
                "like__at://x",
                &json!({}),
                JobOptions { delay_secs: 30, priority: 0 },
            )
            .await
            .unwrap();

        assert!(queue.claim(queues::AGGREGATE).await.unwrap().is_none());

        age_job(&queue, queues::AGGREGATE, "like__at://x", 60).await;
        assert!(queue.claim(queues::AGGREGATE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_claim_prefers_lower_priority_number() {
        let queue = test_queue().await;

        queue
            .enqueue(queues::FETCH_RECORD, "backfill-job", &json!({}), JobOptions { delay_secs: 0, priority: 10 })
            .await
            .unwrap();
        queue
            .enqueue(queues::FETCH_RECORD, "live-job", &json!({}), JobOptions::default())
            .await
            .unwrap();

        let first = queue.claim(queues::FETCH_RECORD).await.unwrap().unwrap();
        assert_eq!(first.id, "live-job");
        let second = queue.claim(queues::FETCH_RECORD).await.unwrap().unwrap();
        assert_eq!(second.id, "backfill-job");
    }

    #[tokio::test]
    async fn test_complete_frees_the_id() {
        let queue = test_queue().await;

        queue
            .enqueue(queues::TAP, "add__did:plc:a", &json!({}), JobOptions::default())
            .await
            .unwrap();
        let job = queue.claim(queues::TAP).await.unwrap().unwrap();
        queue.complete(&job.queue, &job.id).await.unwrap();

        assert!(queue
            .enqueue(queues::TAP, "add__did:plc:a", &json!({}), JobOptions::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_fail_backs_off_then_dead_letters() {
        let queue = test_queue().await;
        queue
            .enqueue(queues::BACKFILL, "did:plc:a", &json!({}), JobOptions::default())
            .await
            .unwrap();

        for round in 1..=3 {
            age_job(&queue, queues::BACKFILL, "did:plc:a", 100_000).await;
            let job = queue.claim(queues::BACKFILL).await.unwrap().unwrap();
            assert_eq!(job.attempts, round);
            queue.fail(&job.queue, &job.id, "pds unreachable").await.unwrap();
        }

        let job = queue.get(queues::BACKFILL, "did:plc:a").await.unwrap().unwrap();
        assert_eq!(job.status, "dead");
        assert_eq!(job.last_error.as_deref(), Some("pds unreachable"));
        assert!(queue.claim(queues::BACKFILL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_revives_dead_job() {
        let queue = test_queue().await;
        queue
            .enqueue(queues::RESOLVE_DID, "did:plc:a", &json!({}), JobOptions::default())
            .await
            .unwrap();

        for _ in 0..3 {
            age_job(&queue, queues::RESOLVE_DID, "did:plc:a", 100_000).await;
            let job = queue.claim(queues::RESOLVE_DID).await.unwrap().unwrap();
            queue.fail(&job.queue, &job.id, "boom").await.unwrap();
        }
        assert_eq!(
            queue.get(queues::RESOLVE_DID, "did:plc:a").await.unwrap().unwrap().status,
            "dead"
        );

        assert!(queue
            .enqueue(queues::RESOLVE_DID, "did:plc:a", &json!({}), JobOptions::default())
            .await
            .unwrap());
        let revived = queue.get(queues::RESOLVE_DID, "did:plc:a").await.unwrap().unwrap();
        assert_eq!(revived.status, "pending");
        assert_eq!(revived.attempts, 0);
    }

    #[tokio::test]
    async fn test_requeue_stalled() {
        let queue = test_queue().await;
        queue
            .enqueue(queues::INDEX, "1:did:plc:a", &json!({}), JobOptions::default())
            .await
            .unwrap();
        queue.claim(queues::INDEX).await.unwrap().unwrap();

        // Fresh claim is not stalled
        assert_eq!(queue.requeue_stalled(300).await.unwrap(), 0);

        sqlx::query("UPDATE job SET claimed_at = claimed_at - 1000")
            .execute(&queue.pool)
            .await
            .unwrap();
        assert_eq!(queue.requeue_stalled(300).await.unwrap(), 1);
        assert!(queue.claim(queues::INDEX).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_queues_and_retry_dead() {
        let queue = test_queue().await;
        queue
            .enqueue(queues::BACKFILL, "did:plc:a", &json!({}), JobOptions::default())
            .await
            .unwrap();
        for _ in 0..3 {
            age_job(&queue, queues::BACKFILL, "did:plc:a", 100_000).await;
            let job = queue.claim(queues::BACKFILL).await.unwrap().unwrap();
            queue.fail(&job.queue, &job.id, "boom").await.unwrap();
        }
        queue
            .enqueue(queues::INDEX, "2:did:plc:b", &json!({}), JobOptions::default())
            .await
            .unwrap();

        let stats = queue.list_queues().await.unwrap();
        let backfill = stats.iter().find(|s| s.queue == queues::BACKFILL).unwrap();
        assert_eq!((backfill.pending, backfill.dead), (0, 1));
        let index = stats.iter().find(|s| s.queue == queues::INDEX).unwrap();
        assert_eq!(index.pending, 1);

        queue.retry_dead(queues::BACKFILL, "did:plc:a").await.unwrap();
        assert_eq!(queue.depth(queues::BACKFILL).await.unwrap(), 1);

        // The admin retry endpoint reads the refreshed job back after reviving it
        let retried = queue.get(queues::BACKFILL, "did:plc:a").await.unwrap().unwrap();
        assert_eq!(retried.status, "pending");
        assert_eq!(retried.attempts, 0);

        assert!(queue.retry_dead(queues::BACKFILL, "nope").await.is_err());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff_secs(1), 10);
        assert_eq!(backoff_secs(2), 20);
        assert_eq!(backoff_secs(5), 160);
        assert_eq!(backoff_secs(50), 2560);
    }
}
