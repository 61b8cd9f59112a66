/// Post store: CRUD, range queries, lease claims and status transitions
///
/// Every write that follows a read goes through a compare-and-set on
/// `(id, status)` so concurrent workers and API cancellation never clobber
/// each other. The lease claim is a single atomic UPDATE over a subselect,
/// which under SQLite's serialized writers yields at-most-once dispatch.
use crate::{
    db::models::{Post, PostStatus, PostType},
    error::{SchedResult, SchedulerError},
};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

const POST_COLUMNS: &str = "id, account_id, platform, post_type, media_url, caption, \
     scheduled_at, status, retry_count, error_code, publish_result, locked_at, \
     client_request_id, asset_id, created_at, updated_at";

/// Outcome of an idempotent create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    IdempotentHit,
}

/// Fields for a new post row
#[derive(Debug, Clone)]
pub struct NewPost {
    pub account_id: i64,
    pub platform: String,
    pub post_type: PostType,
    pub media_url: String,
    pub caption: String,
    pub scheduled_at: DateTime<Utc>,
    pub client_request_id: Option<String>,
    pub asset_id: Option<i64>,
}

/// Partial update applied to a future scheduled post
#[derive(Debug, Clone, Default)]
pub struct PostPatch {
    pub post_type: Option<PostType>,
    pub media_url: Option<String>,
    pub caption: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

pub struct PostStore {
    db: SqlitePool,
}

impl PostStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a post; a duplicate `(account_id, client_request_id)` returns
    /// the existing row instead of a new one
    pub async fn create(
        &self,
        new: NewPost,
        now: DateTime<Utc>,
    ) -> SchedResult<(Post, CreateOutcome)> {
        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO posts
                 (account_id, platform, post_type, media_url, caption, scheduled_at,
                  status, retry_count, client_request_id, asset_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'scheduled', 0, ?7, ?8, ?9, ?9)
             RETURNING id",
        )
        .bind(new.account_id)
        .bind(&new.platform)
        .bind(new.post_type)
        .bind(&new.media_url)
        .bind(&new.caption)
        .bind(new.scheduled_at)
        .bind(&new.client_request_id)
        .bind(new.asset_id)
        .bind(now)
        .fetch_one(&self.db)
        .await;

        match inserted {
            Ok(id) => Ok((self.get(id).await?, CreateOutcome::Created)),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let key = new.client_request_id.as_deref().ok_or_else(|| {
                    SchedulerError::Conflict("duplicate post".to_string())
                })?;
                let existing = sqlx::query_as::<_, Post>(&format!(
                    "SELECT {} FROM posts WHERE account_id = ?1 AND client_request_id = ?2",
                    POST_COLUMNS
                ))
                .bind(new.account_id)
                .bind(key)
                .fetch_one(&self.db)
                .await?;
                Ok((existing, CreateOutcome::IdempotentHit))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Insert one batch chunk atomically; rows whose idempotency key already
    /// exists are skipped. Returns the number of rows actually inserted.
    pub async fn insert_chunk(
        &self,
        chunk: &[NewPost],
        now: DateTime<Utc>,
    ) -> SchedResult<u64> {
        let mut tx = self.db.begin().await?;
        let mut inserted = 0u64;

        for new in chunk {
            let result = sqlx::query(
                "INSERT INTO posts
                     (account_id, platform, post_type, media_url, caption, scheduled_at,
                      status, retry_count, client_request_id, asset_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'scheduled', 0, ?7, ?8, ?9, ?9)
                 ON CONFLICT DO NOTHING",
            )
            .bind(new.account_id)
            .bind(&new.platform)
            .bind(new.post_type)
            .bind(&new.media_url)
            .bind(&new.caption)
            .bind(new.scheduled_at)
            .bind(&new.client_request_id)
            .bind(new.asset_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn get(&self, id: i64) -> SchedResult<Post> {
        sqlx::query_as::<_, Post>(&format!(
            "SELECT {} FROM posts WHERE id = ?1",
            POST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("post {}", id)))
    }

    /// Calendar range query, ordered by scheduled_at then id
    pub async fn range(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SchedResult<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(&format!(
            "SELECT {} FROM posts
             WHERE account_id = ?1 AND scheduled_at >= ?2 AND scheduled_at <= ?3
             ORDER BY scheduled_at ASC, id ASC",
            POST_COLUMNS
        ))
        .bind(account_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;
        Ok(posts)
    }

    /// Apply an edit to a post that is still `scheduled` and in the future
    pub async fn apply_patch(
        &self,
        id: i64,
        patch: PostPatch,
        now: DateTime<Utc>,
    ) -> SchedResult<Post> {
        let post = self.get(id).await?;
        if post.status != PostStatus::Scheduled {
            return Err(SchedulerError::Conflict(format!(
                "post {} is {}, only scheduled posts can be edited",
                id,
                post.status.as_str()
            )));
        }
        if post.scheduled_at <= now {
            return Err(SchedulerError::Conflict(format!(
                "post {} is already due, edits are only allowed for future posts",
                id
            )));
        }

        let result = sqlx::query(
            "UPDATE posts SET
                 post_type = COALESCE(?1, post_type),
                 media_url = COALESCE(?2, media_url),
                 caption = COALESCE(?3, caption),
                 scheduled_at = COALESCE(?4, scheduled_at),
                 updated_at = ?5
             WHERE id = ?6 AND status = 'scheduled'",
        )
        .bind(patch.post_type)
        .bind(&patch.media_url)
        .bind(&patch.caption)
        .bind(patch.scheduled_at)
        .bind(now)
        .bind(id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::Conflict(format!(
                "post {} changed state during edit",
                id
            )));
        }

        self.get(id).await
    }

    pub async fn delete(&self, id: i64) -> SchedResult<()> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::NotFound(format!("post {}", id)));
        }
        Ok(())
    }

    pub async fn bulk_delete(&self, ids: &[i64]) -> SchedResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = (1..=ids.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("DELETE FROM posts WHERE id IN ({})", placeholders);
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        Ok(query.execute(&self.db).await?.rows_affected())
    }

    /// Remove pending work strictly after T for one account
    pub async fn delete_after(
        &self,
        account_id: i64,
        after: DateTime<Utc>,
    ) -> SchedResult<u64> {
        let result = sqlx::query(
            "DELETE FROM posts
             WHERE account_id = ?1 AND scheduled_at > ?2
               AND status IN ('scheduled', 'leased')",
        )
        .bind(account_id)
        .bind(after)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Remove rows already behind the clock; in-flight work stays untouched
    pub async fn clear_old(&self, account_id: i64, now: DateTime<Utc>) -> SchedResult<u64> {
        let result = sqlx::query(
            "DELETE FROM posts
             WHERE account_id = ?1 AND scheduled_at < ?2
               AND status NOT IN ('leased', 'publishing')",
        )
        .bind(account_id)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Non-terminal scheduled times within ± spacing of a candidate instant,
    /// used to report spacing conflicts
    pub async fn neighbors_within(
        &self,
        account_id: i64,
        candidate: DateTime<Utc>,
        spacing: Duration,
        exclude_post_id: Option<i64>,
    ) -> SchedResult<Vec<DateTime<Utc>>> {
        let times = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT scheduled_at FROM posts
             WHERE account_id = ?1
               AND scheduled_at > ?2 AND scheduled_at < ?3
               AND status NOT IN ('posted', 'failed', 'cancelled')
               AND id != ?4
             ORDER BY scheduled_at ASC",
        )
        .bind(account_id)
        .bind(candidate - spacing)
        .bind(candidate + spacing)
        .bind(exclude_post_id.unwrap_or(-1))
        .fetch_all(&self.db)
        .await?;
        Ok(times)
    }

    /// Non-terminal scheduled times inside a UTC window (one local day);
    /// a moved post is excluded from its own census
    pub async fn window_times(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_post_id: Option<i64>,
    ) -> SchedResult<Vec<DateTime<Utc>>> {
        let times = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT scheduled_at FROM posts
             WHERE account_id = ?1
               AND scheduled_at >= ?2 AND scheduled_at < ?3
               AND status NOT IN ('posted', 'failed', 'cancelled')
               AND id != ?4
             ORDER BY scheduled_at ASC",
        )
        .bind(account_id)
        .bind(start)
        .bind(end)
        .bind(exclude_post_id.unwrap_or(-1))
        .fetch_all(&self.db)
        .await?;
        Ok(times)
    }

    /// Posts already published inside a UTC window (one local day)
    pub async fn window_posted_count(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SchedResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM posts
             WHERE account_id = ?1
               AND scheduled_at >= ?2 AND scheduled_at < ?3
               AND status = 'posted'",
        )
        .bind(account_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    /// Atomically claim due scheduled posts, oldest first
    pub async fn lease_due(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
        batch_size: i64,
    ) -> SchedResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "UPDATE posts SET status = 'leased', locked_at = ?1, updated_at = ?1
             WHERE id IN (
                 SELECT p.id FROM posts p
                 JOIN accounts a ON a.id = p.account_id
                 WHERE p.status = 'scheduled'
                   AND p.scheduled_at <= ?2
                   AND a.active = TRUE
                 ORDER BY p.scheduled_at ASC, p.id ASC
                 LIMIT ?3
             )
             RETURNING id",
        )
        .bind(now)
        .bind(now + grace)
        .bind(batch_size)
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    /// Return expired leases to the schedulable pool
    pub async fn reap_expired_leases(
        &self,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> SchedResult<u64> {
        let result = sqlx::query(
            "UPDATE posts SET
                 status = 'scheduled',
                 locked_at = NULL,
                 retry_count = retry_count + 1,
                 error_code = 'lease_expired',
                 updated_at = ?1
             WHERE status IN ('leased', 'publishing') AND locked_at < ?2",
        )
        .bind(now)
        .bind(now - lease_ttl)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Compare-and-set on `(id, status)`; true when the transition was applied
    pub async fn cas_status(
        &self,
        id: i64,
        from: PostStatus,
        to: PostStatus,
        now: DateTime<Utc>,
    ) -> SchedResult<bool> {
        let locked_at = match to {
            PostStatus::Leased | PostStatus::Publishing => Some(now),
            _ => None,
        };
        let result = sqlx::query(
            "UPDATE posts SET status = ?1, locked_at = ?2, updated_at = ?3
             WHERE id = ?4 AND status = ?5",
        )
        .bind(to)
        .bind(locked_at)
        .bind(now)
        .bind(id)
        .bind(from)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Refresh the lease heartbeat while a long publish is in flight
    pub async fn heartbeat(&self, id: i64, now: DateTime<Utc>) -> SchedResult<()> {
        sqlx::query("UPDATE posts SET locked_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Persist the created container id and move leased -> publishing
    pub async fn mark_publishing(
        &self,
        id: i64,
        container_id: &str,
        now: DateTime<Utc>,
    ) -> SchedResult<bool> {
        let post = self.get(id).await?;
        let mut result_json = post.result_json();
        result_json["container_id"] = serde_json::Value::String(container_id.to_string());

        let result = sqlx::query(
            "UPDATE posts SET status = 'publishing', publish_result = ?1,
                 locked_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = 'leased'",
        )
        .bind(result_json.to_string())
        .bind(now)
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record a successful publish and settle the row
    pub async fn mark_posted(
        &self,
        id: i64,
        platform_media_id: &str,
        now: DateTime<Utc>,
    ) -> SchedResult<bool> {
        let post = self.get(id).await?;
        let mut result_json = post.result_json();
        result_json["platform_media_id"] =
            serde_json::Value::String(platform_media_id.to_string());

        let result = sqlx::query(
            "UPDATE posts SET status = 'posted', publish_result = ?1,
                 error_code = NULL, locked_at = NULL, updated_at = ?2
             WHERE id = ?3 AND status = 'publishing'",
        )
        .bind(result_json.to_string())
        .bind(now)
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drop a stale container id so the next attempt stages a fresh one
    pub async fn clear_container(&self, id: i64) -> SchedResult<()> {
        let post = self.get(id).await?;
        let mut result_json = post.result_json();
        if let Some(obj) = result_json.as_object_mut() {
            obj.remove("container_id");
        }
        sqlx::query("UPDATE posts SET publish_result = ?1 WHERE id = ?2")
            .bind(result_json.to_string())
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Release a lease back to `scheduled` for a later retry attempt
    pub async fn release_for_retry(
        &self,
        id: i64,
        next_attempt: DateTime<Utc>,
        error_code: &str,
        now: DateTime<Utc>,
    ) -> SchedResult<()> {
        sqlx::query(
            "UPDATE posts SET
                 status = 'scheduled',
                 scheduled_at = ?1,
                 retry_count = retry_count + 1,
                 error_code = ?2,
                 locked_at = NULL,
                 updated_at = ?3
             WHERE id = ?4 AND status IN ('leased', 'publishing')",
        )
        .bind(next_attempt)
        .bind(error_code)
        .bind(now)
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Settle a post as permanently failed
    pub async fn mark_failed(
        &self,
        id: i64,
        error_code: &str,
        detail: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> SchedResult<()> {
        let post = self.get(id).await?;
        let mut result_json = post.result_json();
        if let Some(detail) = detail {
            result_json["error"] = detail;
        }

        sqlx::query(
            "UPDATE posts SET
                 status = 'failed',
                 retry_count = retry_count + 1,
                 error_code = ?1,
                 publish_result = ?2,
                 locked_at = NULL,
                 updated_at = ?3
             WHERE id = ?4 AND status NOT IN ('posted', 'cancelled')",
        )
        .bind(error_code)
        .bind(result_json.to_string())
        .bind(now)
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Fail every non-terminal post for an account (freeze / auto-pause)
    pub async fn fail_non_terminal_for_account(
        &self,
        account_id: i64,
        error_code: &str,
        now: DateTime<Utc>,
    ) -> SchedResult<u64> {
        let result = sqlx::query(
            "UPDATE posts SET
                 status = 'failed',
                 error_code = ?1,
                 locked_at = NULL,
                 updated_at = ?2
             WHERE account_id = ?3
               AND status NOT IN ('posted', 'failed', 'cancelled')",
        )
        .bind(error_code)
        .bind(now)
        .bind(account_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// True when the account's last `window` settled posts all failed after
    /// exhausting at least `min_retries` attempts
    pub async fn recent_posts_all_failed(
        &self,
        account_id: i64,
        window: i64,
        min_retries: i32,
    ) -> SchedResult<bool> {
        let rows = sqlx::query_as::<_, (String, i32)>(
            "SELECT status, retry_count FROM posts
             WHERE account_id = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )
        .bind(account_id)
        .bind(window)
        .fetch_all(&self.db)
        .await?;

        if (rows.len() as i64) < window {
            return Ok(false);
        }
        Ok(rows
            .iter()
            .all(|(status, retries)| status == "failed" && *retries >= min_retries))
    }
}
