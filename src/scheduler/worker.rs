/// Per-post publish driver
///
/// Runs the leased -> publishing -> posted pipeline against the platform
/// client, observing cancellation via compare-and-set before every external
/// call. Failures either reschedule the post with backoff folded into
/// `scheduled_at` or settle it as failed.
use crate::{
    context::AppContext,
    db::models::{Account, MediaRef, Post, PostStatus},
    error::{SchedResult, SchedulerError},
    governor::Reservation,
    platform::{ContainerPayload, ContainerStatus},
    scheduler::fsm::{self, PublishEvent},
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{info, warn};

/// Poll backoff: initial 2s, doubling, capped at 30s, at most 5 minutes total
const POLL_INITIAL_SECS: u64 = 2;
const POLL_CAP_SECS: u64 = 30;
const POLL_BUDGET_SECS: i64 = 300;

/// Retry backoff folded into scheduled_at: 2 min base, doubling, 1 h cap
const RETRY_BASE_SECS: i64 = 120;
const RETRY_CAP_SECS: i64 = 3600;

/// What happened to one leased post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Posted,
    Rescheduled,
    Failed,
    /// Lease lost or post cancelled mid-flight; no further action
    Aborted,
}

/// Drive one leased post to completion
pub async fn publish_one(ctx: &AppContext, post_id: i64) -> SchedResult<PublishOutcome> {
    let post = ctx.posts.get(post_id).await?;
    if post.status != PostStatus::Leased {
        // Cancelled or reaped between lease and dispatch
        return Ok(PublishOutcome::Aborted);
    }

    let account = ctx.accounts.get(post.account_id).await?;
    if !account.active {
        ctx.posts
            .mark_failed(post_id, "account_frozen", None, ctx.clock.now())
            .await?;
        return Ok(PublishOutcome::Failed);
    }

    match drive(ctx, &account, &post).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => settle_failure(ctx, &account, &post, err).await,
    }
}

async fn drive(
    ctx: &AppContext,
    account: &Account,
    post: &Post,
) -> SchedResult<PublishOutcome> {
    let now = ctx.clock.now();

    // Budget check before any platform work
    match ctx.governor.reserve(&ctx.posts, account, now).await? {
        Reservation::Ok => {}
        Reservation::ExceedsLocalCap => {
            let (_, day_end) = crate::planner::local_day_bounds(account.tz(), now);
            ctx.posts
                .release_for_retry(post.id, day_end.max(post.scheduled_at), "daily_cap", now)
                .await?;
            info!(post_id = post.id, "daily cap reached, deferred to next day");
            return Ok(PublishOutcome::Rescheduled);
        }
        Reservation::ExceedsRemoteQuota { retry_after } => {
            let next = (now + Duration::from_std(retry_after).unwrap_or(Duration::seconds(60)))
                .max(post.scheduled_at);
            ctx.posts
                .release_for_retry(post.id, next, "rate_limited", now)
                .await?;
            info!(post_id = post.id, "remote quota exhausted, rescheduled");
            return Ok(PublishOutcome::Rescheduled);
        }
    }

    // A persisted container id means a previous attempt got that far; resume
    // from polling instead of creating a duplicate
    let container_id = match post.container_id() {
        Some(existing) => {
            let to = fsm::next(PostStatus::Leased, PublishEvent::ContainerCreated)
                .map_err(|t| SchedulerError::Internal(format!("illegal transition: {:?}", t)))?;
            if !ctx
                .posts
                .cas_status(post.id, PostStatus::Leased, to, now)
                .await?
            {
                return Ok(PublishOutcome::Aborted);
            }
            existing
        }
        None => {
            let container_id = create_container(ctx, account, post).await?;
            if !ctx
                .posts
                .mark_publishing(post.id, &container_id, ctx.clock.now())
                .await?
            {
                // Status moved under us (cancel); the remote container is
                // abandoned, never published
                return Ok(PublishOutcome::Aborted);
            }
            container_id
        }
    };

    match poll_container(ctx, account, post.id, &container_id).await? {
        ContainerStatus::Finished => {}
        ContainerStatus::Expired => {
            ctx.posts.clear_container(post.id).await?;
            return Err(SchedulerError::Transient(
                "container expired before publish".to_string(),
            ));
        }
        ContainerStatus::Error => {
            return Err(SchedulerError::Terminal(
                "platform rejected media container".to_string(),
            ));
        }
        ContainerStatus::InProgress => {
            return Err(SchedulerError::Transient(
                "container still processing after poll budget".to_string(),
            ));
        }
    }

    // Last cancellation checkpoint before the irrevocable publish call
    let fresh = ctx.posts.get(post.id).await?;
    if fresh.status != PostStatus::Publishing {
        return Ok(PublishOutcome::Aborted);
    }

    let media_id = ctx.platform.publish(account, &container_id).await?;
    let settled = ctx
        .posts
        .mark_posted(post.id, &media_id, ctx.clock.now())
        .await?;
    if !settled {
        warn!(post_id = post.id, "posted on platform but row moved state");
        return Ok(PublishOutcome::Aborted);
    }

    info!(post_id = post.id, media_id = %media_id, "published");
    Ok(PublishOutcome::Posted)
}

/// Stage the container(s); carousels create children first, then the parent
async fn create_container(
    ctx: &AppContext,
    account: &Account,
    post: &Post,
) -> SchedResult<String> {
    match post.media()? {
        MediaRef::Single(url) => {
            let is_video = crate::db::models::is_video_url(&url);
            let share_to_feed = post.post_type != crate::db::models::PostType::ReelOnly;
            let payload = ContainerPayload {
                media_url: url,
                caption: post.caption.clone(),
                is_video,
                share_to_feed,
            };
            ctx.platform.create_container(account, &payload).await
        }
        MediaRef::Carousel(urls) => {
            let mut children = Vec::with_capacity(urls.len());
            for url in &urls {
                children.push(ctx.platform.create_carousel_child(account, url).await?);
            }
            ctx.platform
                .create_carousel_parent(account, &children, &post.caption)
                .await
        }
    }
}

/// Poll the container with exponential backoff until it settles or the
/// budget runs out; keeps the lease heartbeat fresh while waiting
async fn poll_container(
    ctx: &AppContext,
    account: &Account,
    post_id: i64,
    container_id: &str,
) -> SchedResult<ContainerStatus> {
    let started = ctx.clock.now();
    let mut delay_secs = POLL_INITIAL_SECS;

    loop {
        let status = ctx.platform.container_status(account, container_id).await?;
        if status != ContainerStatus::InProgress {
            return Ok(status);
        }

        let now = ctx.clock.now();
        if now - started > Duration::seconds(POLL_BUDGET_SECS) {
            return Ok(ContainerStatus::InProgress);
        }

        ctx.posts.heartbeat(post_id, now).await?;
        tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
        delay_secs = (delay_secs * 2).min(POLL_CAP_SECS);
    }
}

/// Map a pipeline error onto retry-with-backoff or permanent failure
async fn settle_failure(
    ctx: &AppContext,
    account: &Account,
    post: &Post,
    err: SchedulerError,
) -> SchedResult<PublishOutcome> {
    let now = ctx.clock.now();

    // The row may only leave leased/publishing through the state machine
    if fsm::next(post.status, PublishEvent::RetryableFailure).is_err()
        && fsm::next(post.status, PublishEvent::TerminalFailure).is_err()
    {
        return Ok(PublishOutcome::Aborted);
    }

    if let SchedulerError::RateLimited { retry_after } = &err {
        ctx.governor.invalidate(account.id).await;
        let next = (now + Duration::from_std(*retry_after).unwrap_or(Duration::seconds(60)))
            .max(post.scheduled_at);
        ctx.posts
            .release_for_retry(post.id, next, "rate_limited", now)
            .await?;
        return Ok(PublishOutcome::Rescheduled);
    }

    if err.is_transient() && post.retry_count < ctx.config.scheduling.max_retries {
        let next = (now + retry_delay(post.retry_count)).max(post.scheduled_at);
        ctx.posts
            .release_for_retry(post.id, next, err.code(), now)
            .await?;
        warn!(post_id = post.id, error = %err, "transient failure, rescheduled");
        return Ok(PublishOutcome::Rescheduled);
    }

    ctx.posts
        .mark_failed(
            post.id,
            err.code(),
            Some(serde_json::json!({ "message": err.to_string() })),
            now,
        )
        .await?;
    warn!(post_id = post.id, error = %err, "post failed");

    maybe_auto_pause(ctx, account, now).await?;
    Ok(PublishOutcome::Failed)
}

/// Exponential backoff with jitter for the next attempt
fn retry_delay(retry_count: i32) -> Duration {
    let exp = RETRY_BASE_SECS
        .saturating_mul(1_i64 << retry_count.clamp(0, 16))
        .min(RETRY_CAP_SECS);
    let jitter = rand::thread_rng().gen_range(0..=exp / 4);
    Duration::seconds(exp + jitter)
}

/// Freeze an account whose recent posts all burned through their retries
async fn maybe_auto_pause(
    ctx: &AppContext,
    account: &Account,
    now: DateTime<Utc>,
) -> SchedResult<()> {
    let window = ctx.config.scheduling.consecutive_failure_pause;
    if window <= 0 {
        return Ok(());
    }
    if !ctx
        .posts
        .recent_posts_all_failed(account.id, window, 2)
        .await?
    {
        return Ok(());
    }

    warn!(
        account_id = account.id,
        "pausing account after {} consecutive exhausted failures", window
    );
    ctx.accounts.set_active(account.id, false).await?;
    ctx.posts
        .fail_non_terminal_for_account(account.id, "account_paused", now)
        .await?;
    Ok(())
}
