/// End-to-end publish flows against the mock platform: happy path, quota
/// backoff, crash recovery, cancellation and account freeze
mod common;

use chrono::{Duration, TimeZone, Utc};
use postline::{
    clock::Clock,
    db::models::PostStatus,
    platform::MockConfig,
    scheduler::{self, worker},
};

#[tokio::test]
async fn leased_post_publishes_and_records_media_id() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "UTC").await;

    let (post, _) = h
        .ctx
        .posts
        .create(common::photo_post(account.id, now - Duration::seconds(1)), now)
        .await
        .unwrap();

    let leased = h
        .ctx
        .posts
        .lease_due(now, Duration::seconds(5), 50)
        .await
        .unwrap();
    assert_eq!(leased, vec![post.id]);

    let outcome = worker::publish_one(&h.ctx, post.id).await.unwrap();
    assert_eq!(outcome, worker::PublishOutcome::Posted);

    let row = h.ctx.posts.get(post.id).await.unwrap();
    assert_eq!(row.status, PostStatus::Posted);
    let media_id = row.result_json()["platform_media_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(!media_id.is_empty());
    assert_eq!(h.platform.publish_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scheduler_tick_drives_due_posts_to_posted() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "UTC").await;

    let (post, _) = h
        .ctx
        .posts
        .create(common::photo_post(account.id, now - Duration::seconds(1)), now)
        .await
        .unwrap();

    let leased = scheduler::run_tick(&h.ctx).await.unwrap();
    assert_eq!(leased, 1);

    // Workers run on the pool; wait for the row to settle
    let mut status = PostStatus::Leased;
    for _ in 0..100 {
        status = h.ctx.posts.get(post.id).await.unwrap().status;
        if status == PostStatus::Posted {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(status, PostStatus::Posted);
}

#[tokio::test]
async fn exhausted_quota_reschedules_past_the_window() {
    let now = Utc::now();
    let mock = MockConfig {
        quota_used: 25,
        quota_limit: 25,
        quota_window_secs: 30,
        ..MockConfig::default()
    };
    let h = common::harness_with(now, mock, common::test_config()).await;
    let account = common::seed_account(&h.ctx, "UTC").await;

    let (post, _) = h
        .ctx
        .posts
        .create(common::photo_post(account.id, now - Duration::seconds(1)), now)
        .await
        .unwrap();
    h.ctx
        .posts
        .lease_due(now, Duration::seconds(5), 50)
        .await
        .unwrap();

    let outcome = worker::publish_one(&h.ctx, post.id).await.unwrap();
    assert_eq!(outcome, worker::PublishOutcome::Rescheduled);

    let row = h.ctx.posts.get(post.id).await.unwrap();
    assert_eq!(row.status, PostStatus::Scheduled);
    assert_eq!(row.retry_count, 1);
    assert_eq!(row.error_code.as_deref(), Some("rate_limited"));
    assert!(row.scheduled_at >= now + Duration::seconds(25));
    assert_eq!(h.platform.publish_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    // Window over, quota free again: the next attempt publishes
    h.platform.set_config(MockConfig::default());
    h.ctx.governor.invalidate(account.id).await;
    h.clock.set(row.scheduled_at + Duration::seconds(1));

    let leased = h
        .ctx
        .posts
        .lease_due(h.clock.now(), Duration::seconds(5), 50)
        .await
        .unwrap();
    assert_eq!(leased, vec![post.id]);
    let outcome = worker::publish_one(&h.ctx, post.id).await.unwrap();
    assert_eq!(outcome, worker::PublishOutcome::Posted);
}

#[tokio::test]
async fn crashed_worker_resumes_from_stored_container() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "UTC").await;

    let (post, _) = h
        .ctx
        .posts
        .create(common::photo_post(account.id, now - Duration::seconds(1)), now)
        .await
        .unwrap();
    h.ctx
        .posts
        .lease_due(now, Duration::seconds(5), 50)
        .await
        .unwrap();

    // First worker stages the container, persists it, then dies before
    // publishing
    let payload = postline::platform::ContainerPayload {
        media_url: "https://cdn.example/a.jpg".to_string(),
        caption: String::new(),
        is_video: false,
        share_to_feed: true,
    };
    let container_id = h
        .ctx
        .platform
        .create_container(&account, &payload)
        .await
        .unwrap();
    assert!(h
        .ctx
        .posts
        .mark_publishing(post.id, &container_id, now)
        .await
        .unwrap());

    // Watchdog reclaims the dead worker's lease
    let later = now + Duration::seconds(301);
    h.clock.set(later);
    let reaped = h
        .ctx
        .posts
        .reap_expired_leases(later, Duration::seconds(300))
        .await
        .unwrap();
    assert_eq!(reaped, 1);

    // The successor resumes from polling: no second container, one publish
    let leased = h
        .ctx
        .posts
        .lease_due(later, Duration::seconds(5), 50)
        .await
        .unwrap();
    assert_eq!(leased, vec![post.id]);
    let outcome = worker::publish_one(&h.ctx, post.id).await.unwrap();
    assert_eq!(outcome, worker::PublishOutcome::Posted);

    let calls = std::sync::atomic::Ordering::SeqCst;
    assert_eq!(h.platform.create_calls.load(calls), 1);
    assert_eq!(h.platform.publish_calls.load(calls), 1);
    assert_eq!(h.platform.published(), vec![container_id]);
}

#[tokio::test]
async fn cancelled_post_aborts_before_publishing() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "UTC").await;

    let (post, _) = h
        .ctx
        .posts
        .create(common::photo_post(account.id, now - Duration::seconds(1)), now)
        .await
        .unwrap();
    h.ctx
        .posts
        .lease_due(now, Duration::seconds(5), 50)
        .await
        .unwrap();

    // API cancels the post while it is leased
    assert!(h
        .ctx
        .posts
        .cas_status(post.id, PostStatus::Leased, PostStatus::Cancelled, now)
        .await
        .unwrap());

    let outcome = worker::publish_one(&h.ctx, post.id).await.unwrap();
    assert_eq!(outcome, worker::PublishOutcome::Aborted);
    assert_eq!(h.platform.publish_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    let row = h.ctx.posts.get(post.id).await.unwrap();
    assert_eq!(row.status, PostStatus::Cancelled);
}

#[tokio::test]
async fn frozen_account_fails_posts_and_blocks_publish() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "UTC").await;

    let (pending, _) = h
        .ctx
        .posts
        .create(common::photo_post(account.id, now + Duration::hours(1)), now)
        .await
        .unwrap();
    let (leased, _) = h
        .ctx
        .posts
        .create(common::photo_post(account.id, now - Duration::seconds(1)), now)
        .await
        .unwrap();
    h.ctx
        .posts
        .lease_due(now, Duration::seconds(5), 50)
        .await
        .unwrap();

    // Freeze: account inactive, all non-terminal posts fail immediately
    h.ctx.accounts.set_active(account.id, false).await.unwrap();
    let failed = h
        .ctx
        .posts
        .fail_non_terminal_for_account(account.id, "account_frozen", now)
        .await
        .unwrap();
    assert_eq!(failed, 2);

    for id in [pending.id, leased.id] {
        let row = h.ctx.posts.get(id).await.unwrap();
        assert_eq!(row.status, PostStatus::Failed);
        assert_eq!(row.error_code.as_deref(), Some("account_frozen"));
    }
    assert_eq!(h.platform.publish_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn terminal_container_failure_settles_as_failed() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let mock = MockConfig {
        containers_fail: true,
        ..MockConfig::default()
    };
    let h = common::harness_with(now, mock, common::test_config()).await;
    let account = common::seed_account(&h.ctx, "UTC").await;

    let (post, _) = h
        .ctx
        .posts
        .create(common::photo_post(account.id, now - Duration::seconds(1)), now)
        .await
        .unwrap();
    h.ctx
        .posts
        .lease_due(now, Duration::seconds(5), 50)
        .await
        .unwrap();

    let outcome = worker::publish_one(&h.ctx, post.id).await.unwrap();
    assert_eq!(outcome, worker::PublishOutcome::Failed);

    let row = h.ctx.posts.get(post.id).await.unwrap();
    assert_eq!(row.status, PostStatus::Failed);
    assert_eq!(row.error_code.as_deref(), Some("terminal"));
}

#[tokio::test]
async fn carousel_posts_stage_children_then_parent() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "UTC").await;

    let mut new = common::photo_post(account.id, now - Duration::seconds(1));
    new.post_type = postline::db::models::PostType::Carousel;
    new.media_url =
        r#"{"type":"carousel","urls":["https://cdn.example/a.jpg","https://cdn.example/b.jpg"]}"#
            .to_string();
    let (post, _) = h.ctx.posts.create(new, now).await.unwrap();

    h.ctx
        .posts
        .lease_due(now, Duration::seconds(5), 50)
        .await
        .unwrap();
    let outcome = worker::publish_one(&h.ctx, post.id).await.unwrap();
    assert_eq!(outcome, worker::PublishOutcome::Posted);

    // Two children plus one parent staged, one publish
    let calls = std::sync::atomic::Ordering::SeqCst;
    assert_eq!(h.platform.create_calls.load(calls), 3);
    assert_eq!(h.platform.publish_calls.load(calls), 1);
}
