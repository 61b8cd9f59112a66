/// Planner expansion: weekly plans, determinism, spacing repair against
/// existing posts, media assignment and the daily cap
mod common;

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc};
use postline::{
    db::models::PostType,
    planner::{self, MediaPoolItem, PlanRequest, VideoMode},
};

fn week_request(account_id: i64, media: usize) -> PlanRequest {
    PlanRequest {
        account_id,
        start_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2025, 6, 8).unwrap(),
        // Mon..Fri 3/day, Sat 1, Sun 0
        weekly_plan: [3, 3, 3, 3, 3, 1, 0],
        random_start: "09:00".to_string(),
        random_end: "21:00".to_string(),
        min_spacing_minutes: None,
        media_urls: (0..media)
            .map(|i| MediaPoolItem::Single(format!("https://cdn.example/{}.jpg", i)))
            .collect(),
        video_mode: None,
        override_spacing: false,
        seed: Some(42),
    }
}

#[tokio::test]
async fn weekly_plan_expands_with_spacing() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "Europe/Berlin").await;

    let request = week_request(account.id, 18);
    let report = planner::preflight(&h.ctx.posts, &account, &request, 15, 15)
        .await
        .unwrap();

    // 16 intended placements for the week; anything the repair could not
    // fit is reported, never silently lost
    assert_eq!(report.slots.len() + report.conflicts.len(), 16);
    assert!(!report.insufficient_media);
    assert_eq!(report.seed, 42);

    // Spacing holds within each local day
    let tz = account.tz();
    for pair in report.slots.windows(2) {
        let same_day = pair[0].scheduled_at.with_timezone(&tz).date_naive()
            == pair[1].scheduled_at.with_timezone(&tz).date_naive();
        if same_day {
            assert!(pair[1].scheduled_at - pair[0].scheduled_at >= Duration::minutes(15));
        }
    }

    // Sunday stays empty
    assert!(report
        .slots
        .iter()
        .all(|slot| slot.scheduled_at.with_timezone(&tz).weekday() != chrono::Weekday::Sun));
}

#[tokio::test]
async fn same_seed_same_expansion() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "Europe/Berlin").await;

    let request = week_request(account.id, 18);
    let first = planner::preflight(&h.ctx.posts, &account, &request, 15, 15)
        .await
        .unwrap();
    let second = planner::preflight(&h.ctx.posts, &account, &request, 15, 15)
        .await
        .unwrap();

    let times = |report: &planner::PlanReport| {
        report
            .slots
            .iter()
            .map(|slot| slot.scheduled_at)
            .collect::<Vec<_>>()
    };
    assert_eq!(times(&first), times(&second));
}

#[tokio::test]
async fn one_slot_per_day_is_never_dropped() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "Europe/Berlin").await;

    let mut request = week_request(account.id, 10);
    request.weekly_plan = [1, 1, 1, 1, 1, 1, 0];
    let report = planner::preflight(&h.ctx.posts, &account, &request, 15, 15)
        .await
        .unwrap();

    assert_eq!(report.slots.len(), 6);
    assert!(report.conflicts.is_empty());
}

#[tokio::test]
async fn short_media_pool_truncates_and_flags() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "Europe/Berlin").await;

    let mut request = week_request(account.id, 3);
    request.weekly_plan = [1, 1, 1, 1, 1, 1, 0];
    let report = planner::preflight(&h.ctx.posts, &account, &request, 15, 15)
        .await
        .unwrap();

    assert!(report.insufficient_media);
    assert_eq!(report.slots.len(), 3);
}

#[tokio::test]
async fn video_mode_and_carousel_groups_set_post_types() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "Europe/Berlin").await;

    let mut request = week_request(account.id, 0);
    request.weekly_plan = [3, 0, 0, 0, 0, 0, 0];
    request.end_date = request.start_date;
    request.video_mode = Some(VideoMode::ReelOnly);
    request.media_urls = vec![
        MediaPoolItem::Single("https://cdn.example/clip.mp4".to_string()),
        MediaPoolItem::Single("https://cdn.example/still.jpg".to_string()),
        MediaPoolItem::Group(vec![
            "https://cdn.example/a.jpg".to_string(),
            "https://cdn.example/b.jpg".to_string(),
        ]),
    ];

    let report = planner::preflight(&h.ctx.posts, &account, &request, 15, 15)
        .await
        .unwrap();
    let types: Vec<PostType> = report.slots.iter().map(|slot| slot.post_type).collect();
    assert_eq!(types.len(), report.slots.len());
    assert!(types.contains(&PostType::ReelOnly) || report.slots.len() < 3);
    if report.slots.len() == 3 {
        assert_eq!(
            types,
            vec![PostType::ReelOnly, PostType::Photo, PostType::Carousel]
        );
    }
}

#[tokio::test]
async fn existing_posts_shrink_the_day_budget() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "UTC").await;

    // Monday already carries 14 posts; only one more fits under the cap
    let monday_morning = Utc.with_ymd_and_hms(2025, 6, 2, 0, 30, 0).unwrap();
    for slot in 0..14 {
        h.ctx
            .posts
            .create(
                common::photo_post(account.id, monday_morning + Duration::minutes(35 * slot)),
                now,
            )
            .await
            .unwrap();
    }

    let mut request = week_request(account.id, 18);
    request.end_date = request.start_date; // Monday only
    let report = planner::preflight(&h.ctx.posts, &account, &request, 15, 15)
        .await
        .unwrap();

    assert!(report.slots.len() <= 1);
    assert!(report
        .warnings
        .iter()
        .any(|warning| warning.contains("daily cap")));
}

#[tokio::test]
async fn commit_creates_exactly_the_preflight_slots() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
    let h = common::harness(now).await;
    let account = common::seed_account(&h.ctx, "Europe/Berlin").await;

    let mut request = week_request(account.id, 10);
    request.weekly_plan = [1, 1, 1, 1, 1, 1, 0];
    let report = planner::preflight(&h.ctx.posts, &account, &request, 15, 15)
        .await
        .unwrap();

    let chunk: Vec<postline::store::NewPost> = report
        .slots
        .iter()
        .enumerate()
        .map(|(idx, slot)| postline::store::NewPost {
            account_id: account.id,
            platform: "instagram".to_string(),
            post_type: slot.post_type,
            media_url: slot.media_url.clone(),
            caption: slot.caption.clone(),
            scheduled_at: slot.scheduled_at,
            client_request_id: Some(format!("batch_{}_{:06}", report.seed, idx)),
            asset_id: None,
        })
        .collect();

    let created = h.ctx.posts.insert_chunk(&chunk, now).await.unwrap();
    assert_eq!(created as usize, report.slots.len());

    // Replaying the same chunk is a no-op
    let replayed = h.ctx.posts.insert_chunk(&chunk, now).await.unwrap();
    assert_eq!(replayed, 0);
}
