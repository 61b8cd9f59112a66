/// Batch planner: expands a weekly plan plus a media pool into concrete,
/// spacing-respecting, timezone-aware schedule slots
///
/// All scheduling math lives here and runs server-side in UTC; local times
/// exist only at the conversion boundary. Output is deterministic for a
/// given seed.
use crate::{
    db::models::{is_video_url, Account, MediaRef, PostType},
    error::{SchedResult, SchedulerError},
    store::PostStore,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use rand::{rngs::StdRng, Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Hard ceiling on slots per local day regardless of the weekly plan
const MAX_SLOTS_PER_DAY: u32 = 15;

/// Authoritative caption-extraction pattern: `*****TEXT*****` in a URL path
static CAPTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*{5}([^*]{1,200})\*{5}").expect("caption regex"));

/// Pull an embedded caption out of a media URL, when present
pub fn extract_caption(url: &str) -> Option<String> {
    CAPTION_PATTERN
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Convert a naive local datetime to UTC; ambiguous instants resolve to the
/// earliest mapping, nonexistent ones shift forward to the next valid time
pub fn to_utc(tz: Tz, local: chrono::NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = local;
    for _ in 0..8 {
        if let Some(mapped) = tz.from_local_datetime(&candidate).earliest() {
            return mapped.with_timezone(&Utc);
        }
        candidate = candidate + Duration::minutes(30);
    }
    // Pathological zone data; treat the wall time as UTC
    Utc.from_utc_datetime(&local)
}

/// UTC bounds of the local calendar day containing `instant`
pub fn local_day_bounds(tz: Tz, instant: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_date = instant.with_timezone(&tz).date_naive();
    day_bounds(tz, local_date)
}

/// UTC bounds of one local calendar date
pub fn day_bounds(tz: Tz, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0).expect("midnight");
    let start = to_utc(tz, date.and_time(midnight));
    let end = to_utc(tz, (date + Duration::days(1)).and_time(midnight));
    (start, end)
}

/// Parse an `HH:MM` wall-clock bound into minutes since midnight
pub fn parse_minute_of_day(raw: &str) -> SchedResult<u32> {
    let time = NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| SchedulerError::Validation(format!("Bad time of day: {}", raw)))?;
    Ok(time.hour() * 60 + time.minute())
}

/// How video URLs in the pool are posted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoMode {
    ReelFeed,
    ReelOnly,
}

/// One pool entry: a single URL or a 2-10 item carousel group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaPoolItem {
    Single(String),
    Group(Vec<String>),
}

impl MediaPoolItem {
    fn to_media(&self) -> SchedResult<(MediaRef, PostType, bool)> {
        match self {
            MediaPoolItem::Single(url) => {
                let is_video = is_video_url(url);
                let post_type = if is_video {
                    // caller maps to reel_feed / reel_only via video_mode
                    PostType::ReelOnly
                } else {
                    PostType::Photo
                };
                Ok((MediaRef::Single(url.clone()), post_type, is_video))
            }
            MediaPoolItem::Group(urls) => {
                if urls.len() < 2 || urls.len() > 10 {
                    return Err(SchedulerError::Validation(format!(
                        "Carousel group needs 2-10 items, got {}",
                        urls.len()
                    )));
                }
                Ok((MediaRef::Carousel(urls.clone()), PostType::Carousel, false))
            }
        }
    }
}

/// Planner input, shared by preflight and commit
#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    pub account_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Posts per weekday, Monday first
    pub weekly_plan: [u32; 7],
    /// Local wall-clock window, `HH:MM`
    pub random_start: String,
    pub random_end: String,
    pub min_spacing_minutes: Option<i64>,
    pub media_urls: Vec<MediaPoolItem>,
    pub video_mode: Option<VideoMode>,
    #[serde(default, alias = "override_conflicts")]
    pub override_spacing: bool,
    /// Explicit seed makes the expansion reproducible
    pub seed: Option<u64>,
}

/// One concrete slot a commit would create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedSlot {
    pub scheduled_at: DateTime<Utc>,
    pub post_type: PostType,
    pub media_url: String,
    pub caption: String,
}

/// Preflight result: what a commit would do, with everything it cannot do
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReport {
    pub slots: Vec<PlannedSlot>,
    /// Intended instants that could not be placed
    pub conflicts: Vec<DateTime<Utc>>,
    pub warnings: Vec<String>,
    pub insufficient_media: bool,
    /// Seed actually used, echoed for reproducibility
    pub seed: u64,
}

/// Expand the request into placeable slots without writing anything
pub async fn preflight(
    store: &PostStore,
    account: &Account,
    request: &PlanRequest,
    min_spacing_minutes: i64,
    daily_cap: i64,
) -> SchedResult<PlanReport> {
    if request.end_date < request.start_date {
        return Err(SchedulerError::Validation(
            "end_date must be >= start_date".to_string(),
        ));
    }

    let tz = account.tz();
    let window_start = parse_minute_of_day(&request.random_start)?;
    let window_end = parse_minute_of_day(&request.random_end)?;
    if window_end < window_start {
        return Err(SchedulerError::Validation(
            "random_end must be >= random_start".to_string(),
        ));
    }

    let spacing = request.min_spacing_minutes.unwrap_or(min_spacing_minutes);
    let seed = request.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut placed_instants: Vec<DateTime<Utc>> = Vec::new();
    let mut conflicts: Vec<DateTime<Utc>> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let mut date = request.start_date;
    while date <= request.end_date {
        let weekday = date.weekday().num_days_from_monday() as usize;
        let mut requested = request.weekly_plan[weekday].min(MAX_SLOTS_PER_DAY);
        if requested == 0 {
            date = date + Duration::days(1);
            continue;
        }

        // Existing non-terminal posts on this local day constrain both the
        // cap and the spacing repair unless the caller overrides
        let (day_start, day_end) = day_bounds(tz, date);
        let existing = if request.override_spacing {
            Vec::new()
        } else {
            store
                .window_times(request.account_id, day_start, day_end, None)
                .await?
        };

        if !request.override_spacing {
            let room = (daily_cap - existing.len() as i64).max(0) as u32;
            if requested > room {
                warnings.push(format!(
                    "{}: reduced from {} to {} slots (daily cap {})",
                    date, requested, room, daily_cap
                ));
                requested = room;
            }
        }
        if requested == 0 {
            date = date + Duration::days(1);
            continue;
        }

        let offsets = sample_offsets(&mut rng, window_start, window_end, requested as usize);
        let (day_placed, day_dropped) = repair_day(
            tz,
            date,
            &offsets,
            window_end,
            spacing,
            &existing,
        );

        if !day_dropped.is_empty() {
            warnings.push(format!(
                "{}: {} slot(s) did not fit the window with {}-minute spacing",
                date,
                day_dropped.len(),
                spacing
            ));
            conflicts.extend(day_dropped);
        }
        placed_instants.extend(day_placed);

        date = date + Duration::days(1);
    }

    placed_instants.sort_unstable();

    // Assign media in pool order; slots beyond the pool are dropped
    let mut insufficient_media = false;
    if placed_instants.len() > request.media_urls.len() {
        insufficient_media = true;
        warnings.push(format!(
            "media pool has {} item(s) for {} slot(s)",
            request.media_urls.len(),
            placed_instants.len()
        ));
        placed_instants.truncate(request.media_urls.len());
    }

    let video_mode = request.video_mode.unwrap_or(VideoMode::ReelFeed);
    let mut slots = Vec::with_capacity(placed_instants.len());
    for (instant, item) in placed_instants.iter().zip(request.media_urls.iter()) {
        let (media, mut post_type, is_video) = item.to_media()?;
        if is_video {
            post_type = match video_mode {
                VideoMode::ReelFeed => PostType::ReelFeed,
                VideoMode::ReelOnly => PostType::ReelOnly,
            };
        }
        let caption = extract_caption(media.primary_url()).unwrap_or_default();
        slots.push(PlannedSlot {
            scheduled_at: *instant,
            post_type,
            media_url: media.to_column(),
            caption,
        });
    }

    Ok(PlanReport {
        slots,
        conflicts,
        warnings,
        insufficient_media,
        seed,
    })
}

/// Enforce the spacing and daily-cap invariants for one candidate instant.
/// Shared by single-post create and move; batch placement does its own
/// repair pass instead. Either violation reports the conflicting times so
/// the caller can retry with the spacing override.
pub async fn ensure_slot_free(
    store: &PostStore,
    account: &Account,
    candidate: DateTime<Utc>,
    min_spacing_minutes: i64,
    daily_cap: i64,
    exclude_post_id: Option<i64>,
) -> SchedResult<()> {
    let spacing = Duration::minutes(min_spacing_minutes);
    let neighbors = store
        .neighbors_within(account.id, candidate, spacing, exclude_post_id)
        .await?;
    if !neighbors.is_empty() {
        return Err(SchedulerError::SpacingConflict {
            min_spacing_minutes,
            neighbors,
        });
    }

    let (day_start, day_end) = local_day_bounds(account.tz(), candidate);
    let day_times = store
        .window_times(account.id, day_start, day_end, exclude_post_id)
        .await?;
    if day_times.len() as i64 >= daily_cap {
        return Err(SchedulerError::SpacingConflict {
            min_spacing_minutes,
            neighbors: day_times,
        });
    }

    Ok(())
}

/// Sample `count` distinct minute offsets uniformly inside the window
fn sample_offsets(rng: &mut StdRng, start: u32, end: u32, count: usize) -> Vec<u32> {
    let span = (end - start + 1) as usize;
    let take = count.min(span);
    let mut picked = std::collections::BTreeSet::new();
    while picked.len() < take {
        picked.insert(start + rng.gen_range(0..span as u32));
    }
    picked.into_iter().collect()
}

/// Snap-and-repair one day's offsets against spacing, the window end and
/// existing fixed times; returns (placed UTC instants, dropped instants)
fn repair_day(
    tz: Tz,
    date: NaiveDate,
    offsets: &[u32],
    window_end: u32,
    spacing_minutes: i64,
    existing: &[DateTime<Utc>],
) -> (Vec<DateTime<Utc>>, Vec<DateTime<Utc>>) {
    let spacing = Duration::minutes(spacing_minutes);
    let midnight = NaiveTime::from_hms_opt(0, 0, 0).expect("midnight");
    let day_start = date.and_time(midnight);

    let offset_to_utc = |minutes: u32| to_utc(tz, day_start + Duration::minutes(minutes as i64));
    let window_close = offset_to_utc(window_end);

    let mut fixed: Vec<DateTime<Utc>> = existing.to_vec();
    fixed.sort_unstable();

    let mut placed: Vec<DateTime<Utc>> = Vec::new();
    let mut dropped: Vec<DateTime<Utc>> = Vec::new();

    for &offset in offsets {
        let intended = offset_to_utc(offset);
        let mut candidate = match placed.last() {
            Some(last) if intended < *last + spacing => *last + spacing,
            _ => intended,
        };

        // Forward-shift past any fixed neighbor until the gap holds
        loop {
            let collision = fixed
                .iter()
                .find(|t| (candidate - **t).abs() < spacing)
                .copied();
            match collision {
                Some(t) => candidate = t + spacing,
                None => break,
            }
        }

        if candidate > window_close {
            dropped.push(intended);
            continue;
        }
        placed.push(candidate);
    }

    (placed, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn tz() -> Tz {
        "Europe/Berlin".parse().unwrap()
    }

    #[test]
    fn caption_extraction() {
        assert_eq!(
            extract_caption("https://cdn.x/img_*****hello world*****.jpg"),
            Some("hello world".to_string())
        );
        assert_eq!(extract_caption("https://cdn.x/plain.jpg"), None);
        // Over 200 chars between markers does not match
        let long = format!("https://cdn.x/*****{}*****.jpg", "a".repeat(201));
        assert_eq!(extract_caption(&long), None);
    }

    #[test]
    fn minute_of_day_parsing() {
        assert_eq!(parse_minute_of_day("09:00").unwrap(), 540);
        assert_eq!(parse_minute_of_day("21:30").unwrap(), 1290);
        assert!(parse_minute_of_day("25:00").is_err());
    }

    #[test]
    fn sampled_offsets_are_distinct_and_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        let offsets = sample_offsets(&mut rng, 540, 1260, 10);
        assert_eq!(offsets.len(), 10);
        let mut sorted = offsets.clone();
        sorted.dedup();
        assert_eq!(sorted.len(), 10);
        assert!(offsets.iter().all(|&o| (540..=1260).contains(&o)));
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        assert_eq!(
            sample_offsets(&mut a, 540, 1260, 5),
            sample_offsets(&mut b, 540, 1260, 5)
        );
    }

    #[test]
    fn repair_enforces_spacing() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let offsets = vec![600, 605, 612];
        let (placed, dropped) = repair_day(tz(), date, &offsets, 1260, 15, &[]);
        assert_eq!(placed.len(), 3);
        assert!(dropped.is_empty());
        for pair in placed.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::minutes(15));
        }
    }

    #[test]
    fn repair_drops_points_past_window_end() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        // Window ends at 10:10 local; three points cannot fit with 15-min gaps
        let offsets = vec![600, 602, 604];
        let (placed, dropped) = repair_day(tz(), date, &offsets, 610, 15, &[]);
        assert_eq!(placed.len(), 1);
        assert_eq!(dropped.len(), 2);
    }

    #[test]
    fn repair_respects_existing_times() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let fixed_local = date.and_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        let fixed = vec![to_utc(tz(), fixed_local)];
        let offsets = vec![598];
        let (placed, _) = repair_day(tz(), date, &offsets, 1260, 15, &fixed);
        assert_eq!(placed.len(), 1);
        assert!((placed[0] - fixed[0]).abs() >= Duration::minutes(15));
    }

    #[test]
    fn utc_conversion_handles_dst_gap() {
        // Europe/Berlin 2025-03-30 02:30 does not exist; shifts forward
        let gap = NaiveDate::from_ymd_opt(2025, 3, 30)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(2, 30, 0).unwrap());
        let mapped = to_utc(tz(), gap);
        assert!(mapped > to_utc(tz(), gap - Duration::hours(1)));
    }
}
