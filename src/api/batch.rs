/// Batch planning endpoints: dry-run preflight and week-chunked commit
use crate::{
    context::AppContext,
    error::SchedResult,
    planner::{self, PlanReport, PlanRequest, PlannedSlot},
    store::NewPost,
};
use axum::{extract::State, routing::post, Json, Router};
use chrono::Datelike;
use serde::Serialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/posts/batch_preflight", post(batch_preflight))
        .route("/api/posts/batch/commit", post(batch_commit))
}

/// Simulate placement; no rows are written
async fn batch_preflight(
    State(ctx): State<AppContext>,
    Json(request): Json<PlanRequest>,
) -> SchedResult<Json<PlanReport>> {
    let account = ctx.accounts.get(request.account_id).await?;
    let report = planner::preflight(
        &ctx.posts,
        &account,
        &request,
        ctx.config.scheduling.min_spacing_minutes,
        ctx.config.scheduling.daily_cap,
    )
    .await?;

    tracing::info!(
        account_id = request.account_id,
        slots = report.slots.len(),
        conflicts = report.conflicts.len(),
        seed = report.seed,
        "batch preflight"
    );
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct CommitResponse {
    ok: bool,
    created: u64,
    conflicts: Vec<chrono::DateTime<chrono::Utc>>,
    warnings: Vec<String>,
    seed: u64,
}

/// Expand the same request and insert the slots, one transaction per ISO
/// week, idempotent under replay via batch_<epoch>_<idx> keys
async fn batch_commit(
    State(ctx): State<AppContext>,
    Json(request): Json<PlanRequest>,
) -> SchedResult<Json<CommitResponse>> {
    let account = ctx.accounts.get(request.account_id).await?;
    let report = planner::preflight(
        &ctx.posts,
        &account,
        &request,
        ctx.config.scheduling.min_spacing_minutes,
        ctx.config.scheduling.daily_cap,
    )
    .await?;

    let now = ctx.clock.now();
    let tz = account.tz();

    // Keys derive from the seed, so replaying the same request (same seed)
    // lands on the unique index instead of duplicating rows
    let mut created = 0u64;
    for (week, slots) in chunk_by_week(&report.slots, tz) {
        let chunk: Vec<NewPost> = slots
            .iter()
            .enumerate()
            .map(|(idx, slot)| NewPost {
                account_id: request.account_id,
                platform: "instagram".to_string(),
                post_type: slot.post_type,
                media_url: slot.media_url.clone(),
                caption: slot.caption.clone(),
                scheduled_at: slot.scheduled_at,
                client_request_id: Some(format!("batch_{}_{}_{:06}", report.seed, week, idx)),
                asset_id: None,
            })
            .collect();
        created += ctx.posts.insert_chunk(&chunk, now).await?;
    }

    tracing::info!(
        account_id = request.account_id,
        created,
        seed = report.seed,
        "batch commit"
    );
    Ok(Json(CommitResponse {
        ok: true,
        created,
        conflicts: report.conflicts,
        warnings: report.warnings,
        seed: report.seed,
    }))
}

/// Group slots by the ISO week of their local date, preserving order
fn chunk_by_week(
    slots: &[PlannedSlot],
    tz: chrono_tz::Tz,
) -> Vec<(u32, Vec<PlannedSlot>)> {
    let mut chunks: Vec<(u32, Vec<PlannedSlot>)> = Vec::new();
    for slot in slots {
        let week = slot.scheduled_at.with_timezone(&tz).iso_week().week();
        match chunks.last_mut() {
            Some((current, bucket)) if *current == week => bucket.push(slot.clone()),
            _ => chunks.push((week, vec![slot.clone()])),
        }
    }
    chunks
}
