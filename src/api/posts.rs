/// Post endpoints: CRUD, calendar queries, bulk operations and the
/// on-demand publish tick
use crate::{
    api::parse_api_time,
    context::AppContext,
    db::models::{MediaRef, Post, PostType},
    error::{SchedResult, SchedulerError},
    planner,
    scheduler,
    store::{CreateOutcome, NewPost, PostPatch},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/posts/query", get(query_posts))
        .route("/api/posts", post(create_post))
        .route(
            "/api/posts/:id",
            get(get_post)
                .put(update_post)
                .patch(update_post)
                .delete(delete_post),
        )
        .route("/api/posts/bulk_delete", post(bulk_delete))
        .route("/api/posts/delete_after", post(delete_after))
        .route("/api/posts/publish_due", post(publish_due))
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    account_id: i64,
    start: String,
    end: String,
}

#[derive(Debug, Serialize)]
struct PostList {
    items: Vec<Post>,
}

async fn query_posts(
    State(ctx): State<AppContext>,
    Query(params): Query<QueryParams>,
) -> SchedResult<Json<PostList>> {
    let account = ctx.accounts.get(params.account_id).await?;
    let tz = account.tz();
    let start = parse_api_time(tz, &params.start)?;
    let end = parse_api_time(tz, &params.end)?;

    let items = ctx.posts.range(params.account_id, start, end).await?;
    Ok(Json(PostList { items }))
}

#[derive(Debug, Deserialize)]
struct CreatePostRequest {
    account_id: i64,
    platform: Option<String>,
    post_type: PostType,
    media_url: Option<String>,
    caption: Option<String>,
    scheduled_at: String,
    asset_id: Option<i64>,
    client_request_id: Option<String>,
    #[serde(default)]
    override_spacing: bool,
}

#[derive(Debug, Serialize)]
struct CreatePostResponse {
    id: i64,
    status: crate::db::models::PostStatus,
}

async fn create_post(
    State(ctx): State<AppContext>,
    Json(request): Json<CreatePostRequest>,
) -> SchedResult<(StatusCode, Json<CreatePostResponse>)> {
    let account = ctx.accounts.get(request.account_id).await?;
    let scheduled_at = parse_api_time(account.tz(), &request.scheduled_at)?;

    // An uploaded asset supplies the URL when the caller did not
    let media_url = match (&request.media_url, request.asset_id) {
        (Some(url), _) => url.clone(),
        (None, Some(asset_id)) => {
            ctx.media
                .get_for_account(asset_id, request.account_id)
                .await?
                .media_url
        }
        (None, None) => {
            return Err(SchedulerError::Validation(
                "media_url or asset_id is required".to_string(),
            ))
        }
    };

    let media = MediaRef::from_column(&media_url)?;
    match (&media, request.post_type) {
        (MediaRef::Carousel(_), PostType::Carousel) => {}
        (MediaRef::Carousel(_), other) => {
            return Err(SchedulerError::Validation(format!(
                "carousel envelope requires post_type carousel, got {}",
                other.as_str()
            )))
        }
        (MediaRef::Single(_), PostType::Carousel) => {
            return Err(SchedulerError::Validation(
                "post_type carousel requires a carousel media envelope".to_string(),
            ))
        }
        _ => {}
    }

    if !request.override_spacing {
        planner::ensure_slot_free(
            &ctx.posts,
            &account,
            scheduled_at,
            ctx.config.scheduling.min_spacing_minutes,
            ctx.config.scheduling.daily_cap,
            None,
        )
        .await?;
    }

    let caption = match request.caption {
        Some(caption) => caption,
        None => planner::extract_caption(media.primary_url()).unwrap_or_default(),
    };

    let (created, outcome) = ctx
        .posts
        .create(
            NewPost {
                account_id: request.account_id,
                platform: request.platform.unwrap_or_else(|| "instagram".to_string()),
                post_type: request.post_type,
                media_url: media.to_column(),
                caption,
                scheduled_at,
                client_request_id: request.client_request_id,
                asset_id: request.asset_id,
            },
            ctx.clock.now(),
        )
        .await?;

    let code = match outcome {
        CreateOutcome::Created => StatusCode::CREATED,
        CreateOutcome::IdempotentHit => StatusCode::OK,
    };
    Ok((
        code,
        Json(CreatePostResponse {
            id: created.id,
            status: created.status,
        }),
    ))
}

async fn get_post(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> SchedResult<Json<Post>> {
    Ok(Json(ctx.posts.get(id).await?))
}

#[derive(Debug, Deserialize)]
struct UpdatePostRequest {
    post_type: Option<PostType>,
    media_url: Option<String>,
    caption: Option<String>,
    scheduled_at: Option<String>,
    #[serde(default)]
    override_spacing: bool,
}

/// Edit, move or replace a future scheduled post
async fn update_post(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
    Json(request): Json<UpdatePostRequest>,
) -> SchedResult<Json<Post>> {
    let post = ctx.posts.get(id).await?;
    let account = ctx.accounts.get(post.account_id).await?;

    let scheduled_at = match &request.scheduled_at {
        Some(raw) => {
            let target = parse_api_time(account.tz(), raw)?;
            if !request.override_spacing {
                planner::ensure_slot_free(
                    &ctx.posts,
                    &account,
                    target,
                    ctx.config.scheduling.min_spacing_minutes,
                    ctx.config.scheduling.daily_cap,
                    Some(id),
                )
                .await?;
            }
            Some(target)
        }
        None => None,
    };

    // Replacing media re-derives the caption from the filename unless the
    // caller supplied one
    let mut caption = request.caption;
    if let Some(media_url) = &request.media_url {
        let media = MediaRef::from_column(media_url)?;
        if caption.is_none() {
            caption = planner::extract_caption(media.primary_url());
        }
    }

    let updated = ctx
        .posts
        .apply_patch(
            id,
            PostPatch {
                post_type: request.post_type,
                media_url: request.media_url,
                caption,
                scheduled_at,
            },
            ctx.clock.now(),
        )
        .await?;
    Ok(Json(updated))
}

/// Remove a post. Work already claimed by a worker is cancelled in place
/// instead; the worker observes the status flip before its next external
/// call and stands down.
async fn delete_post(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> SchedResult<Json<Value>> {
    let post = ctx.posts.get(id).await?;
    let now = ctx.clock.now();

    let in_flight = matches!(
        post.status,
        crate::db::models::PostStatus::Leased | crate::db::models::PostStatus::Publishing
    );
    if in_flight {
        let flipped = ctx
            .posts
            .cas_status(id, post.status, crate::db::models::PostStatus::Cancelled, now)
            .await?;
        if flipped {
            return Ok(Json(json!({ "ok": true, "cancelled": true })));
        }
        // Raced with the worker finishing; fall through to a plain delete
    }

    ctx.posts.delete(id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct BulkDeleteRequest {
    ids: Vec<i64>,
}

async fn bulk_delete(
    State(ctx): State<AppContext>,
    Json(request): Json<BulkDeleteRequest>,
) -> SchedResult<Json<Value>> {
    let deleted = ctx.posts.bulk_delete(&request.ids).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
struct DeleteAfterRequest {
    account_id: i64,
    after: String,
}

async fn delete_after(
    State(ctx): State<AppContext>,
    Json(request): Json<DeleteAfterRequest>,
) -> SchedResult<Json<Value>> {
    let account = ctx.accounts.get(request.account_id).await?;
    let after = parse_api_time(account.tz(), &request.after)?;
    let deleted = ctx.posts.delete_after(request.account_id, after).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// On-demand equivalent of one scheduler tick
async fn publish_due(State(ctx): State<AppContext>) -> SchedResult<Json<Value>> {
    let leased = scheduler::run_tick(&ctx).await?;
    Ok(Json(json!({ "leased": leased })))
}
