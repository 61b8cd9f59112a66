/// Account endpoints: listing, token refresh, freeze lifecycle and cleanup
use crate::{context::AppContext, db::models::Account, error::SchedResult};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/accounts", get(list_accounts))
        .route("/api/accounts/refresh", post(refresh_accounts))
        .route("/api/accounts/:id/freeze", post(freeze_account))
        .route("/api/accounts/:id/unfreeze", post(unfreeze_account))
        .route("/api/accounts/:id/clear_old_posts", post(clear_old_posts))
}

#[derive(Debug, Serialize)]
struct AccountList {
    items: Vec<Account>,
}

async fn list_accounts(State(ctx): State<AppContext>) -> SchedResult<Json<AccountList>> {
    let items = ctx.accounts.list().await?;
    Ok(Json(AccountList { items }))
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    token: Option<String>,
    timezone: Option<String>,
}

/// Rotate the stored token and/or timezone across accounts, then return the
/// refreshed list. Token acquisition itself happens outside this service.
async fn refresh_accounts(
    State(ctx): State<AppContext>,
    Json(request): Json<RefreshRequest>,
) -> SchedResult<Json<AccountList>> {
    let now = ctx.clock.now();

    if request.token.is_some() || request.timezone.is_some() {
        for account in ctx.accounts.list().await? {
            let token = request.token.as_deref().unwrap_or(&account.access_token);
            let timezone = request.timezone.as_deref().unwrap_or(&account.timezone);
            ctx.accounts
                .upsert(
                    &account.platform_user_id,
                    &account.handle,
                    token,
                    timezone,
                    now,
                )
                .await?;
        }
    }

    let items = ctx.accounts.list().await?;
    Ok(Json(AccountList { items }))
}

/// Freeze an account: no further publishes, and all pending work fails now
/// so the calendar shows it immediately
async fn freeze_account(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> SchedResult<Json<Value>> {
    ctx.accounts.set_active(id, false).await?;
    let failed = ctx
        .posts
        .fail_non_terminal_for_account(id, "account_frozen", ctx.clock.now())
        .await?;
    tracing::info!(account_id = id, failed, "account frozen");
    Ok(Json(json!({ "ok": true })))
}

/// Unfreeze an account. Posts failed by the freeze stay failed.
async fn unfreeze_account(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> SchedResult<Json<Value>> {
    ctx.accounts.set_active(id, true).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn clear_old_posts(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> SchedResult<Json<Value>> {
    // 404 for unknown accounts before touching posts
    ctx.accounts.get(id).await?;
    let deleted = ctx.posts.clear_old(id, ctx.clock.now()).await?;
    Ok(Json(json!({ "deleted": deleted })))
}
