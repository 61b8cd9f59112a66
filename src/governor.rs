/// Publishing budget governor
///
/// Two budgets gate every publish: the platform's rolling 24-hour quota
/// (authoritative, fetched remotely and cached) and the local per-day cap on
/// published posts in the account's timezone. Reservations are consulted at
/// publish time; scheduling-time capacity is the store's invariant.
use crate::{
    clock::Clock,
    db::models::Account,
    error::SchedResult,
    planner,
    platform::{PlatformClient, PublishingLimit},
    store::PostStore,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// How long a cached remote quota snapshot stays authoritative
const QUOTA_STALE_SECS: i64 = 120;

/// Outcome of a publish-time budget check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Ok,
    ExceedsLocalCap,
    ExceedsRemoteQuota { retry_after: std::time::Duration },
}

#[derive(Debug, Clone)]
struct CachedQuota {
    limit: PublishingLimit,
    fetched_at: DateTime<Utc>,
}

pub struct RateGovernor {
    platform: Arc<dyn PlatformClient>,
    clock: Arc<dyn Clock>,
    daily_cap: i64,
    cache: RwLock<HashMap<i64, CachedQuota>>,
}

impl RateGovernor {
    pub fn new(platform: Arc<dyn PlatformClient>, clock: Arc<dyn Clock>, daily_cap: i64) -> Self {
        Self {
            platform,
            clock,
            daily_cap,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Check both budgets for one publish at `instant`
    pub async fn reserve(
        &self,
        store: &PostStore,
        account: &Account,
        instant: DateTime<Utc>,
    ) -> SchedResult<Reservation> {
        let (day_start, day_end) = planner::local_day_bounds(account.tz(), instant);
        let published_today = store
            .window_posted_count(account.id, day_start, day_end)
            .await?;
        if published_today >= self.daily_cap {
            return Ok(Reservation::ExceedsLocalCap);
        }

        let quota = self.quota(account).await?;
        if quota.used >= quota.limit {
            let now = self.clock.now();
            let wait = (quota.window_resets_at - now).max(Duration::seconds(1));
            return Ok(Reservation::ExceedsRemoteQuota {
                retry_after: wait.to_std().unwrap_or(std::time::Duration::from_secs(1)),
            });
        }

        Ok(Reservation::Ok)
    }

    /// Drop the cached snapshot so the next reserve refetches, used when the
    /// platform itself rejects on quota
    pub async fn invalidate(&self, account_id: i64) {
        self.cache.write().await.remove(&account_id);
    }

    async fn quota(&self, account: &Account) -> SchedResult<PublishingLimit> {
        let now = self.clock.now();

        if let Some(cached) = self.cache.read().await.get(&account.id) {
            if now - cached.fetched_at < Duration::seconds(QUOTA_STALE_SECS) {
                return Ok(cached.limit.clone());
            }
        }

        let fresh = self.platform.publishing_limit(account).await?;
        self.cache.write().await.insert(
            account.id,
            CachedQuota {
                limit: fresh.clone(),
                fetched_at: now,
            },
        );
        Ok(fresh)
    }
}
