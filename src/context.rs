/// Application context and dependency injection
use crate::{
    clock::{Clock, SystemClock},
    config::ServerConfig,
    db,
    error::SchedResult,
    governor::RateGovernor,
    platform::{GraphClient, MockPlatform, PlatformClient},
    rate_limit::HttpRateLimiter,
    scheduler::mutex::AccountLocks,
    store::{AccountStore, MediaStore, PostStore},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub accounts: Arc<AccountStore>,
    pub media: Arc<MediaStore>,
    pub posts: Arc<PostStore>,
    pub platform: Arc<dyn PlatformClient>,
    pub governor: Arc<RateGovernor>,
    pub clock: Arc<dyn Clock>,
    // Per-account publish serialization
    pub locks: Arc<AccountLocks>,
    // Global worker pool bound
    pub publish_permits: Arc<Semaphore>,
    // HTTP request throttle
    pub http_limiter: Arc<HttpRateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> SchedResult<Self> {
        config.validate()?;

        let pool = db::connect(
            db::Storage::File(&config.storage.db_path),
            db::DatabaseOptions::for_scheduling(&config.scheduling),
        )
        .await?;

        let platform: Arc<dyn PlatformClient> = if config.platform.mock {
            tracing::info!("Using in-process mock platform client");
            Arc::new(MockPlatform::default())
        } else {
            Arc::new(GraphClient::new(&config.platform)?)
        };

        Self::assemble(config, pool, platform, Arc::new(SystemClock))
    }

    /// Wire a context over explicit collaborators; tests inject their own
    /// pool, platform and clock here
    pub fn assemble(
        config: ServerConfig,
        pool: SqlitePool,
        platform: Arc<dyn PlatformClient>,
        clock: Arc<dyn Clock>,
    ) -> SchedResult<Self> {
        let governor = Arc::new(RateGovernor::new(
            Arc::clone(&platform),
            Arc::clone(&clock),
            config.scheduling.daily_cap,
        ));
        let http_limiter = Arc::new(HttpRateLimiter::new(&config.rate_limit));
        let permits = config.scheduling.worker_parallelism.max(1);

        Ok(Self {
            config: Arc::new(config),
            db: pool.clone(),
            accounts: Arc::new(AccountStore::new(pool.clone())),
            media: Arc::new(MediaStore::new(pool.clone())),
            posts: Arc::new(PostStore::new(pool)),
            platform,
            governor,
            clock,
            locks: Arc::new(AccountLocks::new()),
            publish_permits: Arc::new(Semaphore::new(permits)),
            http_limiter,
        })
    }
}
