/// Shared fixtures for integration tests: an in-memory database, a mock
/// platform and a manual clock wired into one AppContext.
use chrono::{DateTime, Utc};
use postline::{
    clock::ManualClock,
    config::{
        LoggingConfig, PlatformConfig, RateLimitConfig, SchedulingConfig, ServerConfig,
        ServiceConfig, StorageConfig,
    },
    context::AppContext,
    db,
    db::models::{Account, PostType},
    platform::{MockConfig, MockPlatform},
    store::NewPost,
};
use std::sync::Arc;

pub fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 0,
            base_url: "http://localhost".to_string(),
        },
        storage: StorageConfig {
            data_directory: "./data".into(),
            db_path: ":memory:".into(),
        },
        scheduling: SchedulingConfig {
            tick_interval_secs: 1,
            grace_secs: 5,
            batch_size: 50,
            lease_ttl_secs: 300,
            max_retries: 5,
            worker_parallelism: 4,
            min_spacing_minutes: 15,
            daily_cap: 15,
            consecutive_failure_pause: 3,
        },
        platform: PlatformConfig {
            graph_base_url: "https://graph.example".to_string(),
            graph_version: "v19.0".to_string(),
            timeout_secs: 5,
            mock: true,
        },
        rate_limit: RateLimitConfig {
            enabled: false,
            requests_per_second: 100,
            burst_size: 50,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
        },
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub platform: Arc<MockPlatform>,
    pub clock: ManualClock,
}

/// Context over an in-memory database, mock platform and manual clock
pub async fn harness(start: DateTime<Utc>) -> TestHarness {
    harness_with(start, MockConfig::default(), test_config()).await
}

pub async fn harness_with(
    start: DateTime<Utc>,
    mock_config: MockConfig,
    config: ServerConfig,
) -> TestHarness {
    let pool = db::connect(
        db::Storage::Memory,
        db::DatabaseOptions::for_scheduling(&config.scheduling),
    )
    .await
    .expect("database");

    let platform = Arc::new(MockPlatform::new(mock_config));
    let clock = ManualClock::new(start);

    let ctx = AppContext::assemble(
        config,
        pool,
        Arc::clone(&platform) as Arc<dyn postline::platform::PlatformClient>,
        Arc::new(clock.clone()),
    )
    .expect("context");

    TestHarness {
        ctx,
        platform,
        clock,
    }
}

pub async fn seed_account(ctx: &AppContext, timezone: &str) -> Account {
    ctx.accounts
        .upsert("igu-1001", "tester", "token-abc", timezone, ctx.clock.now())
        .await
        .expect("seed account")
}

pub fn photo_post(account_id: i64, scheduled_at: DateTime<Utc>) -> NewPost {
    NewPost {
        account_id,
        platform: "instagram".to_string(),
        post_type: PostType::Photo,
        media_url: "https://cdn.example/a.jpg".to_string(),
        caption: String::new(),
        scheduled_at,
        client_request_id: None,
        asset_id: None,
    }
}
