/// Configuration management for the Postline scheduler
use crate::error::{SchedResult, SchedulerError};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub scheduling: SchedulingConfig,
    pub platform: PlatformConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub base_url: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub db_path: PathBuf,
}

/// Publishing-engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Leaser cadence in seconds
    pub tick_interval_secs: u64,
    /// How far ahead of now a post counts as due
    pub grace_secs: i64,
    /// Max rows leased per tick
    pub batch_size: i64,
    /// Lease reclaim threshold in seconds
    pub lease_ttl_secs: i64,
    /// Max transient retries before a post fails
    pub max_retries: i32,
    /// Concurrent publish workers across all accounts
    pub worker_parallelism: usize,
    /// Minimum minutes between two posts on one account per local day
    pub min_spacing_minutes: i64,
    /// Max non-terminal posts per account per local day
    pub daily_cap: i64,
    /// Consecutive exhausted-retry failures before an account auto-freezes
    pub consecutive_failure_pause: i64,
}

/// External platform (graph API) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub graph_base_url: String,
    pub graph_version: String,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
    /// Use the in-process mock instead of the real graph API
    pub mock: bool,
}

/// HTTP request rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> SchedResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("POSTLINE_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("POSTLINE_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| SchedulerError::Validation("Invalid port number".to_string()))?;
        let base_url = env::var("POSTLINE_BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", hostname, port));

        let data_directory: PathBuf = env::var("POSTLINE_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let db_path = env::var("POSTLINE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("postline.sqlite"));

        let scheduling = SchedulingConfig {
            tick_interval_secs: env_parse("POSTLINE_TICK_INTERVAL_SEC", 5),
            grace_secs: env_parse("POSTLINE_GRACE_SEC", 30),
            batch_size: env_parse("POSTLINE_LEASE_BATCH_SIZE", 50),
            lease_ttl_secs: env_parse("POSTLINE_LEASE_TTL_SEC", 300),
            max_retries: env_parse("POSTLINE_MAX_RETRIES", 5),
            worker_parallelism: env_parse("POSTLINE_WORKER_PARALLELISM", 8),
            min_spacing_minutes: env_parse("POSTLINE_MIN_SPACING_MINUTES", 15),
            daily_cap: env_parse("POSTLINE_DAILY_CAP", 15),
            consecutive_failure_pause: env_parse("POSTLINE_PAUSE_ON_CONSEC_FAILS", 3),
        };

        let platform = PlatformConfig {
            graph_base_url: env::var("POSTLINE_GRAPH_BASE_URL")
                .unwrap_or_else(|_| "https://graph.facebook.com".to_string()),
            graph_version: env::var("POSTLINE_GRAPH_VERSION")
                .unwrap_or_else(|_| "v19.0".to_string()),
            timeout_secs: env_parse("POSTLINE_GRAPH_TIMEOUT_SEC", 30),
            mock: env::var("POSTLINE_MOCK_PLATFORM")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };

        let rate_limit = RateLimitConfig {
            enabled: env_parse("POSTLINE_RATE_LIMITS_ENABLED", true),
            requests_per_second: env_parse("POSTLINE_RATE_LIMIT_RPS", 100),
            burst_size: env_parse("POSTLINE_RATE_LIMIT_BURST", 50),
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                base_url,
            },
            storage: StorageConfig {
                data_directory,
                db_path,
            },
            scheduling,
            platform,
            rate_limit,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> SchedResult<()> {
        if self.service.hostname.is_empty() {
            return Err(SchedulerError::Validation(
                "Hostname cannot be empty".to_string(),
            ));
        }
        if self.scheduling.batch_size <= 0 {
            return Err(SchedulerError::Validation(
                "Lease batch size must be positive".to_string(),
            ));
        }
        if self.scheduling.lease_ttl_secs <= 0 {
            return Err(SchedulerError::Validation(
                "Lease TTL must be positive".to_string(),
            ));
        }
        if self.scheduling.min_spacing_minutes < 0 || self.scheduling.daily_cap < 0 {
            return Err(SchedulerError::Validation(
                "Spacing and daily cap must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}
