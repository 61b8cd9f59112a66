/// External platform facade: pure I/O, no retries, no policy
pub mod graph;
pub mod mock;

use crate::{db::models::Account, error::SchedResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use graph::GraphClient;
pub use mock::{MockConfig, MockPlatform};

/// Processing state of a staged media container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    InProgress,
    Finished,
    Error,
    Expired,
}

/// Remote rolling-24h publishing quota snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingLimit {
    pub used: u32,
    pub limit: u32,
    pub window_resets_at: DateTime<Utc>,
}

/// Payload for a single-media container
#[derive(Debug, Clone)]
pub struct ContainerPayload {
    pub media_url: String,
    pub caption: String,
    pub is_video: bool,
    /// Reels only: also surface the post in the main feed
    pub share_to_feed: bool,
}

/// Typed wrapper over the platform graph API
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Stage a single photo or video container
    async fn create_container(
        &self,
        account: &Account,
        payload: &ContainerPayload,
    ) -> SchedResult<String>;

    /// Poll a container's processing state
    async fn container_status(
        &self,
        account: &Account,
        container_id: &str,
    ) -> SchedResult<ContainerStatus>;

    /// Publish a finished container; returns the platform media id
    async fn publish(&self, account: &Account, container_id: &str) -> SchedResult<String>;

    /// Authoritative rolling publishing quota for the account
    async fn publishing_limit(&self, account: &Account) -> SchedResult<PublishingLimit>;

    /// Stage one carousel child item
    async fn create_carousel_child(
        &self,
        account: &Account,
        item_url: &str,
    ) -> SchedResult<String>;

    /// Stage the carousel parent over finished children
    async fn create_carousel_parent(
        &self,
        account: &Account,
        children: &[String],
        caption: &str,
    ) -> SchedResult<String>;
}
