/// Mock platform for tests and local development
///
/// Containers progress through a configurable number of IN_PROGRESS polls
/// before finishing. Call counters let tests assert at-most-once publish.
use crate::{
    db::models::Account,
    error::{SchedResult, SchedulerError},
    platform::{ContainerPayload, ContainerStatus, PlatformClient, PublishingLimit},
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Polls a container reports IN_PROGRESS before FINISHED
    pub polls_until_finished: usize,
    /// Containers end up ERROR instead of FINISHED
    pub containers_fail: bool,
    /// Publish calls fail terminally
    pub publish_fails: bool,
    /// Reported quota
    pub quota_used: u32,
    pub quota_limit: u32,
    pub quota_window_secs: i64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            polls_until_finished: 0,
            containers_fail: false,
            publish_fails: false,
            quota_used: 0,
            quota_limit: 25,
            quota_window_secs: 86_400,
        }
    }
}

#[derive(Default)]
struct ContainerState {
    polls: usize,
}

pub struct MockPlatform {
    config: Mutex<MockConfig>,
    next_id: AtomicU64,
    containers: Mutex<HashMap<String, ContainerState>>,
    pub create_calls: AtomicUsize,
    pub publish_calls: AtomicUsize,
    pub quota_calls: AtomicUsize,
    published: Mutex<Vec<String>>,
}

impl MockPlatform {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config: Mutex::new(config),
            next_id: AtomicU64::new(1),
            containers: Mutex::new(HashMap::new()),
            create_calls: AtomicUsize::new(0),
            publish_calls: AtomicUsize::new(0),
            quota_calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn set_config(&self, config: MockConfig) {
        *self.config.lock().unwrap() = config;
    }

    /// Container ids that reached publish, in call order
    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    fn fresh_container(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let container_id = format!("container-{}", id);
        self.containers
            .lock()
            .unwrap()
            .insert(container_id.clone(), ContainerState::default());
        container_id
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn create_container(
        &self,
        _account: &Account,
        _payload: &ContainerPayload,
    ) -> SchedResult<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.fresh_container())
    }

    async fn container_status(
        &self,
        _account: &Account,
        container_id: &str,
    ) -> SchedResult<ContainerStatus> {
        let config = self.config.lock().unwrap().clone();
        let mut containers = self.containers.lock().unwrap();
        let state = containers
            .entry(container_id.to_string())
            .or_default();
        state.polls += 1;

        if config.containers_fail {
            return Ok(ContainerStatus::Error);
        }
        if state.polls > config.polls_until_finished {
            Ok(ContainerStatus::Finished)
        } else {
            Ok(ContainerStatus::InProgress)
        }
    }

    async fn publish(&self, _account: &Account, container_id: &str) -> SchedResult<String> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.config.lock().unwrap().publish_fails {
            return Err(SchedulerError::Terminal("mock publish rejected".to_string()));
        }
        self.published
            .lock()
            .unwrap()
            .push(container_id.to_string());
        Ok(format!("media-{}", container_id))
    }

    async fn publishing_limit(&self, _account: &Account) -> SchedResult<PublishingLimit> {
        self.quota_calls.fetch_add(1, Ordering::SeqCst);
        let config = self.config.lock().unwrap().clone();
        Ok(PublishingLimit {
            used: config.quota_used,
            limit: config.quota_limit,
            window_resets_at: Utc::now() + Duration::seconds(config.quota_window_secs),
        })
    }

    async fn create_carousel_child(
        &self,
        _account: &Account,
        _item_url: &str,
    ) -> SchedResult<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.fresh_container())
    }

    async fn create_carousel_parent(
        &self,
        _account: &Account,
        children: &[String],
        _caption: &str,
    ) -> SchedResult<String> {
        if children.len() < 2 {
            return Err(SchedulerError::Terminal(
                "carousel needs at least 2 children".to_string(),
            ));
        }
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.fresh_container())
    }
}
