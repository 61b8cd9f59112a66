/// Meta Graph API client
///
/// Thin typed wrapper over the container/publish endpoints. Each call has a
/// per-request timeout and maps non-2xx responses onto the error taxonomy;
/// retries and state belong to the publish workers, not here.
use crate::{
    config::PlatformConfig,
    db::models::Account,
    error::{SchedResult, SchedulerError},
    platform::{ContainerPayload, ContainerStatus, PlatformClient, PublishingLimit},
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;

/// Fallback hold-off when the platform rejects on quota without a reset hint
const QUOTA_RETRY_FALLBACK_SECS: u64 = 900;

pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    version: String,
}

impl GraphClient {
    pub fn new(config: &PlatformConfig) -> SchedResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("postline/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SchedulerError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            version: config.graph_version.clone(),
        })
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.version, tail)
    }

    /// Map a non-success response onto the error taxonomy
    fn classify(status: reqwest::StatusCode, body: &Value) -> SchedulerError {
        let code = body
            .pointer("/error/code")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let message = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        // Graph error code 4 is application-level throttling
        if status.as_u16() == 429 || code == 4 {
            return SchedulerError::RateLimited {
                retry_after: std::time::Duration::from_secs(QUOTA_RETRY_FALLBACK_SECS),
            };
        }
        if status.as_u16() == 408 || status.is_server_error() {
            return SchedulerError::Transient(format!("graph http {}: {}", status, message));
        }
        SchedulerError::Terminal(format!("graph http {}: {}", status, message))
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> SchedResult<Value> {
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| SchedulerError::Transient(format!("graph request failed: {}", e)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| SchedulerError::Transient(format!("graph response unreadable: {}", e)))?;
        if !status.is_success() {
            return Err(Self::classify(status, &body));
        }
        Ok(body)
    }

    async fn get_json(&self, url: &str, params: &[(&str, &str)]) -> SchedResult<Value> {
        let response = self
            .http
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| SchedulerError::Transient(format!("graph request failed: {}", e)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| SchedulerError::Transient(format!("graph response unreadable: {}", e)))?;
        if !status.is_success() {
            return Err(Self::classify(status, &body));
        }
        Ok(body)
    }

    fn extract_id(body: &Value) -> SchedResult<String> {
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                SchedulerError::Terminal(format!("graph returned no container id: {}", body))
            })
    }
}

#[async_trait]
impl PlatformClient for GraphClient {
    async fn create_container(
        &self,
        account: &Account,
        payload: &ContainerPayload,
    ) -> SchedResult<String> {
        let url = self.url(&format!("{}/media", account.platform_user_id));
        let share = if payload.share_to_feed { "true" } else { "false" };

        let body = if payload.is_video {
            self.post_form(
                &url,
                &[
                    ("media_type", "REELS"),
                    ("video_url", &payload.media_url),
                    ("caption", &payload.caption),
                    ("share_to_feed", share),
                    ("access_token", &account.access_token),
                ],
            )
            .await?
        } else {
            self.post_form(
                &url,
                &[
                    ("image_url", &payload.media_url),
                    ("caption", &payload.caption),
                    ("access_token", &account.access_token),
                ],
            )
            .await?
        };
        Self::extract_id(&body)
    }

    async fn container_status(
        &self,
        account: &Account,
        container_id: &str,
    ) -> SchedResult<ContainerStatus> {
        let url = self.url(container_id);
        let body = self
            .get_json(
                &url,
                &[
                    ("fields", "status_code"),
                    ("access_token", &account.access_token),
                ],
            )
            .await?;

        let status_code = body
            .get("status_code")
            .and_then(Value::as_str)
            .unwrap_or("");
        Ok(match status_code {
            "IN_PROGRESS" => ContainerStatus::InProgress,
            "FINISHED" | "PUBLISHED" => ContainerStatus::Finished,
            "EXPIRED" => ContainerStatus::Expired,
            _ => ContainerStatus::Error,
        })
    }

    async fn publish(&self, account: &Account, container_id: &str) -> SchedResult<String> {
        let url = self.url(&format!("{}/media_publish", account.platform_user_id));
        let body = self
            .post_form(
                &url,
                &[
                    ("creation_id", container_id),
                    ("access_token", &account.access_token),
                ],
            )
            .await?;
        Self::extract_id(&body)
    }

    async fn publishing_limit(&self, account: &Account) -> SchedResult<PublishingLimit> {
        let url = self.url(&format!(
            "{}/content_publishing_limit",
            account.platform_user_id
        ));
        let body = self
            .get_json(
                &url,
                &[
                    ("fields", "quota_usage,config"),
                    ("access_token", &account.access_token),
                ],
            )
            .await?;

        let entry = body
            .pointer("/data/0")
            .ok_or_else(|| SchedulerError::Transient("quota response missing data".to_string()))?;
        let used = entry
            .get("quota_usage")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let limit = entry
            .pointer("/config/quota_total")
            .and_then(Value::as_u64)
            .unwrap_or(25) as u32;
        let window_secs = entry
            .pointer("/config/quota_duration")
            .and_then(Value::as_i64)
            .unwrap_or(86_400);

        Ok(PublishingLimit {
            used,
            limit,
            window_resets_at: Utc::now() + Duration::seconds(window_secs),
        })
    }

    async fn create_carousel_child(
        &self,
        account: &Account,
        item_url: &str,
    ) -> SchedResult<String> {
        let url = self.url(&format!("{}/media", account.platform_user_id));
        let body = if crate::db::models::is_video_url(item_url) {
            self.post_form(
                &url,
                &[
                    ("media_type", "VIDEO"),
                    ("video_url", item_url),
                    ("is_carousel_item", "true"),
                    ("access_token", &account.access_token),
                ],
            )
            .await?
        } else {
            self.post_form(
                &url,
                &[
                    ("image_url", item_url),
                    ("is_carousel_item", "true"),
                    ("access_token", &account.access_token),
                ],
            )
            .await?
        };
        Self::extract_id(&body)
    }

    async fn create_carousel_parent(
        &self,
        account: &Account,
        children: &[String],
        caption: &str,
    ) -> SchedResult<String> {
        let url = self.url(&format!("{}/media", account.platform_user_id));
        let body = self
            .post_form(
                &url,
                &[
                    ("media_type", "CAROUSEL"),
                    ("children", &children.join(",")),
                    ("caption", caption),
                    ("access_token", &account.access_token),
                ],
            )
            .await?;
        Self::extract_id(&body)
    }
}
