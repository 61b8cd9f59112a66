/// Database models for accounts, media assets and posts
use crate::error::{SchedResult, SchedulerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account record in the database
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub platform_user_id: String,
    pub handle: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub timezone: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Parse the stored IANA timezone, falling back to UTC
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

/// Media asset record, deduplicated per account by content hash
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: i64,
    pub account_id: i64,
    pub stored_path: String,
    pub media_url: String,
    pub bytes: i64,
    pub sha256: String,
    pub short_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Post lifecycle status, persisted as TEXT
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PostStatus {
    Scheduled,
    Leased,
    Publishing,
    Posted,
    Failed,
    Cancelled,
}

impl PostStatus {
    /// Terminal states never re-enter the publishing engine
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PostStatus::Posted | PostStatus::Failed | PostStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Leased => "leased",
            PostStatus::Publishing => "publishing",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }
}

/// Canonical post types; any other spelling is rejected at the API boundary
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PostType {
    Photo,
    ReelFeed,
    ReelOnly,
    Carousel,
}

impl PostType {
    pub fn as_str(self) -> &'static str {
        match self {
            PostType::Photo => "photo",
            PostType::ReelFeed => "reel_feed",
            PostType::ReelOnly => "reel_only",
            PostType::Carousel => "carousel",
        }
    }
}

/// Post record in the database
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub account_id: i64,
    pub platform: String,
    pub post_type: PostType,
    pub media_url: String,
    pub caption: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: PostStatus,
    pub retry_count: i32,
    pub error_code: Option<String>,
    pub publish_result: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub client_request_id: Option<String>,
    pub asset_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Decode the media_url column into a single URL or carousel envelope
    pub fn media(&self) -> SchedResult<MediaRef> {
        MediaRef::from_column(&self.media_url)
    }

    /// Parsed publish_result JSON, empty object when unset
    pub fn result_json(&self) -> serde_json::Value {
        self.publish_result
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| serde_json::json!({}))
    }

    /// Container id persisted by a previous create-container step, if any
    pub fn container_id(&self) -> Option<String> {
        self.result_json()
            .get("container_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// Discriminated media reference: one URL, or a 2-10 item carousel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef {
    Single(String),
    Carousel(Vec<String>),
}

/// Wire shape of the carousel envelope stored in posts.media_url
#[derive(Debug, Serialize, Deserialize)]
struct CarouselEnvelope {
    #[serde(rename = "type")]
    kind: String,
    urls: Vec<String>,
}

impl MediaRef {
    /// Parse a media_url column value, validating the carousel envelope
    pub fn from_column(raw: &str) -> SchedResult<Self> {
        let trimmed = raw.trim();
        if !trimmed.starts_with('{') {
            if trimmed.is_empty() {
                return Err(SchedulerError::Validation("media_url is empty".to_string()));
            }
            return Ok(MediaRef::Single(trimmed.to_string()));
        }

        let envelope: CarouselEnvelope = serde_json::from_str(trimmed)
            .map_err(|e| SchedulerError::Validation(format!("Bad media envelope: {}", e)))?;
        if envelope.kind != "carousel" {
            return Err(SchedulerError::Validation(format!(
                "Unknown media envelope type: {}",
                envelope.kind
            )));
        }
        if envelope.urls.len() < 2 || envelope.urls.len() > 10 {
            return Err(SchedulerError::Validation(format!(
                "Carousel needs 2-10 items, got {}",
                envelope.urls.len()
            )));
        }
        Ok(MediaRef::Carousel(envelope.urls))
    }

    /// Encode back into the column representation
    pub fn to_column(&self) -> String {
        match self {
            MediaRef::Single(url) => url.clone(),
            MediaRef::Carousel(urls) => serde_json::to_string(&CarouselEnvelope {
                kind: "carousel".to_string(),
                urls: urls.clone(),
            })
            .unwrap_or_default(),
        }
    }

    /// First URL; carousels use their lead item for captions and reports
    pub fn primary_url(&self) -> &str {
        match self {
            MediaRef::Single(url) => url,
            MediaRef::Carousel(urls) => urls.first().map(String::as_str).unwrap_or(""),
        }
    }
}

/// Whether a URL points at a video by extension
pub fn is_video_url(url: &str) -> bool {
    let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
    path.ends_with(".mp4") || path.ends_with(".mov") || path.ends_with(".m4v")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_media_roundtrip() {
        let media = MediaRef::from_column("https://cdn.example/a.jpg").unwrap();
        assert_eq!(media, MediaRef::Single("https://cdn.example/a.jpg".into()));
        assert_eq!(media.to_column(), "https://cdn.example/a.jpg");
    }

    #[test]
    fn carousel_envelope_parses() {
        let raw = r#"{"type":"carousel","urls":["https://x/a.jpg","https://x/b.jpg"]}"#;
        let media = MediaRef::from_column(raw).unwrap();
        match media {
            MediaRef::Carousel(urls) => assert_eq!(urls.len(), 2),
            other => panic!("expected carousel, got {:?}", other),
        }
    }

    #[test]
    fn carousel_rejects_wrong_arity() {
        let one = r#"{"type":"carousel","urls":["https://x/a.jpg"]}"#;
        assert!(MediaRef::from_column(one).is_err());

        let urls: Vec<String> = (0..11).map(|i| format!("https://x/{}.jpg", i)).collect();
        let raw = serde_json::json!({"type": "carousel", "urls": urls}).to_string();
        assert!(MediaRef::from_column(&raw).is_err());
    }

    #[test]
    fn video_extension_detection() {
        assert!(is_video_url("https://x/clip.MP4"));
        assert!(is_video_url("https://x/clip.mov?sig=abc"));
        assert!(!is_video_url("https://x/photo.jpg"));
    }
}
