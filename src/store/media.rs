/// Media asset store, deduplicated per account by content hash
use crate::{
    db::models::MediaAsset,
    error::{SchedResult, SchedulerError},
};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

pub struct MediaStore {
    db: SqlitePool,
}

impl MediaStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Hex SHA-256 of media bytes
    pub fn content_hash(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Insert an asset if new; returns the existing row on a duplicate hash
    pub async fn insert_dedup(
        &self,
        account_id: i64,
        stored_path: &str,
        media_url: &str,
        bytes: i64,
        sha256: &str,
        now: DateTime<Utc>,
    ) -> SchedResult<MediaAsset> {
        let short_hash: String = sha256.chars().take(8).collect();

        let inserted = sqlx::query(
            "INSERT INTO media_assets
                 (account_id, stored_path, media_url, bytes, sha256, short_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (account_id, sha256) DO NOTHING",
        )
        .bind(account_id)
        .bind(stored_path)
        .bind(media_url)
        .bind(bytes)
        .bind(sha256)
        .bind(&short_hash)
        .bind(now)
        .execute(&self.db)
        .await?;

        // DO NOTHING leaves rows_affected at 0; either way the row exists now
        let _ = inserted.rows_affected();

        let asset = sqlx::query_as::<_, MediaAsset>(
            "SELECT id, account_id, stored_path, media_url, bytes, sha256, short_hash, created_at
             FROM media_assets WHERE account_id = ?1 AND sha256 = ?2",
        )
        .bind(account_id)
        .bind(sha256)
        .fetch_one(&self.db)
        .await?;
        Ok(asset)
    }

    /// Fetch an asset belonging to the given account
    pub async fn get_for_account(&self, id: i64, account_id: i64) -> SchedResult<MediaAsset> {
        sqlx::query_as::<_, MediaAsset>(
            "SELECT id, account_id, stored_path, media_url, bytes, sha256, short_hash, created_at
             FROM media_assets WHERE id = ?1 AND account_id = ?2",
        )
        .bind(id)
        .bind(account_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("asset {}", id)))
    }
}
