/// Account store using runtime queries
use crate::{
    db::models::Account,
    error::{SchedResult, SchedulerError},
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

pub struct AccountStore {
    db: SqlitePool,
}

impl AccountStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// List all accounts ordered by id
    pub async fn list(&self) -> SchedResult<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>(
            "SELECT id, platform_user_id, handle, access_token, timezone, active, created_at
             FROM accounts ORDER BY id ASC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(accounts)
    }

    /// Fetch one account by id
    pub async fn get(&self, id: i64) -> SchedResult<Account> {
        sqlx::query_as::<_, Account>(
            "SELECT id, platform_user_id, handle, access_token, timezone, active, created_at
             FROM accounts WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("account {}", id)))
    }

    /// Insert or refresh an account keyed by its external platform user id
    pub async fn upsert(
        &self,
        platform_user_id: &str,
        handle: &str,
        access_token: &str,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> SchedResult<Account> {
        if timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(SchedulerError::Validation(format!(
                "Unknown timezone: {}",
                timezone
            )));
        }

        sqlx::query(
            "INSERT INTO accounts (platform_user_id, handle, access_token, timezone, active, created_at)
             VALUES (?1, ?2, ?3, ?4, TRUE, ?5)
             ON CONFLICT (platform_user_id) DO UPDATE SET
                 handle = excluded.handle,
                 access_token = excluded.access_token,
                 active = TRUE",
        )
        .bind(platform_user_id)
        .bind(handle)
        .bind(access_token)
        .bind(timezone)
        .bind(now)
        .execute(&self.db)
        .await?;

        let account = sqlx::query_as::<_, Account>(
            "SELECT id, platform_user_id, handle, access_token, timezone, active, created_at
             FROM accounts WHERE platform_user_id = ?1",
        )
        .bind(platform_user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(account)
    }

    /// Toggle the frozen state; false = frozen
    pub async fn set_active(&self, id: i64, active: bool) -> SchedResult<()> {
        let result = sqlx::query("UPDATE accounts SET active = ?1 WHERE id = ?2")
            .bind(active)
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::NotFound(format!("account {}", id)));
        }
        Ok(())
    }
}
