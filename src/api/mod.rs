/// API routes and handlers
pub mod accounts;
pub mod batch;
pub mod posts;

use crate::{
    context::AppContext,
    error::{SchedResult, SchedulerError},
    planner,
};
use axum::Router;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(accounts::routes())
        .merge(posts::routes())
        .merge(batch::routes())
}

/// Parse an API timestamp: full ISO-8601, or a naive `YYYY-MM-DDTHH:mm`
/// wall-clock interpreted in the account timezone
pub fn parse_api_time(tz: Tz, raw: &str) -> SchedResult<DateTime<Utc>> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Ok(with_offset.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(planner::to_utc(tz, naive));
        }
    }
    Err(SchedulerError::Validation(format!(
        "Unparseable timestamp: {}",
        raw
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let parsed = parse_api_time(tz, "2025-06-01T10:00:00Z").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-06-01T10:00:00+00:00");
    }

    #[test]
    fn naive_times_use_account_timezone() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // EDT is UTC-4 in June
        let parsed = parse_api_time(tz, "2025-06-01T10:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-06-01T14:00:00+00:00");
    }

    #[test]
    fn garbage_is_rejected() {
        let tz: Tz = "UTC".parse().unwrap();
        assert!(parse_api_time(tz, "next tuesday").is_err());
    }
}
