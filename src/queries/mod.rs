//! Read-only dashboard queries answered inline over the WebSocket.
//!
//! Aggregation lives in the relational store; this module only defines the
//! seam and the parameter rules the control protocol applies before calling it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_LEADERBOARD_LIMIT: u32 = 50;
pub const MAX_LEADERBOARD_LIMIT: u32 = 100;
pub const DEFAULT_PEAK_HOURS: u32 = 24;
pub const MAX_PEAK_HOURS: u32 = 24;
pub const DEFAULT_ACTIVITY_DAYS: u32 = 30;
pub const MAX_ACTIVITY_DAYS: u32 = 90;
pub const DEFAULT_RECENT_ACTIONS: u32 = 10;
pub const MAX_RECENT_ACTIONS: u32 = 100;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Statistics backend unavailable: {0}")]
    Unavailable(String),
    #[error("Query failed: {0}")]
    Failed(String),
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::InvalidParameter(_) => "INVALID_PARAMETER",
            QueryError::Unavailable(_) => "QUERY_UNAVAILABLE",
            QueryError::Failed(_) => "QUERY_FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardPeriod {
    Week,
    #[default]
    Month,
    Year,
    All,
}

impl FromStr for LeaderboardPeriod {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "week" => Ok(LeaderboardPeriod::Week),
            "month" => Ok(LeaderboardPeriod::Month),
            "year" => Ok(LeaderboardPeriod::Year),
            "all" => Ok(LeaderboardPeriod::All),
            other => Err(QueryError::InvalidParameter(format!(
                "unknown period '{}', expected week, month, year or all",
                other
            ))),
        }
    }
}

/// Clamp an optional client value into `1..=max`, falling back to `default`.
pub fn clamp_limit(value: Option<u32>, default: u32, max: u32) -> u32 {
    value.unwrap_or(default).clamp(1, max)
}

#[async_trait]
pub trait DashboardQueries: Send + Sync {
    async fn leaderboard(
        &self,
        period: LeaderboardPeriod,
        limit: u32,
    ) -> Result<serde_json::Value, QueryError>;

    async fn personal_stats(&self, moderator_id: &str) -> Result<serde_json::Value, QueryError>;

    async fn peak_hours(
        &self,
        moderator_id: Option<&str>,
        top_n: u32,
    ) -> Result<serde_json::Value, QueryError>;

    async fn activity(&self, days: u32) -> Result<serde_json::Value, QueryError>;

    async fn recent_actions(
        &self,
        moderator_id: &str,
        limit: u32,
    ) -> Result<serde_json::Value, QueryError>;
}

/// Used when no statistics backend is wired in; every query reports `QUERY_UNAVAILABLE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledQueries;

const DISABLED: &str = "no statistics backend configured";

#[async_trait]
impl DashboardQueries for DisabledQueries {
    async fn leaderboard(
        &self,
        _period: LeaderboardPeriod,
        _limit: u32,
    ) -> Result<serde_json::Value, QueryError> {
        Err(QueryError::Unavailable(DISABLED.to_string()))
    }

    async fn personal_stats(&self, _moderator_id: &str) -> Result<serde_json::Value, QueryError> {
        Err(QueryError::Unavailable(DISABLED.to_string()))
    }

    async fn peak_hours(
        &self,
        _moderator_id: Option<&str>,
        _top_n: u32,
    ) -> Result<serde_json::Value, QueryError> {
        Err(QueryError::Unavailable(DISABLED.to_string()))
    }

    async fn activity(&self, _days: u32) -> Result<serde_json::Value, QueryError> {
        Err(QueryError::Unavailable(DISABLED.to_string()))
    }

    async fn recent_actions(
        &self,
        _moderator_id: &str,
        _limit: u32,
    ) -> Result<serde_json::Value, QueryError> {
        Err(QueryError::Unavailable(DISABLED.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parsing() {
        assert_eq!("week".parse::<LeaderboardPeriod>().unwrap(), LeaderboardPeriod::Week);
        assert_eq!("ALL".parse::<LeaderboardPeriod>().unwrap(), LeaderboardPeriod::All);
        assert!(matches!(
            "fortnight".parse::<LeaderboardPeriod>(),
            Err(QueryError::InvalidParameter(_))
        ));
        assert_eq!(LeaderboardPeriod::default(), LeaderboardPeriod::Month);
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None, DEFAULT_ACTIVITY_DAYS, MAX_ACTIVITY_DAYS), 30);
        assert_eq!(clamp_limit(Some(0), 10, 100), 1);
        assert_eq!(clamp_limit(Some(500), 10, 100), 100);
        assert_eq!(clamp_limit(Some(7), 10, 100), 7);
    }

    #[tokio::test]
    async fn test_disabled_queries_report_unavailable() {
        let err = DisabledQueries.activity(7).await.unwrap_err();
        assert_eq!(err.code(), "QUERY_UNAVAILABLE");
    }
}
