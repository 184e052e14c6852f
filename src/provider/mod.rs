//! Fixture providers.
//!
//! Defines the `FixtureProvider` trait the scheduler fetches through. The
//! only production implementation is the API-Football client; tests plug in
//! in-memory fakes.

pub mod api_football;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::{Competition, Fixture, SchedulerError};

pub use api_football::ApiFootballClient;

/// Selects the fixtures of one competition season, optionally narrowed to a
/// date range or a single round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureQuery {
    pub competition_id: i64,
    pub season: i32,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub round: Option<String>,
}

impl FixtureQuery {
    pub fn season(competition_id: i64, season: i32) -> Self {
        Self {
            competition_id,
            season,
            from: None,
            to: None,
            round: None,
        }
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn round(mut self, round: impl Into<String>) -> Self {
        self.round = Some(round.into());
        self
    }

    /// Query-string pairs in provider parameter names.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("league", self.competition_id.to_string()),
            ("season", self.season.to_string()),
        ];
        if let Some(from) = self.from {
            params.push(("from", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.to {
            params.push(("to", to.format("%Y-%m-%d").to_string()));
        }
        if let Some(round) = &self.round {
            params.push(("round", round.clone()));
        }
        params
    }
}

/// Abstraction over an external fixture API.
///
/// Every method is one billable call against the daily quota; callers are
/// responsible for checking and recording it.
#[async_trait]
pub trait FixtureProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Competitions available for a season.
    async fn list_competitions(&self, season: i32) -> Result<Vec<Competition>, SchedulerError>;

    async fn fetch_fixtures(&self, query: &FixtureQuery) -> Result<Vec<Fixture>, SchedulerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params() {
        let q = FixtureQuery::season(39, 2026)
            .between(
                NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
            )
            .round("Regular Season - 1");
        let params = q.params();
        assert_eq!(params[0], ("league", "39".to_string()));
        assert_eq!(params[1], ("season", "2026".to_string()));
        assert_eq!(params[2], ("from", "2026-08-01".to_string()));
        assert_eq!(params[3], ("to", "2026-08-03".to_string()));
        assert_eq!(params[4], ("round", "Regular Season - 1".to_string()));
    }

    #[test]
    fn test_season_only() {
        assert_eq!(FixtureQuery::season(61, 2025).params().len(), 2);
    }
}
