//! Competition refresher: the fetch step the dispatcher drives.
//!
//! One refresh is exactly one provider call. For scheduled refreshes the
//! quota check and the ledger write stay in the dispatcher. The one-off
//! imports used at startup check and log their own call.

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::ledger::QuotaLedger;
use crate::clock::Clock;
use crate::provider::api_football::{ENDPOINT_FIXTURES, ENDPOINT_LEAGUES};
use crate::provider::{FixtureProvider, FixtureQuery};
use crate::storage::FixtureSink;
use crate::types::{CompetitionPriority, Operation, RequestRecord, SchedulerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub fixtures_updated: u64,
    /// HTTP status, when the refresher sees the raw response.
    pub status_code: Option<u16>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompetitionRefresher: Send + Sync {
    /// Provider endpoint charged for one refresh, for the request log.
    fn endpoint(&self) -> String;

    async fn refresh(&self, competition: &CompetitionPriority) -> Result<RefreshOutcome, SchedulerError>;
}

/// Fetches a window of fixtures around today and upserts them.
pub struct ProviderRefresher {
    provider: Arc<dyn FixtureProvider>,
    sink: Arc<dyn FixtureSink>,
    clock: Arc<dyn Clock>,
    season: i32,
    window_days: i64,
}

impl ProviderRefresher {
    pub fn new(
        provider: Arc<dyn FixtureProvider>,
        sink: Arc<dyn FixtureSink>,
        clock: Arc<dyn Clock>,
        season: i32,
        window_days: i64,
    ) -> Self {
        Self {
            provider,
            sink,
            clock,
            season,
            window_days: window_days.max(0),
        }
    }

    fn query(&self, competition_id: i64) -> FixtureQuery {
        let today = self.clock.today();
        let span = Duration::days(self.window_days);
        FixtureQuery::season(competition_id, self.season).between(today - span, today + span)
    }

    /// List the season's competitions and store the tracked ones as
    /// active. One budgeted call. Returns competitions stored.
    pub async fn import_competitions(
        &self,
        ledger: &QuotaLedger,
        tracked: &[i64],
    ) -> Result<u64, SchedulerError> {
        ledger.ensure_budget(Operation::List).await?;
        let units = ledger.estimate_operation_cost(Operation::List);
        let started = Instant::now();
        let listed = self.provider.list_competitions(self.season).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let competitions = match listed {
            Ok(c) => {
                ledger
                    .record_request(
                        RequestRecord::success(ENDPOINT_LEAGUES, None)
                            .with_response_time(elapsed_ms)
                            .with_units(units),
                    )
                    .await;
                c
            }
            Err(e) => {
                ledger
                    .record_request(
                        RequestRecord::failure(ENDPOINT_LEAGUES, None, e.to_string())
                            .with_status(e.status_code())
                            .with_response_time(elapsed_ms)
                            .with_units(units),
                    )
                    .await;
                return Err(e);
            }
        };

        let selected: Vec<_> = competitions
            .into_iter()
            .filter(|c| tracked.contains(&c.id))
            .collect();
        if selected.len() < tracked.len() {
            warn!(
                tracked = tracked.len(),
                found = selected.len(),
                season = self.season,
                "Some tracked competitions are not offered by the provider"
            );
        }
        let stored = self.sink.upsert_competitions(&selected).await?;
        info!(stored, season = self.season, "Competitions imported");
        Ok(stored)
    }

    /// Fetch and store a competition's whole season. One budgeted call.
    pub async fn import_fixtures(
        &self,
        ledger: &QuotaLedger,
        competition_id: i64,
    ) -> Result<u64, SchedulerError> {
        ledger.ensure_budget(Operation::Import).await?;
        let units = ledger.estimate_operation_cost(Operation::Import);
        let query = FixtureQuery::season(competition_id, self.season);
        let started = Instant::now();
        let fetched = self.provider.fetch_fixtures(&query).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match fetched {
            Ok(fixtures) => {
                ledger
                    .record_request(
                        RequestRecord::success(ENDPOINT_FIXTURES, Some(competition_id))
                            .with_response_time(elapsed_ms)
                            .with_units(units),
                    )
                    .await;
                let stored = self.sink.upsert_fixtures(&fixtures).await?;
                info!(competition_id, stored, "Season fixtures imported");
                Ok(stored)
            }
            Err(e) => {
                ledger
                    .record_request(
                        RequestRecord::failure(ENDPOINT_FIXTURES, Some(competition_id), e.to_string())
                            .with_status(e.status_code())
                            .with_response_time(elapsed_ms)
                            .with_units(units),
                    )
                    .await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl CompetitionRefresher for ProviderRefresher {
    fn endpoint(&self) -> String {
        ENDPOINT_FIXTURES.to_string()
    }

    async fn refresh(&self, competition: &CompetitionPriority) -> Result<RefreshOutcome, SchedulerError> {
        let query = self.query(competition.competition_id);
        let fixtures = self.provider.fetch_fixtures(&query).await?;
        let updated = self.sink.upsert_fixtures(&fixtures).await?;
        debug!(
            competition_id = competition.competition_id,
            provider = self.provider.name(),
            fixtures = updated,
            "Competition refreshed"
        );
        // The provider trait hands back decoded fixtures only.
        Ok(RefreshOutcome {
            fixtures_updated: updated,
            status_code: None,
        })
    }
}
