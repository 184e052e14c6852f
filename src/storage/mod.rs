//! Persistence layer.
//!
//! Defines the narrow store interfaces the scheduler depends on:
//! - [`LogStore`]: append-only, date-partitioned request log owned by the
//!   quota ledger
//! - [`FixtureSource`]: read side of fixture state for the priority engine
//! - [`FixtureSink`]: write side used by the refresher after a provider call
//!
//! Two backends implement all three: SQLite for the running service and an
//! in-memory store for tests and dry runs.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::info;

use crate::types::{
    Competition, CompetitionSnapshot, CompetitionUsage, DailyCount, DayDetail, Fixture,
    RequestLogEntry, SchedulerError,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, SchedulerError>;

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn insert(&self, entry: &RequestLogEntry) -> StoreResult<()>;

    /// Budget units spent on `date`: the sum of each entry's `units`.
    async fn count_for_date(&self, date: NaiveDate) -> StoreResult<u32>;

    /// Per-day unit totals for every day on or after `since`, most recent first.
    /// Days without entries are omitted.
    async fn aggregate_by_date(&self, since: NaiveDate) -> StoreResult<Vec<DailyCount>>;

    /// Delete entries dated strictly before `cutoff`. Returns rows removed.
    async fn delete_older_than(&self, cutoff: NaiveDate) -> StoreResult<u64>;

    /// First/last timestamps and mean latency for one day.
    async fn day_detail(&self, date: NaiveDate) -> StoreResult<DayDetail>;

    /// Calls per competition for one day. Entries without a competition
    /// are ignored.
    async fn competition_usage(&self, date: NaiveDate) -> StoreResult<Vec<CompetitionUsage>>;
}

#[async_trait]
pub trait FixtureSource: Send + Sync {
    /// Every active competition with the fixtures that can influence its
    /// priority: live ones, plus those kicking off inside `[from, to]`.
    /// Competitions without such fixtures are still returned.
    async fn snapshot(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<CompetitionSnapshot>>;

    /// `(total, active)` competition counts.
    async fn competition_counts(&self) -> StoreResult<(u32, u32)>;
}

#[async_trait]
pub trait FixtureSink: Send + Sync {
    async fn upsert_competitions(&self, competitions: &[Competition]) -> StoreResult<u64>;

    async fn upsert_fixtures(&self, fixtures: &[Fixture]) -> StoreResult<u64>;
}

/// One backend seen through the three store interfaces.
#[derive(Clone)]
pub struct StoreHandles {
    pub log: Arc<dyn LogStore>,
    pub source: Arc<dyn FixtureSource>,
    pub sink: Arc<dyn FixtureSink>,
}

impl StoreHandles {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: LogStore + FixtureSource + FixtureSink + 'static,
    {
        Self {
            log: backend.clone(),
            source: backend.clone(),
            sink: backend,
        }
    }

    /// Open the backend named by `database_url`: `memory` for an
    /// in-process store, anything else as a SQLite URL.
    pub async fn open(database_url: &str) -> anyhow::Result<Self> {
        if database_url == "memory" {
            info!("Using in-memory store; request logs will not survive a restart");
            return Ok(Self::from_backend(Arc::new(MemoryStore::new())));
        }
        let store = SqliteStore::connect(database_url).await?;
        Ok(Self::from_backend(Arc::new(store)))
    }
}
