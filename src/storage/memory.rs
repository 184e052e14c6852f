//! In-memory store.
//!
//! Backs tests and the `memory` storage backend. Failures can be injected to
//! exercise the ledger's degraded path.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{FixtureSink, FixtureSource, LogStore, StoreResult};
use crate::types::{
    Competition, CompetitionSnapshot, CompetitionUsage, DailyCount, DayDetail, Fixture,
    FixtureState, RequestLogEntry, SchedulerError,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: Mutex<Vec<RequestLogEntry>>,
    competitions: Mutex<BTreeMap<i64, Competition>>,
    fixtures: Mutex<BTreeMap<i64, Fixture>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent log insert fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent log read fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Copy of every log row, oldest first.
    pub fn entries(&self) -> Vec<RequestLogEntry> {
        guard(&self.logs).clone()
    }

    pub fn fixtures(&self) -> Vec<Fixture> {
        guard(&self.fixtures).values().cloned().collect()
    }

    fn check_read(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SchedulerError::Storage("injected read failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn insert(&self, entry: &RequestLogEntry) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SchedulerError::Storage("injected write failure".into()));
        }
        guard(&self.logs).push(entry.clone());
        Ok(())
    }

    async fn count_for_date(&self, date: NaiveDate) -> StoreResult<u32> {
        self.check_read()?;
        Ok(guard(&self.logs)
            .iter()
            .filter(|e| e.date == date)
            .map(|e| e.units)
            .sum())
    }

    async fn aggregate_by_date(&self, since: NaiveDate) -> StoreResult<Vec<DailyCount>> {
        self.check_read()?;
        let mut by_day: BTreeMap<NaiveDate, u32> = BTreeMap::new();
        for e in guard(&self.logs).iter().filter(|e| e.date >= since) {
            *by_day.entry(e.date).or_default() += e.units;
        }
        Ok(by_day
            .into_iter()
            .rev()
            .map(|(date, used)| DailyCount { date, used })
            .collect())
    }

    async fn delete_older_than(&self, cutoff: NaiveDate) -> StoreResult<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SchedulerError::Storage("injected write failure".into()));
        }
        let mut logs = guard(&self.logs);
        let before = logs.len();
        logs.retain(|e| e.date >= cutoff);
        Ok((before - logs.len()) as u64)
    }

    async fn day_detail(&self, date: NaiveDate) -> StoreResult<DayDetail> {
        self.check_read()?;
        let logs = guard(&self.logs);
        let day: Vec<&RequestLogEntry> = logs.iter().filter(|e| e.date == date).collect();
        let latencies: Vec<u64> = day.iter().filter_map(|e| e.response_time_ms).collect();
        Ok(DayDetail {
            first_request_at: day.iter().map(|e| e.timestamp).min(),
            last_request_at: day.iter().map(|e| e.timestamp).max(),
            avg_response_time_ms: if latencies.is_empty() {
                None
            } else {
                Some(latencies.iter().sum::<u64>() as f64 / latencies.len() as f64)
            },
        })
    }

    async fn competition_usage(&self, date: NaiveDate) -> StoreResult<Vec<CompetitionUsage>> {
        self.check_read()?;
        let mut grouped: BTreeMap<i64, (u32, u32)> = BTreeMap::new();
        for e in guard(&self.logs).iter().filter(|e| e.date == date) {
            if let Some(id) = e.competition_id {
                let slot = grouped.entry(id).or_default();
                slot.0 += 1;
                if e.success {
                    slot.1 += 1;
                }
            }
        }
        Ok(grouped
            .into_iter()
            .map(|(competition_id, (total, ok))| CompetitionUsage {
                competition_id,
                request_count: total,
                success_rate: ok as f64 / total as f64 * 100.0,
            })
            .collect())
    }
}

#[async_trait]
impl FixtureSource for MemoryStore {
    async fn snapshot(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<CompetitionSnapshot>> {
        self.check_read()?;
        let competitions = guard(&self.competitions);
        let fixtures = guard(&self.fixtures);
        Ok(competitions
            .values()
            .filter(|c| c.is_active)
            .map(|c| CompetitionSnapshot {
                competition: c.clone(),
                fixtures: fixtures
                    .values()
                    .filter(|f| f.competition_id == c.id)
                    .filter(|f| f.status.is_live() || (f.kickoff >= from && f.kickoff <= to))
                    .map(FixtureState::from)
                    .collect(),
            })
            .collect())
    }

    async fn competition_counts(&self) -> StoreResult<(u32, u32)> {
        self.check_read()?;
        let competitions = guard(&self.competitions);
        let active = competitions.values().filter(|c| c.is_active).count();
        Ok((competitions.len() as u32, active as u32))
    }
}

#[async_trait]
impl FixtureSink for MemoryStore {
    async fn upsert_competitions(&self, competitions: &[Competition]) -> StoreResult<u64> {
        let mut map = guard(&self.competitions);
        for c in competitions {
            map.insert(c.id, c.clone());
        }
        Ok(competitions.len() as u64)
    }

    async fn upsert_fixtures(&self, fixtures: &[Fixture]) -> StoreResult<u64> {
        let mut map = guard(&self.fixtures);
        for f in fixtures {
            map.insert(f.id, f.clone());
        }
        Ok(fixtures.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FixtureStatus, RequestRecord};
    use chrono::{Duration, TimeZone};
    use tokio_test::{assert_err, assert_ok, block_on};

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, d, h, 0, 0).unwrap()
    }

    fn entry(ts: DateTime<Utc>, comp: Option<i64>, ok: bool) -> RequestLogEntry {
        let rec = if ok {
            RequestRecord::success("/fixtures", comp)
        } else {
            RequestRecord::failure("/fixtures", comp, "boom")
        };
        RequestLogEntry::stamp(rec.with_response_time(100), ts)
    }

    #[tokio::test]
    async fn test_count_and_aggregate() {
        let store = MemoryStore::new();
        store.insert(&entry(at(1, 10), None, true)).await.unwrap();
        store.insert(&entry(at(2, 10), None, true)).await.unwrap();
        store.insert(&entry(at(2, 11), None, false)).await.unwrap();

        assert_eq!(store.count_for_date(at(2, 0).date_naive()).await.unwrap(), 2);

        let agg = store.aggregate_by_date(at(1, 0).date_naive()).await.unwrap();
        assert_eq!(agg.len(), 2);
        assert_eq!(agg[0].date, at(2, 0).date_naive());
        assert_eq!(agg[0].used, 2);
        assert_eq!(agg[1].used, 1);
    }

    #[tokio::test]
    async fn test_weighted_entries_sum_units() {
        let store = MemoryStore::new();
        let heavy = RequestRecord::success("/fixtures", Some(39)).with_units(3);
        store.insert(&RequestLogEntry::stamp(heavy, at(2, 9))).await.unwrap();
        store.insert(&entry(at(2, 10), Some(39), true)).await.unwrap();

        assert_eq!(store.count_for_date(at(2, 0).date_naive()).await.unwrap(), 4);
        let agg = store.aggregate_by_date(at(2, 0).date_naive()).await.unwrap();
        assert_eq!(agg[0].used, 4);
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let store = MemoryStore::new();
        store.insert(&entry(at(1, 10), None, true)).await.unwrap();
        store.insert(&entry(at(5, 10), None, true)).await.unwrap();
        let removed = store.delete_older_than(at(3, 0).date_naive()).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_competition_usage_success_rate() {
        let store = MemoryStore::new();
        store.insert(&entry(at(2, 10), Some(39), true)).await.unwrap();
        store.insert(&entry(at(2, 11), Some(39), false)).await.unwrap();
        store.insert(&entry(at(2, 12), None, true)).await.unwrap();
        let usage = store.competition_usage(at(2, 0).date_naive()).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].request_count, 2);
        assert!((usage[0].success_rate - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_snapshot_filters_window_and_inactive() {
        let store = MemoryStore::new();
        store
            .upsert_competitions(&[
                Competition { id: 1, name: "A".into(), season: 2026, is_active: true },
                Competition { id: 2, name: "B".into(), season: 2026, is_active: false },
            ])
            .await
            .unwrap();
        let now = at(10, 12);
        let mk = |id, kickoff, status| Fixture {
            id,
            competition_id: 1,
            kickoff,
            status,
            round: None,
            home_team: "H".into(),
            away_team: "A".into(),
            home_score: None,
            away_score: None,
        };
        store
            .upsert_fixtures(&[
                mk(1, now + Duration::hours(1), FixtureStatus::Scheduled),
                mk(2, now + Duration::days(10), FixtureStatus::Scheduled),
                mk(3, now - Duration::days(2), FixtureStatus::InPlay),
            ])
            .await
            .unwrap();

        let snap = store
            .snapshot(now - Duration::hours(3), now + Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].fixtures.len(), 2);
        assert_eq!(store.competition_counts().await.unwrap(), (2, 1));
    }

    #[test]
    fn test_injected_failures() {
        let store = MemoryStore::new();
        block_on(async {
            assert_ok!(store.insert(&entry(at(1, 1), None, true)).await);
            store.set_fail_writes(true);
            assert_err!(store.insert(&entry(at(1, 2), None, true)).await);
            assert_eq!(assert_ok!(store.count_for_date(at(1, 1).date_naive()).await), 1);
            store.set_fail_reads(true);
            assert_err!(store.count_for_date(at(1, 1).date_naive()).await);
        });
    }
}
