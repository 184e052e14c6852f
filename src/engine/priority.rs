//! Priority engine: ranks active competitions by refresh urgency.
//!
//! Each competition gets a level from 1 (idle) to 5 (live) from the state
//! of its fixtures relative to "now". The first matching rule wins:
//!
//! | level | rule                                                  |
//! |-------|-------------------------------------------------------|
//! | 5     | at least one fixture in play or paused                |
//! | 4     | a scheduled fixture kicks off within the imminent window |
//! | 3     | a scheduled fixture kicks off within the upcoming window |
//! | 2     | a fixture finished with kickoff in the recent window  |
//! | 1     | otherwise                                             |
//!
//! Ranking is pure given a snapshot and a timestamp; [`PriorityEngine`]
//! only adds the store read and the clock.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use super::CostModel;
use crate::clock::Clock;
use crate::config::PrioritySection;
use crate::storage::FixtureSource;
use crate::types::{
    CompetitionPriority, CompetitionSnapshot, FixtureStatus, Operation, SchedulerError,
};

pub const LEVEL_LIVE: u8 = 5;
pub const LEVEL_IMMINENT: u8 = 4;
pub const LEVEL_UPCOMING: u8 = 3;
pub const LEVEL_RECENT: u8 = 2;
pub const LEVEL_IDLE: u8 = 1;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PriorityConfig {
    pub imminent_window: Duration,
    pub upcoming_window: Duration,
    pub recent_finished_window: Duration,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            imminent_window: Duration::hours(2),
            upcoming_window: Duration::hours(24),
            recent_finished_window: Duration::hours(3),
        }
    }
}

impl From<&PrioritySection> for PriorityConfig {
    fn from(s: &PrioritySection) -> Self {
        Self {
            imminent_window: Duration::minutes(s.imminent_window_minutes),
            upcoming_window: Duration::hours(s.upcoming_window_hours),
            recent_finished_window: Duration::hours(s.recent_finished_hours),
        }
    }
}

/// Fixture counts per rule for one competition.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Signals {
    live: u32,
    imminent: u32,
    upcoming: u32,
    recently_finished: u32,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct PriorityEngine {
    source: Arc<dyn FixtureSource>,
    clock: Arc<dyn Clock>,
    costs: Arc<dyn CostModel>,
    config: PriorityConfig,
}

impl PriorityEngine {
    pub fn new(
        source: Arc<dyn FixtureSource>,
        clock: Arc<dyn Clock>,
        costs: Arc<dyn CostModel>,
        config: PriorityConfig,
    ) -> Self {
        Self { source, clock, costs, config }
    }

    /// Priorities for every active competition, most urgent first.
    pub async fn compute_priorities(&self) -> Result<Vec<CompetitionPriority>, SchedulerError> {
        let now = self.clock.now();
        let snapshot = self
            .source
            .snapshot(now - self.config.recent_finished_window, now + self.config.upcoming_window)
            .await?;
        let ranked = self.rank(&snapshot, now);
        debug!(
            competitions = ranked.len(),
            top_level = ranked.first().map(|p| p.priority_level).unwrap_or(0),
            "Priorities computed"
        );
        Ok(ranked)
    }

    /// `(total, active)` competition counts from the fixture source.
    pub async fn competition_counts(&self) -> Result<(u32, u32), SchedulerError> {
        self.source.competition_counts().await
    }

    /// Score and sort a snapshot. Level descending, then competition id.
    pub fn rank(&self, snapshot: &[CompetitionSnapshot], now: DateTime<Utc>) -> Vec<CompetitionPriority> {
        let mut ranked: Vec<CompetitionPriority> =
            snapshot.iter().map(|s| self.score(s, now)).collect();
        ranked.sort_by(|a, b| {
            b.priority_level
                .cmp(&a.priority_level)
                .then(a.competition_id.cmp(&b.competition_id))
        });
        ranked
    }

    pub fn score(&self, snapshot: &CompetitionSnapshot, now: DateTime<Utc>) -> CompetitionPriority {
        let signals = self.signals(snapshot, now);
        let (level, reason) = if signals.live > 0 {
            (LEVEL_LIVE, format!("{} live match(es) in progress", signals.live))
        } else if signals.imminent > 0 {
            (
                LEVEL_IMMINENT,
                format!(
                    "{} match(es) starting within {}h",
                    signals.imminent,
                    self.config.imminent_window.num_minutes() as f64 / 60.0
                ),
            )
        } else if signals.upcoming > 0 {
            (
                LEVEL_UPCOMING,
                format!(
                    "{} match(es) within {}h",
                    signals.upcoming,
                    self.config.upcoming_window.num_hours()
                ),
            )
        } else if signals.recently_finished > 0 {
            (
                LEVEL_RECENT,
                format!(
                    "{} match(es) recently finished, final results",
                    signals.recently_finished
                ),
            )
        } else {
            (LEVEL_IDLE, "no imminent matches".to_string())
        };

        CompetitionPriority {
            competition_id: snapshot.competition.id,
            name: snapshot.competition.name.clone(),
            priority_level: level,
            reason,
            estimated_cost: self.costs.cost(Operation::Sync),
            live_match_count: signals.live,
            upcoming_match_count: signals.upcoming,
        }
    }

    fn signals(&self, snapshot: &CompetitionSnapshot, now: DateTime<Utc>) -> Signals {
        let imminent_end = now + self.config.imminent_window;
        let upcoming_end = now + self.config.upcoming_window;
        let recent_start = now - self.config.recent_finished_window;

        snapshot.fixtures.iter().fold(Signals::default(), |mut acc, f| {
            if f.status.is_live() {
                acc.live += 1;
            } else if f.status == FixtureStatus::Scheduled {
                // Windows are nested: an imminent match is also upcoming.
                if f.kickoff >= now && f.kickoff <= imminent_end {
                    acc.imminent += 1;
                }
                if f.kickoff >= now && f.kickoff <= upcoming_end {
                    acc.upcoming += 1;
                }
            } else if f.status == FixtureStatus::Finished
                && f.kickoff >= recent_start
                && f.kickoff <= now
            {
                acc.recently_finished += 1;
            }
            acc
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{FixtureSink, MemoryStore};
    use crate::types::{Competition, Fixture, FixtureState};
    use chrono::TimeZone;

    struct FlatCost(u32);

    impl CostModel for FlatCost {
        fn cost(&self, _operation: Operation) -> u32 {
            self.0
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, 14, 0, 0).unwrap()
    }

    fn engine_with(store: Arc<MemoryStore>) -> PriorityEngine {
        PriorityEngine::new(
            store,
            Arc::new(ManualClock::new(now())),
            Arc::new(FlatCost(1)),
            PriorityConfig::default(),
        )
    }

    fn snap(id: i64, fixtures: Vec<(FixtureStatus, Duration)>) -> CompetitionSnapshot {
        CompetitionSnapshot {
            competition: Competition {
                id,
                name: format!("League {id}"),
                season: 2026,
                is_active: true,
            },
            fixtures: fixtures
                .into_iter()
                .map(|(status, offset)| FixtureState { status, kickoff: now() + offset })
                .collect(),
        }
    }

    fn engine() -> PriorityEngine {
        engine_with(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_levels_first_match_wins() {
        let e = engine();
        let cases = vec![
            (snap(1, vec![(FixtureStatus::InPlay, Duration::minutes(-30)), (FixtureStatus::Scheduled, Duration::hours(1))]), 5),
            (snap(2, vec![(FixtureStatus::Paused, Duration::minutes(-50))]), 5),
            (snap(3, vec![(FixtureStatus::Scheduled, Duration::minutes(90))]), 4),
            (snap(4, vec![(FixtureStatus::Scheduled, Duration::hours(5))]), 3),
            (snap(5, vec![(FixtureStatus::Finished, Duration::hours(-2))]), 2),
            (snap(6, vec![(FixtureStatus::Finished, Duration::hours(-4))]), 1),
            (snap(7, vec![]), 1),
            (snap(8, vec![(FixtureStatus::Postponed, Duration::hours(1))]), 1),
        ];
        for (s, expected) in cases {
            let p = e.score(&s, now());
            assert_eq!(p.priority_level, expected, "competition {}", s.competition.id);
            assert!(!p.reason.is_empty());
            assert_eq!(p.estimated_cost, 1);
        }
    }

    #[test]
    fn test_window_edges_inclusive() {
        let e = engine();
        let at_two_hours = snap(1, vec![(FixtureStatus::Scheduled, Duration::hours(2))]);
        assert_eq!(e.score(&at_two_hours, now()).priority_level, 4);
        let past_two_hours = snap(1, vec![(FixtureStatus::Scheduled, Duration::hours(2) + Duration::seconds(1))]);
        assert_eq!(e.score(&past_two_hours, now()).priority_level, 3);
        let at_day = snap(1, vec![(FixtureStatus::Scheduled, Duration::hours(24))]);
        assert_eq!(e.score(&at_day, now()).priority_level, 3);
        let finished_edge = snap(1, vec![(FixtureStatus::Finished, Duration::hours(-3))]);
        assert_eq!(e.score(&finished_edge, now()).priority_level, 2);
    }

    #[test]
    fn test_reasons() {
        let e = engine();
        let live = e.score(&snap(1, vec![(FixtureStatus::InPlay, Duration::zero()), (FixtureStatus::InPlay, Duration::zero())]), now());
        assert!(live.reason.contains("2 live"));
        assert_eq!(live.live_match_count, 2);

        let recent = e.score(&snap(1, vec![(FixtureStatus::Finished, Duration::hours(-1))]), now());
        assert!(recent.reason.contains("recently finished"));
    }

    #[test]
    fn test_upcoming_count_not_double_counted() {
        let e = engine();
        let p = e.score(
            &snap(1, vec![
                (FixtureStatus::Scheduled, Duration::hours(1)),
                (FixtureStatus::Scheduled, Duration::hours(10)),
            ]),
            now(),
        );
        assert_eq!(p.priority_level, 4);
        assert_eq!(p.upcoming_match_count, 2);
    }

    #[test]
    fn test_rank_order_and_determinism() {
        let e = engine();
        let snapshot = vec![
            snap(30, vec![]),
            snap(20, vec![(FixtureStatus::Scheduled, Duration::hours(1))]),
            snap(10, vec![]),
            snap(40, vec![(FixtureStatus::InPlay, Duration::zero())]),
            snap(5, vec![(FixtureStatus::Scheduled, Duration::hours(1))]),
        ];
        let ranked = e.rank(&snapshot, now());
        let ids: Vec<i64> = ranked.iter().map(|p| p.competition_id).collect();
        assert_eq!(ids, vec![40, 5, 20, 10, 30]);

        let mut reversed = snapshot.clone();
        reversed.reverse();
        assert_eq!(e.rank(&reversed, now()), ranked);
    }

    #[test]
    fn test_cost_model_applied() {
        let e = PriorityEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(now())),
            Arc::new(FlatCost(3)),
            PriorityConfig::default(),
        );
        assert_eq!(e.score(&snap(1, vec![]), now()).estimated_cost, 3);
    }

    #[tokio::test]
    async fn test_compute_priorities_from_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_competitions(&[
                Competition { id: 39, name: "Premier League".into(), season: 2026, is_active: true },
                Competition { id: 61, name: "Ligue 1".into(), season: 2026, is_active: true },
                Competition { id: 99, name: "Dormant".into(), season: 2026, is_active: false },
            ])
            .await
            .unwrap();
        store
            .upsert_fixtures(&[Fixture {
                id: 1,
                competition_id: 61,
                kickoff: now() - Duration::minutes(20),
                status: FixtureStatus::InPlay,
                round: None,
                home_team: "PSG".into(),
                away_team: "Lyon".into(),
                home_score: Some(1),
                away_score: Some(0),
            }])
            .await
            .unwrap();

        let e = engine_with(store);
        let priorities = e.compute_priorities().await.unwrap();
        assert_eq!(priorities.len(), 2);
        assert_eq!(priorities[0].competition_id, 61);
        assert_eq!(priorities[0].priority_level, 5);
        assert_eq!(priorities[1].priority_level, 1);
    }

    #[tokio::test]
    async fn test_compute_priorities_propagates_store_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_reads(true);
        let e = engine_with(store);
        assert!(matches!(e.compute_priorities().await, Err(SchedulerError::Storage(_))));
    }
}
