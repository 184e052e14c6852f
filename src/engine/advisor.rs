//! Interval advisor: how long the service loop should sleep.
//!
//! The recommendation follows the most urgent competition: live matches
//! poll every few minutes, quiet days fall back to a long idle interval.

use chrono::Duration;
use std::sync::Arc;

use super::priority::{PriorityEngine, LEVEL_IMMINENT, LEVEL_LIVE, LEVEL_UPCOMING};
use crate::clock::Clock;
use crate::config::IntervalsSection;
use crate::types::{CompetitionPriority, IntervalRecommendation, NextUpdate, SchedulerError};

#[derive(Debug, Clone)]
pub struct IntervalConfig {
    pub live_minutes: u32,
    pub imminent_minutes: u32,
    pub upcoming_minutes: u32,
    pub idle_minutes: u32,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            live_minutes: 5,
            imminent_minutes: 15,
            upcoming_minutes: 60,
            idle_minutes: 240,
        }
    }
}

impl From<&IntervalsSection> for IntervalConfig {
    fn from(s: &IntervalsSection) -> Self {
        Self {
            live_minutes: s.live_minutes,
            imminent_minutes: s.imminent_minutes,
            upcoming_minutes: s.upcoming_minutes,
            idle_minutes: s.idle_minutes,
        }
    }
}

pub struct IntervalAdvisor {
    engine: Arc<PriorityEngine>,
    clock: Arc<dyn Clock>,
    config: IntervalConfig,
}

impl IntervalAdvisor {
    pub fn new(engine: Arc<PriorityEngine>, clock: Arc<dyn Clock>, config: IntervalConfig) -> Self {
        Self { engine, clock, config }
    }

    pub async fn recommend_interval(&self) -> Result<IntervalRecommendation, SchedulerError> {
        let priorities = self.engine.compute_priorities().await?;
        Ok(self.recommend_from(&priorities))
    }

    pub async fn next_update_time(&self) -> Result<NextUpdate, SchedulerError> {
        let priorities = self.engine.compute_priorities().await?;
        Ok(self.next_update_from(&priorities))
    }

    /// True when any competition is live or about to kick off.
    pub async fn should_update_now(&self) -> Result<bool, SchedulerError> {
        let priorities = self.engine.compute_priorities().await?;
        Ok(Self::is_urgent(&priorities))
    }

    pub fn is_urgent(priorities: &[CompetitionPriority]) -> bool {
        priorities.iter().any(|p| p.priority_level >= LEVEL_IMMINENT)
    }

    pub fn recommend_from(&self, priorities: &[CompetitionPriority]) -> IntervalRecommendation {
        let top = priorities.iter().map(|p| p.priority_level).max().unwrap_or(0);
        let (minutes, reason) = if top >= LEVEL_LIVE {
            (self.config.live_minutes, "live matches")
        } else if top >= LEVEL_IMMINENT {
            (self.config.imminent_minutes, "matches starting soon")
        } else if top >= LEVEL_UPCOMING {
            (self.config.upcoming_minutes, "matches today")
        } else {
            (self.config.idle_minutes, "no imminent activity")
        };
        IntervalRecommendation { minutes, reason: reason.to_string() }
    }

    pub fn next_update_from(&self, priorities: &[CompetitionPriority]) -> NextUpdate {
        let rec = self.recommend_from(priorities);
        NextUpdate {
            next_update: self.clock.now() + Duration::minutes(i64::from(rec.minutes)),
            minutes: rec.minutes,
            reason: rec.reason,
        }
    }

    /// Fallback when priorities cannot be computed.
    pub fn fallback_minutes(&self) -> u32 {
        self.config.imminent_minutes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::priority::PriorityConfig;
    use crate::engine::CostModel;
    use crate::storage::MemoryStore;
    use crate::types::Operation;
    use chrono::{TimeZone, Utc};

    struct Unit;

    impl CostModel for Unit {
        fn cost(&self, _operation: Operation) -> u32 {
            1
        }
    }

    fn advisor(clock: Arc<ManualClock>) -> IntervalAdvisor {
        let engine = Arc::new(PriorityEngine::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            Arc::new(Unit),
            PriorityConfig::default(),
        ));
        IntervalAdvisor::new(engine, clock, IntervalConfig::default())
    }

    fn prio(id: i64, level: u8) -> CompetitionPriority {
        CompetitionPriority {
            competition_id: id,
            name: format!("C{id}"),
            priority_level: level,
            reason: String::new(),
            estimated_cost: 1,
            live_match_count: 0,
            upcoming_match_count: 0,
        }
    }

    #[test]
    fn test_interval_table() {
        let a = advisor(Arc::new(ManualClock::new(Utc::now())));
        assert_eq!(a.recommend_from(&[prio(1, 1), prio(2, 5)]).minutes, 5);
        assert_eq!(a.recommend_from(&[prio(1, 4), prio(2, 2)]).minutes, 15);
        assert_eq!(a.recommend_from(&[prio(1, 3)]).minutes, 60);
        assert_eq!(a.recommend_from(&[prio(1, 2), prio(2, 1)]).minutes, 240);
        assert_eq!(a.recommend_from(&[]).minutes, 240);
        assert_eq!(a.recommend_from(&[prio(1, 5)]).reason, "live matches");
    }

    #[test]
    fn test_urgency() {
        assert!(IntervalAdvisor::is_urgent(&[prio(1, 4)]));
        assert!(IntervalAdvisor::is_urgent(&[prio(1, 1), prio(2, 5)]));
        assert!(!IntervalAdvisor::is_urgent(&[prio(1, 3)]));
        assert!(!IntervalAdvisor::is_urgent(&[]));
    }

    #[test]
    fn test_next_update_adds_interval() {
        let start = Utc.with_ymd_and_hms(2026, 5, 2, 14, 0, 0).unwrap();
        let a = advisor(Arc::new(ManualClock::new(start)));
        let next = a.next_update_from(&[prio(1, 3)]);
        assert_eq!(next.next_update, start + Duration::minutes(60));
        assert_eq!(next.minutes, 60);
    }

    #[tokio::test]
    async fn test_empty_store_is_idle() {
        let a = advisor(Arc::new(ManualClock::new(Utc::now())));
        assert_eq!(a.recommend_interval().await.unwrap().minutes, 240);
        assert!(!a.should_update_now().await.unwrap());
    }
}
