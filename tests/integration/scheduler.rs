//! End-to-end scheduler behaviour: ledger, priorities, dispatcher and
//! refresher working against one store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use matchday::clock::ManualClock;
use matchday::engine::advisor::IntervalConfig;
use matchday::engine::dispatcher::DispatcherConfig;
use matchday::engine::ledger::QuotaConfig;
use matchday::engine::priority::PriorityConfig;
use matchday::engine::{Dispatcher, IntervalAdvisor, PriorityEngine, ProviderRefresher, QuotaLedger};
use matchday::storage::{FixtureSink, MemoryStore, SqliteStore, StoreHandles};
use matchday::types::{Competition, Fixture, FixtureStatus, QuotaStatus, RequestRecord, SchedulerError};

use crate::mock_provider::MockProvider;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 2, 14, 0, 0).unwrap()
}

fn competition(id: i64) -> Competition {
    Competition {
        id,
        name: format!("League {id}"),
        season: 2026,
        is_active: true,
    }
}

fn fixture(id: i64, competition_id: i64, status: FixtureStatus, kickoff: DateTime<Utc>) -> Fixture {
    Fixture {
        id,
        competition_id,
        kickoff,
        status,
        round: Some("Regular Season - 34".into()),
        home_team: format!("Home {id}"),
        away_team: format!("Away {id}"),
        home_score: None,
        away_score: None,
    }
}

struct World {
    clock: Arc<ManualClock>,
    provider: MockProvider,
    ledger: Arc<QuotaLedger>,
    engine: Arc<PriorityEngine>,
    advisor: Arc<IntervalAdvisor>,
    refresher: Arc<ProviderRefresher>,
    dispatcher: Dispatcher,
}

fn world(stores: StoreHandles, provider: MockProvider) -> World {
    let clock = Arc::new(ManualClock::new(start()));
    let ledger = Arc::new(QuotaLedger::new(stores.log.clone(), clock.clone(), QuotaConfig::default()));
    let engine = Arc::new(PriorityEngine::new(
        stores.source.clone(),
        clock.clone(),
        ledger.clone(),
        PriorityConfig::default(),
    ));
    let advisor = Arc::new(IntervalAdvisor::new(engine.clone(), clock.clone(), IntervalConfig::default()));
    let refresher = Arc::new(ProviderRefresher::new(
        Arc::new(provider.clone()),
        stores.sink.clone(),
        clock.clone(),
        2026,
        1,
    ));
    let dispatcher = Dispatcher::new(
        ledger.clone(),
        engine.clone(),
        advisor.clone(),
        refresher.clone(),
        DispatcherConfig::default(),
    );
    World {
        clock,
        provider,
        ledger,
        engine,
        advisor,
        refresher,
        dispatcher,
    }
}

async fn memory_world(competitions: &[i64]) -> (World, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let list: Vec<Competition> = competitions.iter().map(|&id| competition(id)).collect();
    store.upsert_competitions(&list).await.unwrap();
    (world(StoreHandles::from_backend(store.clone()), MockProvider::new()), store)
}

async fn spend(ledger: &QuotaLedger, n: u32) {
    for _ in 0..n {
        ledger.record_request(RequestRecord::success("/fixtures", None)).await;
    }
}

#[tokio::test]
async fn test_fresh_day_refreshes_every_idle_competition() {
    let (w, _) = memory_world(&[39, 61, 140]).await;

    let result = w.dispatcher.run().await.unwrap();
    assert_eq!(result.updated_ids, vec![39, 61, 140]);
    assert_eq!(result.remaining_quota_after, 97);
    assert_eq!(result.usage_after.status, QuotaStatus::Normal);
    assert_eq!(w.provider.called_ids(), vec![39, 61, 140]);
}

#[tokio::test]
async fn test_critical_budget_follows_priority_order() {
    let (w, store) = memory_world(&[1, 2, 3, 4, 5]).await;
    let now = start();
    store
        .upsert_fixtures(&[
            fixture(11, 1, FixtureStatus::InPlay, now - Duration::minutes(40)),
            fixture(12, 2, FixtureStatus::Scheduled, now + Duration::minutes(45)),
            fixture(13, 3, FixtureStatus::Scheduled, now + Duration::hours(6)),
            fixture(14, 4, FixtureStatus::Finished, now - Duration::hours(2)),
        ])
        .await
        .unwrap();
    spend(&w.ledger, 85).await;
    assert_eq!(w.ledger.usage_stats().await.status, QuotaStatus::Critical);

    let result = w.dispatcher.run().await.unwrap();
    assert_eq!(result.updated_ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(result.remaining_quota_after, 10);
    assert!(!result.quota_exhausted);
    assert_eq!(w.provider.called_ids(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_quota_exhaustion_mid_run_skips_the_rest() {
    let (w, _) = memory_world(&[1, 2, 3, 4]).await;
    spend(&w.ledger, 98).await;

    let result = w.dispatcher.run().await.unwrap();
    assert_eq!(result.updated_ids, vec![1, 2]);
    assert_eq!(result.skipped_ids, vec![3, 4]);
    assert!(result.quota_exhausted);
    assert_eq!(result.usage_after.status, QuotaStatus::Exhausted);
    assert_eq!(w.provider.called_ids(), vec![1, 2]);

    // Nothing more goes out until the day turns.
    let again = w.dispatcher.run().await.unwrap();
    assert!(again.updated_ids.is_empty());
    assert_eq!(w.provider.called_ids().len(), 2);
}

#[tokio::test]
async fn test_day_rollover_restores_full_budget() {
    let (w, _) = memory_world(&[1]).await;
    spend(&w.ledger, 100).await;
    assert_eq!(w.ledger.remaining().await, 0);

    w.clock.set(Utc.with_ymd_and_hms(2026, 5, 3, 0, 0, 1).unwrap());
    assert_eq!(w.ledger.remaining().await, 100);

    let result = w.dispatcher.run().await.unwrap();
    assert_eq!(result.updated_ids, vec![1]);
    assert_eq!(result.remaining_quota_after, 99);

    let history = w.ledger.historical_usage(2).await;
    assert_eq!(history[0].used, 1);
    assert_eq!(history[1].used, 100);
    assert_eq!(history[1].status, QuotaStatus::Exhausted);
}

#[tokio::test]
async fn test_recently_finished_and_idle_levels() {
    let (w, store) = memory_world(&[7, 8]).await;
    let now = start();
    store
        .upsert_fixtures(&[
            fixture(71, 7, FixtureStatus::Finished, now - Duration::minutes(100)),
            fixture(72, 7, FixtureStatus::Finished, now - Duration::minutes(150)),
            fixture(81, 8, FixtureStatus::Finished, now - Duration::days(3)),
        ])
        .await
        .unwrap();

    let priorities = w.engine.compute_priorities().await.unwrap();
    assert_eq!(priorities[0].competition_id, 7);
    assert_eq!(priorities[0].priority_level, 2);
    assert!(priorities[0].reason.contains("recently finished"));
    assert_eq!(priorities[1].competition_id, 8);
    assert_eq!(priorities[1].priority_level, 1);
}

#[tokio::test]
async fn test_provider_failure_skips_one_competition_only() {
    let (w, store) = memory_world(&[1, 2, 3]).await;
    w.provider.fail_competition(2);

    let result = w.dispatcher.run().await.unwrap();
    assert_eq!(result.updated_ids, vec![1, 3]);
    assert_eq!(result.skipped_ids, vec![2]);
    assert!(!result.quota_exhausted);

    let entries = store.entries();
    assert_eq!(entries.len(), 3);
    let failed = entries.iter().find(|e| !e.success).unwrap();
    assert_eq!(failed.competition_id, Some(2));
    assert_eq!(failed.status_code, Some(500));

    let usage = w.ledger.competition_usage().await;
    let two = usage.iter().find(|u| u.competition_id == 2).unwrap();
    assert!(two.success_rate.abs() < 1e-9);
}

#[tokio::test]
async fn test_provider_reported_errors_count_against_quota() {
    let (w, _) = memory_world(&[1, 2]).await;
    w.provider.set_error(SchedulerError::ProviderReported {
        endpoint: "/fixtures".into(),
        status: 200,
        errors: r#"{"requests":"You have reached the request limit for the day"}"#.into(),
    });

    let result = w.dispatcher.run().await.unwrap();
    assert!(result.updated_ids.is_empty());
    assert_eq!(result.total_requests_used, 2);
    assert_eq!(w.ledger.used_today().await, 2);
    assert!(result.skipped[0].reason.contains("request limit"));

    w.provider.clear_error();
    let result = w.dispatcher.run().await.unwrap();
    assert_eq!(result.updated_ids, vec![1, 2]);
}

#[tokio::test]
async fn test_refreshed_fixtures_change_next_priorities() {
    let (w, _) = memory_world(&[39]).await;
    let now = start();
    w.provider
        .set_fixtures(39, vec![fixture(500, 39, FixtureStatus::InPlay, now - Duration::minutes(10))]);

    w.dispatcher.run().await.unwrap();
    assert!(w.advisor.should_update_now().await.unwrap());
    assert_eq!(w.advisor.recommend_interval().await.unwrap().minutes, 5);

    // Two hours later the match is over.
    w.clock.advance(Duration::hours(2));
    w.provider
        .set_fixtures(39, vec![fixture(500, 39, FixtureStatus::Finished, now - Duration::minutes(10))]);
    w.dispatcher.run().await.unwrap();

    let priorities = w.engine.compute_priorities().await.unwrap();
    assert_eq!(priorities[0].priority_level, 2);
    assert!(!w.advisor.should_update_now().await.unwrap());
    assert_eq!(w.advisor.recommend_interval().await.unwrap().minutes, 240);
}

#[tokio::test]
async fn test_bootstrap_import_then_run() {
    let store = Arc::new(MemoryStore::new());
    let provider = MockProvider::with_competitions(vec![competition(39), competition(61), competition(2)]);
    provider.set_fixtures(
        61,
        vec![fixture(900, 61, FixtureStatus::Scheduled, start() + Duration::hours(1))],
    );
    let w = world(StoreHandles::from_backend(store.clone()), provider);

    let stored = w.refresher.import_competitions(&w.ledger, &[39, 61]).await.unwrap();
    assert_eq!(stored, 2);
    w.refresher.import_fixtures(&w.ledger, 61).await.unwrap();
    assert_eq!(w.ledger.used_today().await, 2);

    let report = w.dispatcher.schedule_report().await.unwrap();
    assert_eq!(report.active_competitions, 2);
    assert_eq!(report.priorities[0].competition_id, 61);
    assert_eq!(report.priorities[0].priority_level, 4);
    assert_eq!(report.recommendation.minutes, 15);
    assert_eq!(report.quota_status.used, 2);
}

#[tokio::test]
async fn test_sqlite_backend_end_to_end() {
    let sqlite = Arc::new(SqliteStore::in_memory().await.unwrap());
    sqlite
        .upsert_competitions(&[competition(39), competition(140)])
        .await
        .unwrap();
    let provider = MockProvider::new();
    provider.set_fixtures(
        140,
        vec![fixture(1, 140, FixtureStatus::InPlay, start() - Duration::minutes(30))],
    );
    let w = world(StoreHandles::from_backend(sqlite), provider);

    let first = w.dispatcher.run().await.unwrap();
    assert_eq!(first.updated_ids, vec![39, 140]);

    // The live fixture is now stored, so it leads the next run.
    let second = w.dispatcher.run().await.unwrap();
    assert_eq!(second.updated_ids, vec![140, 39]);
    assert_eq!(second.remaining_quota_after, 96);
    assert_eq!(w.ledger.used_today().await, 4);

    let stats = w.ledger.usage_stats().await;
    assert_eq!(stats, w.ledger.usage_stats().await);
    assert!(stats.first_request_at.is_some());
}
