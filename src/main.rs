//! MATCHDAY: quota-aware fixture refresh scheduler
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store, imports tracked competitions on first start, and runs
//! the adaptive refresh loop with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use matchday::clock::{Clock, SystemClock};
use matchday::config::AppConfig;
use matchday::dashboard::{self, DashboardState};
use matchday::engine::advisor::IntervalConfig;
use matchday::engine::dispatcher::DispatcherConfig;
use matchday::engine::ledger::QuotaConfig;
use matchday::engine::priority::PriorityConfig;
use matchday::engine::{Dispatcher, IntervalAdvisor, PriorityEngine, ProviderRefresher, QuotaLedger};
use matchday::provider::ApiFootballClient;
use matchday::storage::StoreHandles;
use matchday::types::SchedulerRunResult;

const BANNER: &str = r#"
 __  __    _  _____ ____ _   _ ____    _ __   __
|  \/  |  / \|_   _/ ___| | | |  _ \  / \\ \ / /
| |\/| | / _ \ | || |   | |_| | | | |/ _ \\ V /
| |  | |/ ___ \| || |___|  _  | |_| / ___ \| |
|_|  |_/_/   \_\_| \____|_| |_|____/_/   \_\_|

  Quota-aware fixture refresh scheduler
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("MATCHDAY_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        daily_limit = cfg.quota.daily_limit,
        season = cfg.provider.season,
        tracked = cfg.provider.tracked_competitions.len(),
        "MATCHDAY starting up"
    );

    // -- Initialise components -------------------------------------------

    let stores = StoreHandles::open(&cfg.storage.database_url).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ledger = Arc::new(QuotaLedger::new(
        stores.log.clone(),
        clock.clone(),
        QuotaConfig {
            daily_limit: cfg.quota.daily_limit,
            warning_threshold: cfg.quota.warning_threshold,
            critical_threshold: cfg.quota.critical_threshold,
            retention_days: cfg.quota.retention_days,
            operation_costs: cfg.quota.operation_costs.clone(),
        },
    ));
    let engine = Arc::new(PriorityEngine::new(
        stores.source.clone(),
        clock.clone(),
        ledger.clone(),
        PriorityConfig::from(&cfg.priority),
    ));
    let advisor = Arc::new(IntervalAdvisor::new(
        engine.clone(),
        clock.clone(),
        IntervalConfig::from(&cfg.intervals),
    ));

    let dispatcher_config = DispatcherConfig::from(&cfg.dispatcher);
    let api_key = AppConfig::resolve_secret(&cfg.provider.api_key_env)?;
    let provider = Arc::new(ApiFootballClient::new(
        cfg.provider.base_url.clone(),
        api_key,
        cfg.provider.rapidapi_host.clone(),
        dispatcher_config.fetch_timeout,
    )?);
    let refresher = Arc::new(ProviderRefresher::new(
        provider,
        stores.sink.clone(),
        clock.clone(),
        cfg.provider.season,
        cfg.provider.refresh_window_days,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        ledger.clone(),
        engine.clone(),
        advisor.clone(),
        refresher.clone(),
        dispatcher_config,
    ));

    // -- First start: import tracked competitions -------------------------

    let (total, _) = engine.competition_counts().await?;
    if total == 0 && !cfg.provider.tracked_competitions.is_empty() {
        bootstrap(&refresher, &ledger, &cfg.provider.tracked_competitions).await;
    }

    // -- Status API ------------------------------------------------------

    let state = Arc::new(DashboardState::new(ledger.clone(), dispatcher.clone(), advisor.clone()));
    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(state.clone(), cfg.dashboard.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received.");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for Ctrl+C");
                // Keep the sender alive so the loop does not read it as shutdown.
                std::future::pending::<()>().await;
            }
        }
    });

    let poll = Duration::from_secs(u64::from(cfg.service.urgency_poll_minutes) * 60);
    let mut next_run = Instant::now();
    let mut last_prune = None;

    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        let wake = next_run.min(Instant::now() + poll);
        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            _ = shutdown_rx.changed() => break,
        }
        if *shutdown_rx.borrow() {
            break;
        }

        if Instant::now() < next_run {
            match advisor.should_update_now().await {
                Ok(true) => info!("Urgent competitions detected; running early"),
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, "Urgency check failed");
                    continue;
                }
            }
        }

        let today = clock.today();
        if last_prune != Some(today) {
            ledger.prune_expired().await;
            last_prune = Some(today);
        }

        match dispatcher.run_with_cancel(shutdown_rx.clone()).await {
            Ok(result) => {
                log_run_report(&result);
                state.record_run(result).await;
            }
            Err(e) => error!(error = %e, kind = e.kind(), "Run failed; continuing to next"),
        }

        let minutes = match advisor.next_update_time().await {
            Ok(next) => {
                info!(minutes = next.minutes, reason = %next.reason, next_update = %next.next_update, "Next update scheduled");
                next.minutes
            }
            Err(e) => {
                let fallback = advisor.fallback_minutes();
                warn!(error = %e, minutes = fallback, "Could not compute next interval; using fallback");
                fallback
            }
        };
        next_run = Instant::now() + Duration::from_secs(u64::from(minutes) * 60);
    }

    let usage = ledger.usage_stats().await;
    info!(
        used = usage.used,
        remaining = usage.remaining,
        status = %usage.status,
        write_failures = ledger.health().write_failures,
        "MATCHDAY shut down cleanly."
    );

    Ok(())
}

/// Import tracked competitions and their season fixtures. Failures are
/// logged and do not stop startup.
async fn bootstrap(refresher: &ProviderRefresher, ledger: &QuotaLedger, tracked: &[i64]) {
    match refresher.import_competitions(ledger, tracked).await {
        Ok(stored) => info!(stored, "Bootstrap: competitions imported"),
        Err(e) => {
            error!(error = %e, "Bootstrap: competition import failed");
            return;
        }
    }
    for &competition_id in tracked {
        if let Err(e) = refresher.import_fixtures(ledger, competition_id).await {
            warn!(competition_id, error = %e, "Bootstrap: fixture import failed");
        }
    }
}

fn log_run_report(result: &SchedulerRunResult) {
    info!(
        run_id = %result.run_id,
        updated = result.updated_ids.len(),
        skipped = result.skipped_ids.len(),
        requests = result.total_requests_used,
        remaining = result.remaining_quota_after,
        status = %result.usage_after.status,
        exhausted = result.quota_exhausted,
        cancelled = result.cancelled,
        "Run complete: {result}"
    );
    for skip in &result.skipped {
        info!(competition_id = skip.competition_id, reason = %skip.reason, "Skipped");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("matchday=info"));

    let json_logging = std::env::var("MATCHDAY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
