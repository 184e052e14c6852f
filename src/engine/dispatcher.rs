//! Dispatcher: one quota-aware refresh run.
//!
//! Walks competitions in priority order and refreshes each one while the
//! daily budget allows. Every attempted provider call is written to the
//! ledger, success or not. Once the budget runs out, the rest of the list
//! is skipped; a single failing competition never aborts the run.
//!
//! Runs never overlap: a second caller gets `RunInProgress`. A run also
//! stops early on its deadline or on an external cancellation signal and
//! returns what it has done so far; competitions it did not reach are
//! reported as skipped with the reason.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::advisor::IntervalAdvisor;
use super::ledger::QuotaLedger;
use super::priority::PriorityEngine;
use super::refresher::{CompetitionRefresher, RefreshOutcome};
use crate::config::DispatcherSection;
use crate::types::{
    CompetitionPriority, RequestRecord, ScheduleReport, SchedulerError, SchedulerRunResult,
    SkippedCompetition,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound for a single provider call.
    pub fetch_timeout: Duration,
    /// Upper bound for a whole run.
    pub run_deadline: Duration,
    /// Pause between two competitions.
    pub delay_between_calls: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(15),
            run_deadline: Duration::from_secs(120),
            delay_between_calls: Duration::ZERO,
        }
    }
}

impl From<&DispatcherSection> for DispatcherConfig {
    fn from(s: &DispatcherSection) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(s.fetch_timeout_secs),
            run_deadline: Duration::from_secs(s.run_deadline_secs),
            delay_between_calls: Duration::from_millis(s.delay_between_calls_ms),
        }
    }
}

const RUN_CANCELLED: &str = "run cancelled";
const RUN_DEADLINE: &str = "run deadline reached";

/// How a single provider call ended.
enum CallEnd {
    Done(Result<RefreshOutcome, SchedulerError>),
    Interrupted(&'static str),
}

/// Whether the run goes on after a competition.
enum Step {
    Next,
    Stop(&'static str),
}

/// Running totals for one run.
#[derive(Debug, Default)]
struct RunTally {
    updated_ids: Vec<i64>,
    skipped: Vec<SkippedCompetition>,
    quota_exhausted: bool,
    cancelled: bool,
    requests_used: u32,
}

impl RunTally {
    fn skip(&mut self, competition_id: i64, reason: impl Into<String>) {
        self.skipped.push(SkippedCompetition {
            competition_id,
            reason: reason.into(),
        });
    }
}

/// Resolves once the signal reads `true`. Never resolves if every sender
/// is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    ledger: Arc<QuotaLedger>,
    engine: Arc<PriorityEngine>,
    advisor: Arc<IntervalAdvisor>,
    refresher: Arc<dyn CompetitionRefresher>,
    config: DispatcherConfig,
    run_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        ledger: Arc<QuotaLedger>,
        engine: Arc<PriorityEngine>,
        advisor: Arc<IntervalAdvisor>,
        refresher: Arc<dyn CompetitionRefresher>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            ledger,
            engine,
            advisor,
            refresher,
            config,
            run_lock: Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// One full run with no external cancellation.
    pub async fn run(&self) -> Result<SchedulerRunResult, SchedulerError> {
        let (_keep_open, rx) = watch::channel(false);
        self.run_with_cancel(rx).await
    }

    /// One full run that stops early once `cancel` reads `true`.
    pub async fn run_with_cancel(
        &self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<SchedulerRunResult, SchedulerError> {
        let _guard = self.run_lock.try_lock().map_err(|_| {
            warn!("Run requested while another run is in progress");
            SchedulerError::RunInProgress
        })?;

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id);
        self.execute(run_id, &mut cancel).instrument(span).await
    }

    async fn execute(
        &self,
        run_id: String,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<SchedulerRunResult, SchedulerError> {
        let started = Instant::now();
        let deadline = started + self.config.run_deadline;

        let usage_before = self.ledger.usage_stats().await;
        let priorities = self.engine.compute_priorities().await?;
        info!(
            competitions = priorities.len(),
            used = usage_before.used,
            remaining = usage_before.remaining,
            status = %usage_before.status,
            "Scheduled update starting"
        );

        let mut tally = RunTally::default();
        let mut stopped: Option<(usize, &'static str)> = None;
        for (idx, item) in priorities.iter().enumerate() {
            if *cancel.borrow() {
                stopped = Some((idx, RUN_CANCELLED));
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                stopped = Some((idx, RUN_DEADLINE));
                break;
            }

            if !self.ledger.can_proceed(item.estimated_cost).await {
                let remaining = self.ledger.remaining().await;
                tally.quota_exhausted = true;
                for rest in &priorities[idx..] {
                    tally.skip(
                        rest.competition_id,
                        format!(
                            "quota insufficient: need {}, remaining {}",
                            rest.estimated_cost, remaining
                        ),
                    );
                }
                warn!(
                    skipped = priorities.len() - idx,
                    remaining, "Quota exhausted; skipping remaining competitions"
                );
                break;
            }

            let time_left = deadline.saturating_duration_since(now);
            if let Step::Stop(reason) = self.refresh_one(item, time_left, cancel, &mut tally).await {
                stopped = Some((idx + 1, reason));
                break;
            }

            if !self.config.delay_between_calls.is_zero() && idx + 1 < priorities.len() {
                let interrupted = tokio::select! {
                    _ = tokio::time::sleep(self.config.delay_between_calls) => false,
                    _ = cancelled(cancel) => true,
                };
                if interrupted {
                    stopped = Some((idx + 1, RUN_CANCELLED));
                    break;
                }
            }
        }

        if let Some((from, reason)) = stopped {
            tally.cancelled = true;
            for rest in &priorities[from..] {
                tally.skip(rest.competition_id, reason);
            }
            if reason == RUN_DEADLINE {
                warn!(
                    unprocessed = priorities.len() - from,
                    deadline_secs = self.config.run_deadline.as_secs(),
                    "Run deadline reached"
                );
            } else {
                info!(unprocessed = priorities.len() - from, "Run cancelled");
            }
        }

        let usage_after = self.ledger.usage_stats().await;
        let result = SchedulerRunResult {
            run_id,
            skipped_ids: tally.skipped.iter().map(|s| s.competition_id).collect(),
            updated_ids: tally.updated_ids,
            skipped: tally.skipped,
            quota_exhausted: tally.quota_exhausted,
            cancelled: tally.cancelled,
            total_requests_used: tally.requests_used,
            remaining_quota_after: usage_after.remaining,
            usage_before,
            usage_after,
            execution_duration: started.elapsed(),
        };

        info!(
            updated = result.updated_ids.len(),
            skipped = result.skipped_ids.len(),
            requests = result.total_requests_used,
            remaining = result.remaining_quota_after,
            cancelled = result.cancelled,
            duration_ms = result.execution_duration.as_millis() as u64,
            "Scheduled update finished"
        );
        if result.quota_exhausted {
            warn!(status = %result.usage_after.status, "Daily quota exhausted during run");
        }
        Ok(result)
    }

    /// Refresh one competition and log the attempt, charged at the
    /// competition's estimated cost. The call gets `fetch_timeout` or what
    /// is left of the run, whichever is shorter.
    async fn refresh_one(
        &self,
        item: &CompetitionPriority,
        time_left: Duration,
        cancel: &mut watch::Receiver<bool>,
        tally: &mut RunTally,
    ) -> Step {
        let endpoint = self.refresher.endpoint();
        let limit = self.config.fetch_timeout.min(time_left);
        let cut_by_deadline = time_left < self.config.fetch_timeout;
        let call_started = Instant::now();
        let outcome = tokio::select! {
            res = tokio::time::timeout(limit, self.refresher.refresh(item)) => match res {
                Ok(done) => CallEnd::Done(done),
                Err(_) if cut_by_deadline => CallEnd::Interrupted(RUN_DEADLINE),
                Err(_) => CallEnd::Done(Err(SchedulerError::Timeout {
                    endpoint: endpoint.clone(),
                    after_ms: limit.as_millis() as u64,
                })),
            },
            _ = cancelled(cancel) => CallEnd::Interrupted(RUN_CANCELLED),
        };
        let elapsed_ms = call_started.elapsed().as_millis() as u64;
        let id = item.competition_id;
        let cost = item.estimated_cost;

        match outcome {
            CallEnd::Done(Ok(done)) => {
                self.ledger
                    .record_request(
                        RequestRecord::success(&endpoint, Some(id))
                            .with_status(done.status_code)
                            .with_response_time(elapsed_ms)
                            .with_units(cost),
                    )
                    .await;
                tally.requests_used += cost;
                tally.updated_ids.push(id);
                info!(
                    competition_id = id,
                    level = item.priority_level,
                    fixtures = done.fixtures_updated,
                    elapsed_ms,
                    "Competition updated"
                );
                Step::Next
            }
            CallEnd::Done(Err(e @ SchedulerError::QuotaExhausted { .. })) => {
                // Rejected before reaching the provider: nothing was spent.
                debug!(competition_id = id, error = %e, "Refresh rejected for quota");
                tally.quota_exhausted = true;
                tally.skip(id, e.to_string());
                Step::Next
            }
            CallEnd::Done(Err(e)) => {
                self.ledger
                    .record_request(
                        RequestRecord::failure(&endpoint, Some(id), e.to_string())
                            .with_status(e.status_code())
                            .with_response_time(elapsed_ms)
                            .with_units(cost),
                    )
                    .await;
                tally.requests_used += cost;
                warn!(
                    competition_id = id,
                    kind = e.kind(),
                    error = %e,
                    "Competition refresh failed"
                );
                tally.skip(id, e.to_string());
                Step::Next
            }
            CallEnd::Interrupted(reason) => {
                let message = format!("{reason} during provider call");
                self.ledger
                    .record_request(
                        RequestRecord::failure(&endpoint, Some(id), message.clone())
                            .with_response_time(elapsed_ms)
                            .with_units(cost),
                    )
                    .await;
                tally.requests_used += cost;
                info!(competition_id = id, elapsed_ms, "Provider call interrupted: {message}");
                tally.skip(id, message);
                Step::Stop(reason)
            }
        }
    }

    /// Read-only picture of what the scheduler would do next.
    pub async fn schedule_report(&self) -> Result<ScheduleReport, SchedulerError> {
        let (total_competitions, active_competitions) = self.engine.competition_counts().await?;
        let priorities = self.engine.compute_priorities().await?;
        let quota_status = self.ledger.usage_stats().await;
        let recommendation = self.advisor.next_update_from(&priorities);
        Ok(ScheduleReport {
            total_competitions,
            active_competitions,
            priorities,
            quota_status,
            recommendation,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
