//! Status API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::ledger::LedgerHealth;
use crate::engine::{Dispatcher, IntervalAdvisor, QuotaLedger};
use crate::types::{
    CompetitionUsage, DailyUsage, IntervalRecommendation, ScheduleReport, SchedulerError,
    SchedulerRunResult, UsageStats,
};

/// Runs kept for `GET /api/runs`.
const RUN_HISTORY: usize = 100;
const MAX_HISTORY_DAYS: u32 = 90;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub ledger: Arc<QuotaLedger>,
    pub dispatcher: Arc<Dispatcher>,
    pub advisor: Arc<IntervalAdvisor>,
    pub runs: RwLock<Vec<SchedulerRunResult>>,
}

impl DashboardState {
    pub fn new(
        ledger: Arc<QuotaLedger>,
        dispatcher: Arc<Dispatcher>,
        advisor: Arc<IntervalAdvisor>,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            advisor,
            runs: RwLock::new(Vec::new()),
        }
    }

    /// Append a finished run, keeping the most recent ones.
    pub async fn record_run(&self, result: SchedulerRunResult) {
        let mut runs = self.runs.write().await;
        runs.push(result);
        let excess = runs.len().saturating_sub(RUN_HISTORY);
        runs.drain(..excess);
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub days: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShouldUpdateResponse {
    pub should_update: bool,
    pub recommendation: IntervalRecommendation,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

/// Maps scheduler errors onto HTTP statuses.
pub struct ApiError(SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SchedulerError::RunInProgress => StatusCode::CONFLICT,
            SchedulerError::QuotaExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            SchedulerError::Config(_) => StatusCode::BAD_REQUEST,
            SchedulerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            SchedulerError::Transport { .. } | SchedulerError::ProviderReported { .. } => {
                StatusCode::BAD_GATEWAY
            }
            SchedulerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind(),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/quota
pub async fn get_quota(State(state): State<AppState>) -> Json<UsageStats> {
    Json(state.ledger.usage_stats().await)
}

/// GET /api/quota/history?days=N
pub async fn get_quota_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<DailyUsage>> {
    let days = params.days.unwrap_or(7).clamp(1, MAX_HISTORY_DAYS);
    Json(state.ledger.historical_usage(days).await)
}

/// GET /api/quota/competitions
pub async fn get_competition_usage(State(state): State<AppState>) -> Json<Vec<CompetitionUsage>> {
    Json(state.ledger.competition_usage().await)
}

/// GET /api/quota/health
pub async fn get_ledger_health(State(state): State<AppState>) -> Json<LedgerHealth> {
    Json(state.ledger.health())
}

/// GET /api/schedule
pub async fn get_schedule(State(state): State<AppState>) -> Result<Json<ScheduleReport>, ApiError> {
    Ok(Json(state.dispatcher.schedule_report().await?))
}

/// GET /api/schedule/should-update
pub async fn get_should_update(
    State(state): State<AppState>,
) -> Result<Json<ShouldUpdateResponse>, ApiError> {
    let recommendation = state.advisor.recommend_interval().await?;
    let should_update = state.advisor.should_update_now().await?;
    Ok(Json(ShouldUpdateResponse {
        should_update,
        recommendation,
    }))
}

/// GET /api/runs
pub async fn get_runs(State(state): State<AppState>) -> Json<Vec<SchedulerRunResult>> {
    let runs = state.runs.read().await;
    Json(runs.iter().rev().cloned().collect())
}

/// POST /api/runs: manual run, refused while another is in progress.
pub async fn trigger_run(State(state): State<AppState>) -> Result<Json<SchedulerRunResult>, ApiError> {
    let result = state.dispatcher.run().await?;
    state.record_run(result.clone()).await;
    Ok(Json(result))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
