//! Shared types for the MATCHDAY scheduler.
//!
//! These types form the data model used across the ledger, the priority
//! engine, the dispatcher and the status API. They carry no behaviour
//! beyond formatting and small derivations so every module can depend on
//! them without circular references.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Competitions & fixtures
// ---------------------------------------------------------------------------

/// A tracked league or cup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competition {
    pub id: i64,
    pub name: String,
    /// Season year the provider expects for fixture queries.
    pub season: i32,
    pub is_active: bool,
}

/// Normalised match status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixtureStatus {
    Scheduled,
    InPlay,
    Paused,
    Finished,
    Suspended,
    Postponed,
    Cancelled,
}

impl FixtureStatus {
    /// Map an API-Football short status code. Unknown codes are treated
    /// as not yet started.
    pub fn from_provider_code(code: &str) -> Self {
        match code {
            "TBD" | "NS" => Self::Scheduled,
            "1H" | "2H" | "ET" | "P" | "LIVE" => Self::InPlay,
            "HT" | "BT" => Self::Paused,
            "FT" | "AET" | "PEN" | "AWD" | "WO" => Self::Finished,
            "SUSP" | "INT" => Self::Suspended,
            "PST" => Self::Postponed,
            "CANC" | "ABD" => Self::Cancelled,
            _ => Self::Scheduled,
        }
    }

    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::InPlay => "IN_PLAY",
            Self::Paused => "PAUSED",
            Self::Finished => "FINISHED",
            Self::Suspended => "SUSPENDED",
            Self::Postponed => "POSTPONED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "SCHEDULED" => Self::Scheduled,
            "IN_PLAY" => Self::InPlay,
            "PAUSED" => Self::Paused,
            "FINISHED" => Self::Finished,
            "SUSPENDED" => Self::Suspended,
            "POSTPONED" => Self::Postponed,
            "CANCELLED" => Self::Cancelled,
            _ => return None,
        })
    }

    /// In progress, including half-time and extra-time breaks.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::InPlay | Self::Paused)
    }
}

impl fmt::Display for FixtureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One match as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub id: i64,
    pub competition_id: i64,
    pub kickoff: DateTime<Utc>,
    pub status: FixtureStatus,
    pub round: Option<String>,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
}

/// The slice of fixture state the priority engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixtureState {
    pub status: FixtureStatus,
    pub kickoff: DateTime<Utc>,
}

impl From<&Fixture> for FixtureState {
    fn from(f: &Fixture) -> Self {
        Self {
            status: f.status,
            kickoff: f.kickoff,
        }
    }
}

/// An active competition together with its relevant fixtures.
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitionSnapshot {
    pub competition: Competition,
    pub fixtures: Vec<FixtureState>,
}

// ---------------------------------------------------------------------------
// Request log
// ---------------------------------------------------------------------------

/// A provider call about to be written to the ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestRecord {
    pub endpoint: String,
    pub competition_id: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    /// Budget units the call consumed. Zero is read as one.
    pub units: u32,
}

impl RequestRecord {
    pub fn success(endpoint: impl Into<String>, competition_id: Option<i64>) -> Self {
        Self {
            endpoint: endpoint.into(),
            competition_id,
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(
        endpoint: impl Into<String>,
        competition_id: Option<i64>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            competition_id,
            success: false,
            error_message: Some(error_message.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_response_time(mut self, ms: u64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    pub fn with_units(mut self, units: u32) -> Self {
        self.units = units;
        self
    }
}

/// An immutable ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
    pub endpoint: String,
    pub method: String,
    pub competition_id: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub units: u32,
}

impl RequestLogEntry {
    pub fn stamp(record: RequestRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            date: timestamp.date_naive(),
            endpoint: record.endpoint,
            method: "GET".to_string(),
            competition_id: record.competition_id,
            success: record.success,
            error_message: record.error_message,
            status_code: record.status_code,
            response_time_ms: record.response_time_ms,
            units: record.units.max(1),
        }
    }
}

/// Per-day aggregate returned by the log store.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub used: u32,
}

/// Extra detail for today's usage, when the store can provide it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayDetail {
    pub first_request_at: Option<DateTime<Utc>>,
    pub last_request_at: Option<DateTime<Utc>>,
    pub avg_response_time_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// Quota
// ---------------------------------------------------------------------------

/// Daily budget risk status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaStatus {
    Normal,
    Warning,
    Critical,
    Exhausted,
}

impl fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
            Self::Exhausted => write!(f, "EXHAUSTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub percentage_used: f64,
    pub status: QuotaStatus,
    /// End of the current UTC quota window.
    pub resets_at: DateTime<Utc>,
    pub first_request_at: Option<DateTime<Utc>>,
    pub last_request_at: Option<DateTime<Utc>>,
    pub avg_response_time_ms: Option<f64>,
}

impl fmt::Display for UsageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} used, {} remaining ({:.0}%, {})",
            self.used, self.limit, self.remaining, self.percentage_used, self.status
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub used: u32,
    pub remaining: u32,
    pub percentage_used: f64,
    pub status: QuotaStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompetitionUsage {
    pub competition_id: i64,
    pub request_count: u32,
    /// Percentage of successful calls (0–100).
    pub success_rate: f64,
}

/// Kind of provider call, for cost estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Full fixture import for a competition season.
    Import,
    /// Score refresh for a competition.
    Sync,
    /// Competition listing.
    List,
}

// ---------------------------------------------------------------------------
// Priorities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompetitionPriority {
    pub competition_id: i64,
    pub name: String,
    /// 1 (idle) to 5 (live).
    pub priority_level: u8,
    pub reason: String,
    pub estimated_cost: u32,
    pub live_match_count: u32,
    pub upcoming_match_count: u32,
}

impl fmt::Display for CompetitionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[P{}] {} (#{}): {}",
            self.priority_level, self.name, self.competition_id, self.reason
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntervalRecommendation {
    pub minutes: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextUpdate {
    pub next_update: DateTime<Utc>,
    pub minutes: u32,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedCompetition {
    pub competition_id: i64,
    pub reason: String,
}

/// Summary of one dispatcher run.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerRunResult {
    pub run_id: String,
    pub updated_ids: Vec<i64>,
    pub skipped_ids: Vec<i64>,
    pub skipped: Vec<SkippedCompetition>,
    pub quota_exhausted: bool,
    pub cancelled: bool,
    pub total_requests_used: u32,
    pub remaining_quota_after: u32,
    pub usage_before: UsageStats,
    pub usage_after: UsageStats,
    #[serde(with = "duration_ms")]
    pub execution_duration: Duration,
}

impl fmt::Display for SchedulerRunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "updated={} skipped={} requests={} remaining={} exhausted={} ({:.2}s)",
            self.updated_ids.len(),
            self.skipped_ids.len(),
            self.total_requests_used,
            self.remaining_quota_after,
            self.quota_exhausted,
            self.execution_duration.as_secs_f64(),
        )
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Read-only snapshot for dashboards and alerting.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleReport {
    pub total_competitions: u32,
    pub active_competitions: u32,
    pub priorities: Vec<CompetitionPriority>,
    pub quota_status: UsageStats,
    pub recommendation: NextUpdate,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for MATCHDAY.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    #[error("Quota exhausted: need {required}, have {remaining}")]
    QuotaExhausted { required: u32, remaining: u32 },

    #[error("Provider transport error on {endpoint} (status {status:?}): {message}")]
    Transport {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Provider call to {endpoint} timed out after {after_ms}ms")]
    Timeout { endpoint: String, after_ms: u64 },

    #[error("Provider reported errors on {endpoint}: {errors}")]
    ProviderReported {
        endpoint: String,
        status: u16,
        errors: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A scheduler run is already in progress")]
    RunInProgress,
}

impl SchedulerError {
    /// HTTP status attached to a provider failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            Self::ProviderReported { status, .. } => Some(*status),
            Self::QuotaExhausted { .. } => Some(429),
            _ => None,
        }
    }

    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::ProviderReported { .. } => "provider_reported",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::RunInProgress => "run_in_progress",
        }
    }
}

impl From<sqlx::Error> for SchedulerError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
