//! Quota ledger: daily call budget accounting.
//!
//! Every provider call attempt is appended to the log store, stamped with
//! the UTC day it happened on and weighted by its operation cost. "Used
//! today" is the sum of today's units, so the budget resets implicitly at
//! midnight UTC without any job.
//!
//! The ledger never fails its callers. Store write failures are counted
//! and logged; reads that fail fall back to the last known in-memory count
//! for the current day.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::clock::{day_end, Clock};
use crate::storage::LogStore;
use crate::types::{
    CompetitionUsage, DailyUsage, DayDetail, Operation, QuotaStatus, RequestLogEntry,
    RequestRecord, SchedulerError, UsageStats,
};

/// Tracing target for rejected attempts. Kept apart from the ledger so a
/// rejection never consumes a quota slot.
pub const REJECTION_TARGET: &str = "matchday::quota::rejections";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Calls allowed per UTC day.
    pub daily_limit: u32,
    /// Remaining calls at or below which status becomes WARNING.
    pub warning_threshold: u32,
    /// Remaining calls at or below which status becomes CRITICAL.
    pub critical_threshold: u32,
    /// Log rows this many days old or older are pruned.
    pub retention_days: u32,
    /// Per-operation cost overrides. Missing operations cost 1.
    pub operation_costs: HashMap<Operation, u32>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 100,
            warning_threshold: 40,
            critical_threshold: 20,
            retention_days: 30,
            operation_costs: HashMap::new(),
        }
    }
}

impl QuotaConfig {
    /// Classify a remaining budget. Exactly one status for every value.
    pub fn status_for(&self, remaining: u32) -> QuotaStatus {
        if remaining == 0 {
            QuotaStatus::Exhausted
        } else if remaining <= self.critical_threshold {
            QuotaStatus::Critical
        } else if remaining <= self.warning_threshold {
            QuotaStatus::Warning
        } else {
            QuotaStatus::Normal
        }
    }

    fn percentage(&self, used: u32) -> f64 {
        if self.daily_limit == 0 {
            return 100.0;
        }
        (used.min(self.daily_limit) as f64 / self.daily_limit as f64) * 100.0
    }
}

/// Store error counters, for dashboards and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerHealth {
    pub write_failures: u64,
    pub read_failures: u64,
}

/// Last count the ledger knows for a day, including writes the store lost.
#[derive(Debug)]
struct DayCache {
    date: Option<NaiveDate>,
    used: u32,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct QuotaLedger {
    store: Arc<dyn LogStore>,
    clock: Arc<dyn Clock>,
    config: QuotaConfig,
    cache: Mutex<DayCache>,
    write_failures: AtomicU64,
    read_failures: AtomicU64,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn LogStore>, clock: Arc<dyn Clock>, config: QuotaConfig) -> Self {
        Self {
            store,
            clock,
            config,
            cache: Mutex::new(DayCache { date: None, used: 0 }),
            write_failures: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
        }
    }

    /// Append one call attempt to today's ledger. Always allowed, even on a
    /// full quota; a failed write is reported and absorbed. The entry
    /// consumes `record.units` of budget.
    pub async fn record_request(&self, record: RequestRecord) {
        let entry = RequestLogEntry::stamp(record, self.clock.now());
        self.bump_cache(entry.date, entry.units);

        if let Err(e) = self.store.insert(&entry).await {
            let failures = self.write_failures.fetch_add(1, Ordering::Relaxed) + 1;
            error!(
                endpoint = %entry.endpoint,
                competition_id = ?entry.competition_id,
                success = entry.success,
                failures,
                error = %e,
                "Failed to write request log; continuing on in-memory count"
            );
            return;
        }

        debug!(
            endpoint = %entry.endpoint,
            competition_id = ?entry.competition_id,
            success = entry.success,
            status_code = ?entry.status_code,
            units = entry.units,
            "Request logged"
        );
    }

    /// Budget units spent today (UTC).
    pub async fn used_today(&self) -> u32 {
        let today = self.clock.today();
        match self.store.count_for_date(today).await {
            Ok(stored) => {
                let mut cache = self.lock_cache();
                let known = if cache.date == Some(today) { cache.used } else { 0 };
                // Lost writes still happened upstream; never count below them.
                let used = stored.max(known);
                cache.date = Some(today);
                cache.used = used;
                used
            }
            Err(e) => {
                self.read_failures.fetch_add(1, Ordering::Relaxed);
                let cache = self.lock_cache();
                let fallback = if cache.date == Some(today) { cache.used } else { 0 };
                error!(error = %e, fallback, "Failed to count today's requests; using last known count");
                fallback
            }
        }
    }

    pub async fn remaining(&self) -> u32 {
        self.config.daily_limit.saturating_sub(self.used_today().await)
    }

    pub async fn can_proceed(&self, cost: u32) -> bool {
        self.remaining().await >= cost
    }

    /// Check budget for an ad-hoc call. Rejections go to the rejection
    /// stream only, not to the ledger. Returns the remaining budget.
    pub async fn ensure_budget(&self, operation: Operation) -> Result<u32, SchedulerError> {
        let cost = self.estimate_operation_cost(operation);
        let remaining = self.remaining().await;
        if remaining < cost {
            warn!(
                target: REJECTION_TARGET,
                operation = ?operation,
                required = cost,
                remaining,
                "Call rejected: insufficient quota"
            );
            return Err(SchedulerError::QuotaExhausted { required: cost, remaining });
        }
        Ok(remaining)
    }

    pub fn estimate_operation_cost(&self, operation: Operation) -> u32 {
        self.config.operation_costs.get(&operation).copied().unwrap_or(1)
    }

    pub async fn usage_stats(&self) -> UsageStats {
        let today = self.clock.today();
        let used = self.used_today().await;
        let remaining = self.config.daily_limit.saturating_sub(used);
        let detail = match self.store.day_detail(today).await {
            Ok(d) => d,
            Err(e) => {
                self.read_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to load usage detail");
                DayDetail::default()
            }
        };

        UsageStats {
            limit: self.config.daily_limit,
            used,
            remaining,
            percentage_used: self.config.percentage(used),
            status: self.config.status_for(remaining),
            resets_at: day_end(today),
            first_request_at: detail.first_request_at,
            last_request_at: detail.last_request_at,
            avg_response_time_ms: detail.avg_response_time_ms,
        }
    }

    /// Usage for the last `days` UTC days including today, most recent
    /// first. Days without calls appear with zero usage.
    pub async fn historical_usage(&self, days: u32) -> Vec<DailyUsage> {
        if days == 0 {
            return Vec::new();
        }
        let today = self.clock.today();
        let since = today - Duration::days(i64::from(days) - 1);

        let mut counts: HashMap<NaiveDate, u32> = match self.store.aggregate_by_date(since).await {
            Ok(rows) => rows.into_iter().map(|r| (r.date, r.used)).collect(),
            Err(e) => {
                self.read_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, days, "Failed to load usage history");
                return Vec::new();
            }
        };
        // Today includes writes the store lost.
        counts.insert(today, self.used_today().await);

        (0..i64::from(days))
            .map(|offset| {
                let date = today - Duration::days(offset);
                let used = counts.get(&date).copied().unwrap_or(0);
                let remaining = self.config.daily_limit.saturating_sub(used);
                DailyUsage {
                    date,
                    used,
                    remaining,
                    percentage_used: self.config.percentage(used),
                    status: self.config.status_for(remaining),
                }
            })
            .collect()
    }

    /// Today's calls grouped by competition.
    pub async fn competition_usage(&self) -> Vec<CompetitionUsage> {
        match self.store.competition_usage(self.clock.today()).await {
            Ok(rows) => rows,
            Err(e) => {
                self.read_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Failed to load per-competition usage");
                Vec::new()
            }
        }
    }

    /// Prune with the configured retention.
    pub async fn prune_expired(&self) -> u64 {
        self.prune_older_than(self.config.retention_days).await
    }

    /// Delete log rows `days` or more days old. Returns rows deleted.
    pub async fn prune_older_than(&self, days: u32) -> u64 {
        let cutoff = self.clock.today() - Duration::days(i64::from(days.max(1)) - 1);
        match self.store.delete_older_than(cutoff).await {
            Ok(deleted) => {
                info!(deleted, cutoff = %cutoff, "Pruned request logs");
                deleted
            }
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, cutoff = %cutoff, "Failed to prune request logs");
                0
            }
        }
    }

    pub fn health(&self) -> LedgerHealth {
        LedgerHealth {
            write_failures: self.write_failures.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
        }
    }

    fn bump_cache(&self, date: NaiveDate, units: u32) {
        let mut cache = self.lock_cache();
        if cache.date == Some(date) {
            cache.used = cache.used.saturating_add(units);
        } else {
            cache.date = Some(date);
            cache.used = units;
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, DayCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
