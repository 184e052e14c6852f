//! SQLite store.
//!
//! Three tables: `request_logs` (the quota ledger, partitioned by
//! `request_date`), `competitions` and `fixtures`. Dates are stored as
//! `YYYY-MM-DD` text and timestamps as fixed-width RFC 3339 text so that
//! lexical comparison matches chronological order.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{FixtureSink, FixtureSource, LogStore, StoreResult};
use crate::types::{
    Competition, CompetitionSnapshot, CompetitionUsage, DailyCount, DayDetail, Fixture,
    FixtureState, FixtureStatus, RequestLogEntry,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS request_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        request_date TEXT NOT NULL,
        created_at TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        method TEXT NOT NULL DEFAULT 'GET',
        competition_id INTEGER,
        success INTEGER NOT NULL,
        error_message TEXT,
        status_code INTEGER,
        response_time_ms INTEGER,
        units INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_date ON request_logs (request_date)",
    "CREATE TABLE IF NOT EXISTS competitions (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        season INTEGER NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS fixtures (
        id INTEGER PRIMARY KEY,
        competition_id INTEGER NOT NULL,
        kickoff TEXT NOT NULL,
        status TEXT NOT NULL,
        round TEXT,
        home_team TEXT NOT NULL,
        away_team TEXT NOT NULL,
        home_score INTEGER,
        away_score INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_fixtures_comp_kickoff ON fixtures (competition_id, kickoff)",
];

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

fn day(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid SQLite URL: {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database: {url}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    /// Private in-memory database. Single connection so every query sees
    /// the same data.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn insert(&self, entry: &RequestLogEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO request_logs
                (request_date, created_at, endpoint, method, competition_id,
                 success, error_message, status_code, response_time_ms, units)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(day(entry.date))
        .bind(ts(entry.timestamp))
        .bind(&entry.endpoint)
        .bind(&entry.method)
        .bind(entry.competition_id)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.status_code.map(i64::from))
        .bind(entry.response_time_ms.map(|v| v as i64))
        .bind(i64::from(entry.units))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_for_date(&self, date: NaiveDate) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(units), 0) FROM request_logs WHERE request_date = ?",
        )
            .bind(day(date))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u32)
    }

    async fn aggregate_by_date(&self, since: NaiveDate) -> StoreResult<Vec<DailyCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT request_date, SUM(units) FROM request_logs
             WHERE request_date >= ?
             GROUP BY request_date
             ORDER BY request_date DESC",
        )
        .bind(day(since))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(d, used)| match NaiveDate::parse_from_str(&d, "%Y-%m-%d") {
                Ok(date) => Some(DailyCount { date, used: used as u32 }),
                Err(e) => {
                    warn!(value = %d, error = %e, "Skipping malformed request_date");
                    None
                }
            })
            .collect())
    }

    async fn delete_older_than(&self, cutoff: NaiveDate) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM request_logs WHERE request_date < ?")
            .bind(day(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn day_detail(&self, date: NaiveDate) -> StoreResult<DayDetail> {
        let (first, last, avg): (Option<String>, Option<String>, Option<f64>) = sqlx::query_as(
            "SELECT MIN(created_at), MAX(created_at), AVG(response_time_ms)
             FROM request_logs WHERE request_date = ?",
        )
        .bind(day(date))
        .fetch_one(&self.pool)
        .await?;

        Ok(DayDetail {
            first_request_at: first.as_deref().and_then(parse_ts),
            last_request_at: last.as_deref().and_then(parse_ts),
            avg_response_time_ms: avg,
        })
    }

    async fn competition_usage(&self, date: NaiveDate) -> StoreResult<Vec<CompetitionUsage>> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT competition_id, COUNT(*), SUM(success)
             FROM request_logs
             WHERE request_date = ? AND competition_id IS NOT NULL
             GROUP BY competition_id
             ORDER BY competition_id",
        )
        .bind(day(date))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(competition_id, total, ok)| CompetitionUsage {
                competition_id,
                request_count: total as u32,
                success_rate: ok as f64 / total as f64 * 100.0,
            })
            .collect())
    }
}

#[async_trait]
impl FixtureSource for SqliteStore {
    async fn snapshot(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<CompetitionSnapshot>> {
        // One pass over every active competition; the join condition keeps
        // only fixtures that can affect a priority signal.
        let rows: Vec<(i64, String, i64, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT c.id, c.name, c.season, f.status, f.kickoff
             FROM competitions c
             LEFT JOIN fixtures f
               ON f.competition_id = c.id
              AND (f.status IN ('IN_PLAY', 'PAUSED') OR (f.kickoff >= ? AND f.kickoff <= ?))
             WHERE c.is_active = 1
             ORDER BY c.id",
        )
        .bind(ts(from))
        .bind(ts(to))
        .fetch_all(&self.pool)
        .await?;

        let mut out: Vec<CompetitionSnapshot> = Vec::new();
        for (id, name, season, status, kickoff) in rows {
            if out.last().map(|s| s.competition.id) != Some(id) {
                out.push(CompetitionSnapshot {
                    competition: Competition { id, name, season: season as i32, is_active: true },
                    fixtures: Vec::new(),
                });
            }
            let (Some(status), Some(kickoff)) = (status, kickoff) else {
                continue;
            };
            let (Some(status), Some(kickoff)) = (FixtureStatus::parse(&status), parse_ts(&kickoff))
            else {
                warn!(competition_id = id, "Skipping fixture row with malformed status/kickoff");
                continue;
            };
            if let Some(snap) = out.last_mut() {
                snap.fixtures.push(FixtureState { status, kickoff });
            }
        }

        debug!(competitions = out.len(), "Fixture snapshot loaded");
        Ok(out)
    }

    async fn competition_counts(&self) -> StoreResult<(u32, u32)> {
        let (total, active): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), SUM(is_active) FROM competitions")
                .fetch_one(&self.pool)
                .await?;
        Ok((total as u32, active.unwrap_or(0) as u32))
    }
}

#[async_trait]
impl FixtureSink for SqliteStore {
    async fn upsert_competitions(&self, competitions: &[Competition]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        for c in competitions {
            sqlx::query(
                "INSERT INTO competitions (id, name, season, is_active) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, season = excluded.season",
            )
            .bind(c.id)
            .bind(&c.name)
            .bind(c.season)
            .bind(c.is_active)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(competitions.len() as u64)
    }

    async fn upsert_fixtures(&self, fixtures: &[Fixture]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        for f in fixtures {
            sqlx::query(
                "INSERT INTO fixtures
                    (id, competition_id, kickoff, status, round, home_team, away_team,
                     home_score, away_score)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    kickoff = excluded.kickoff,
                    status = excluded.status,
                    round = excluded.round,
                    home_score = excluded.home_score,
                    away_score = excluded.away_score",
            )
            .bind(f.id)
            .bind(f.competition_id)
            .bind(ts(f.kickoff))
            .bind(f.status.as_str())
            .bind(&f.round)
            .bind(&f.home_team)
            .bind(&f.away_team)
            .bind(f.home_score)
            .bind(f.away_score)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(fixtures.len() as u64)
    }
}
