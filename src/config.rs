//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! field has a default, so a partial (or empty) file is valid.
//! Secrets (the provider API key) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::types::Operation;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub quota: QuotaSection,
    pub priority: PrioritySection,
    pub dispatcher: DispatcherSection,
    pub intervals: IntervalsSection,
    pub provider: ProviderConfig,
    pub storage: StorageConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// How often the loop checks for urgent competitions between runs.
    pub urgency_poll_minutes: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "MATCHDAY".to_string(),
            urgency_poll_minutes: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QuotaSection {
    pub daily_limit: u32,
    pub warning_threshold: u32,
    pub critical_threshold: u32,
    pub retention_days: u32,
    pub operation_costs: HashMap<Operation, u32>,
}

impl Default for QuotaSection {
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PrioritySection {
    pub imminent_window_minutes: i64,
    pub upcoming_window_hours: i64,
    pub recent_finished_hours: i64,
}

impl Default for PrioritySection {
    fn default() -> Self {
        Self {
            imminent_window_minutes: 120,
            upcoming_window_hours: 24,
            recent_finished_hours: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatcherSection {
    pub fetch_timeout_secs: u64,
    pub run_deadline_secs: u64,
    /// Pause between two competitions within a run.
    pub delay_between_calls_ms: u64,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 15,
            run_deadline_secs: 120,
            delay_between_calls_ms: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IntervalsSection {
    pub live_minutes: u32,
    pub imminent_minutes: u32,
    pub upcoming_minutes: u32,
    pub idle_minutes: u32,
}

impl Default for IntervalsSection {
    fn default() -> Self {
        Self {
            live_minutes: 5,
            imminent_minutes: 15,
            upcoming_minutes: 60,
            idle_minutes: 240,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Set when routing through RapidAPI; the key is then sent as
    /// `x-rapidapi-key` alongside this host.
    pub rapidapi_host: Option<String>,
    pub api_key_env: String,
    pub season: i32,
    /// Competitions imported on first start.
    pub tracked_competitions: Vec<i64>,
    /// Days either side of today covered by a refresh.
    pub refresh_window_days: i64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://v3.football.api-sports.io".to_string(),
            rapidapi_host: None,
            api_key_env: "API_FOOTBALL_KEY".to_string(),
            season: 2026,
            tracked_competitions: Vec::new(),
            refresh_window_days: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite URL, or `memory` for a throwaway in-process store.
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://matchday.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot act on consistently.
    pub fn validate(&self) -> Result<()> {
        let q = &self.quota;
        if q.daily_limit == 0 {
            bail!("quota.daily_limit must be positive");
        }
        if q.critical_threshold > q.warning_threshold {
            bail!(
                "quota.critical_threshold ({}) exceeds quota.warning_threshold ({})",
                q.critical_threshold,
                q.warning_threshold
            );
        }
        if q.warning_threshold > q.daily_limit {
            bail!(
                "quota.warning_threshold ({}) exceeds quota.daily_limit ({})",
                q.warning_threshold,
                q.daily_limit
            );
        }
        if let Some((op, _)) = q.operation_costs.iter().find(|(_, cost)| **cost == 0) {
            bail!("quota.operation_costs.{op:?} must be at least 1");
        }

        let p = &self.priority;
        if p.imminent_window_minutes <= 0 || p.upcoming_window_hours <= 0 || p.recent_finished_hours <= 0 {
            bail!("priority windows must be positive");
        }
        if p.imminent_window_minutes > p.upcoming_window_hours * 60 {
            bail!("priority.imminent_window_minutes must not exceed the upcoming window");
        }

        let i = &self.intervals;
        if [i.live_minutes, i.imminent_minutes, i.upcoming_minutes, i.idle_minutes].contains(&0) {
            bail!("intervals must be at least one minute");
        }

        if self.dispatcher.fetch_timeout_secs == 0 || self.dispatcher.run_deadline_secs == 0 {
            bail!("dispatcher timeouts must be positive");
        }
        if self.service.urgency_poll_minutes == 0 {
            bail!("service.urgency_poll_minutes must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an environment variable into a secret that won't leak
    /// through `Debug` output.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        Self::resolve_env(env_name).map(SecretString::new)
    }
}
