//! API-Football (API-Sports v3) client.
//!
//! API: `https://v3.football.api-sports.io/`
//! Auth: `x-apisports-key` header, or `x-rapidapi-key` + `x-rapidapi-host`
//! when routed through RapidAPI.
//!
//! The API answers HTTP 200 even for rejected requests and reports the
//! problem in a top-level `errors` field (an object or an array). A
//! non-empty `errors` is treated as a failed call.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{FixtureProvider, FixtureQuery};
use crate::types::{Competition, Fixture, FixtureStatus, SchedulerError};

pub const ENDPOINT_LEAGUES: &str = "/leagues";
pub const ENDPOINT_FIXTURES: &str = "/fixtures";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    errors: serde_json::Value,
    #[serde(default)]
    results: u32,
    response: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LeagueItem {
    league: LeagueInfo,
    #[serde(default)]
    seasons: Vec<SeasonInfo>,
}

#[derive(Debug, Deserialize)]
struct LeagueInfo {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SeasonInfo {
    year: i32,
    #[serde(default)]
    current: bool,
}

#[derive(Debug, Deserialize)]
struct FixtureItem {
    fixture: FixtureInfo,
    league: FixtureLeague,
    teams: Teams,
    #[serde(default)]
    goals: Goals,
}

#[derive(Debug, Deserialize)]
struct FixtureInfo {
    id: i64,
    timestamp: i64,
    status: StatusInfo,
}

#[derive(Debug, Deserialize)]
struct StatusInfo {
    short: String,
}

#[derive(Debug, Deserialize)]
struct FixtureLeague {
    id: i64,
    round: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Teams {
    home: Team,
    away: Team,
}

#[derive(Debug, Deserialize)]
struct Team {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Goals {
    home: Option<i32>,
    away: Option<i32>,
}

/// True when the `errors` field carries anything.
fn has_errors(errors: &serde_json::Value) -> bool {
    match errors {
        serde_json::Value::Null => false,
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Decode a 2xx response body, surfacing payload-level errors.
fn decode<T: DeserializeOwned>(endpoint: &str, status: u16, body: &str) -> Result<T, SchedulerError> {
    let envelope: Envelope<T> =
        serde_json::from_str(body).map_err(|e| SchedulerError::Transport {
            endpoint: endpoint.to_string(),
            status: Some(status),
            message: format!("malformed payload: {e}"),
        })?;

    if has_errors(&envelope.errors) {
        return Err(SchedulerError::ProviderReported {
            endpoint: endpoint.to_string(),
            status,
            errors: envelope.errors.to_string(),
        });
    }

    debug!(endpoint, results = envelope.results, "Provider response decoded");
    envelope.response.ok_or_else(|| SchedulerError::Transport {
        endpoint: endpoint.to_string(),
        status: Some(status),
        message: "payload has no response field".to_string(),
    })
}

fn kickoff(timestamp: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp, 0).single()
}

impl FixtureItem {
    fn into_fixture(self) -> Option<Fixture> {
        Some(Fixture {
            id: self.fixture.id,
            competition_id: self.league.id,
            kickoff: kickoff(self.fixture.timestamp)?,
            status: FixtureStatus::from_provider_code(&self.fixture.status.short),
            round: self.league.round,
            home_team: self.teams.home.name,
            away_team: self.teams.away.name,
            home_score: self.goals.home,
            away_score: self.goals.away,
        })
    }
}

impl LeagueItem {
    fn into_competition(self, season: i32) -> Competition {
        let season = self
            .seasons
            .iter()
            .find(|s| s.current)
            .map(|s| s.year)
            .unwrap_or(season);
        Competition {
            id: self.league.id,
            name: self.league.name,
            season,
            is_active: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ApiFootballClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    rapidapi_host: Option<String>,
    timeout: Duration,
}

impl ApiFootballClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        rapidapi_host: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("MATCHDAY/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build API-Football HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            rapidapi_host,
            timeout,
        })
    }

    fn url(&self, endpoint: &str, params: &[(&str, String)]) -> String {
        let query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect();
        if query.is_empty() {
            format!("{}{endpoint}", self.base_url)
        } else {
            format!("{}{endpoint}?{}", self.base_url, query.join("&"))
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, SchedulerError> {
        let url = self.url(endpoint, params);
        let key = self.api_key.expose_secret().as_str();
        let request = match &self.rapidapi_host {
            Some(host) => self
                .http
                .get(&url)
                .header("x-rapidapi-key", key)
                .header("x-rapidapi-host", host.as_str()),
            None => self.http.get(&url).header("x-apisports-key", key),
        };

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SchedulerError::Timeout {
                    endpoint: endpoint.to_string(),
                    after_ms: self.timeout.as_millis() as u64,
                }
            } else {
                SchedulerError::Transport {
                    endpoint: endpoint.to_string(),
                    status: e.status().map(|s| s.as_u16()),
                    message: e.to_string(),
                }
            }
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| SchedulerError::Transport {
            endpoint: endpoint.to_string(),
            status: Some(status.as_u16()),
            message: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            warn!(endpoint, status = status.as_u16(), "API-Football returned an error status");
            return Err(SchedulerError::Transport {
                endpoint: endpoint.to_string(),
                status: Some(status.as_u16()),
                message: format!("HTTP {status}: {}", body.chars().take(200).collect::<String>()),
            });
        }

        decode(endpoint, status.as_u16(), &body)
    }
}

#[async_trait]
impl FixtureProvider for ApiFootballClient {
    fn name(&self) -> &str {
        "api-football"
    }

    async fn list_competitions(&self, season: i32) -> Result<Vec<Competition>, SchedulerError> {
        let items: Vec<LeagueItem> = self
            .get(ENDPOINT_LEAGUES, &[("season", season.to_string())])
            .await?;
        Ok(items.into_iter().map(|i| i.into_competition(season)).collect())
    }

    async fn fetch_fixtures(&self, query: &FixtureQuery) -> Result<Vec<Fixture>, SchedulerError> {
        let items: Vec<FixtureItem> = self.get(ENDPOINT_FIXTURES, &query.params()).await?;
        let total = items.len();
        let fixtures: Vec<Fixture> = items.into_iter().filter_map(FixtureItem::into_fixture).collect();
        if fixtures.len() < total {
            warn!(
                competition_id = query.competition_id,
                dropped = total - fixtures.len(),
                "Dropped fixtures with invalid timestamps"
            );
        }
        Ok(fixtures)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
