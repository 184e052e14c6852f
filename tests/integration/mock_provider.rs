//! Mock fixture provider for integration testing.
//!
//! Deterministic `FixtureProvider` backed by in-memory fixtures. Test code
//! can edit fixtures between runs, force errors globally or per
//! competition, and inspect the calls made.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use matchday::provider::{FixtureProvider, FixtureQuery};
use matchday::types::{Competition, Fixture, SchedulerError};

#[derive(Clone, Default)]
pub struct MockProvider {
    competitions: Arc<Mutex<Vec<Competition>>>,
    fixtures: Arc<Mutex<HashMap<i64, Vec<Fixture>>>>,
    calls: Arc<Mutex<Vec<FixtureQuery>>>,
    failing: Arc<Mutex<HashSet<i64>>>,
    /// If set, every call returns this error.
    force_error: Arc<Mutex<Option<SchedulerError>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_competitions(competitions: Vec<Competition>) -> Self {
        let mock = Self::new();
        *mock.competitions.lock().unwrap() = competitions;
        mock
    }

    /// Replace the fixtures served for a competition.
    pub fn set_fixtures(&self, competition_id: i64, fixtures: Vec<Fixture>) {
        self.fixtures.lock().unwrap().insert(competition_id, fixtures);
    }

    /// Make calls for one competition fail with a 500.
    pub fn fail_competition(&self, competition_id: i64) {
        self.failing.lock().unwrap().insert(competition_id);
    }

    pub fn set_error(&self, error: SchedulerError) {
        *self.force_error.lock().unwrap() = Some(error);
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Competition ids of every fixture call so far, in order.
    pub fn called_ids(&self) -> Vec<i64> {
        self.calls.lock().unwrap().iter().map(|q| q.competition_id).collect()
    }

    fn check_error(&self) -> Result<(), SchedulerError> {
        match self.force_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FixtureProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_competitions(&self, _season: i32) -> Result<Vec<Competition>, SchedulerError> {
        self.check_error()?;
        Ok(self.competitions.lock().unwrap().clone())
    }

    async fn fetch_fixtures(&self, query: &FixtureQuery) -> Result<Vec<Fixture>, SchedulerError> {
        self.calls.lock().unwrap().push(query.clone());
        self.check_error()?;
        if self.failing.lock().unwrap().contains(&query.competition_id) {
            return Err(SchedulerError::Transport {
                endpoint: "/fixtures".to_string(),
                status: Some(500),
                message: "internal server error".to_string(),
            });
        }
        Ok(self
            .fixtures
            .lock()
            .unwrap()
            .get(&query.competition_id)
            .cloned()
            .unwrap_or_default())
    }
}
