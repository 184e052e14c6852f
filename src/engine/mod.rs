//! Core engine: ledger, priorities, dispatch and interval advice.
//!
//! The pieces are wired explicitly in `main`: one [`ledger::QuotaLedger`]
//! is shared through `Arc` by everything that spends or reports quota.

pub mod advisor;
pub mod dispatcher;
pub mod ledger;
pub mod priority;
pub mod refresher;

pub use advisor::IntervalAdvisor;
pub use dispatcher::Dispatcher;
pub use ledger::QuotaLedger;
pub use priority::PriorityEngine;
pub use refresher::{CompetitionRefresher, ProviderRefresher};

use crate::types::Operation;

/// Quota slots one provider operation consumes.
pub trait CostModel: Send + Sync {
    fn cost(&self, operation: Operation) -> u32;
}

impl CostModel for QuotaLedger {
    fn cost(&self, operation: Operation) -> u32 {
        self.estimate_operation_cost(operation)
    }
}
