//! Integration tests: the scheduler wired end to end against an in-memory
//! provider.

mod mock_provider;
mod scheduler;
