//! MATCHDAY: quota-aware fixture refresh scheduler
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod clock;
pub mod config;
pub mod types;
pub mod provider;
pub mod engine;
pub mod storage;
pub mod dashboard;
