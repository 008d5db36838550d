//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for the storage ports (integrations, ledger, sync events, rate cache)
//! - Belvo HTTP client for TransactionSource
//! - Frankfurter HTTP client for RateSource

pub mod belvo;
pub mod duckdb;
pub mod frankfurter;

#[cfg(test)]
pub mod belvo_mock;
