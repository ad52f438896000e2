//! Adapters - concrete implementations of the ports
//!
//! The DuckDB adapter backs production use; the in-memory adapter backs
//! tests and failure injection.

pub mod duckdb;
pub mod memory;
