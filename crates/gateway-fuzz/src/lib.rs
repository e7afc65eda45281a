//! Fuzzing library for sql-mcp-gateway.
//!
//! This crate provides fuzzing targets for the parsers that see untrusted
//! input: JSON-RPC envelopes, `search` queries and the SQL statement guard.
//!
//! # Usage
//!
//! ```bash
//! cd crates/gateway-fuzz
//! cargo +nightly fuzz run fuzz_sql_guard -- -max_total_time=60
//! ```

pub use sql_mcp_gateway::executor::guard;
pub use sql_mcp_gateway::server::rpc;
pub use sql_mcp_gateway::tools::SearchIntent;
