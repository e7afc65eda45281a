//! MCP tool implementations.
//!
//! Each tool:
//! 1. Parses and validates its input parameters
//! 2. Calls the query executor (never the backend directly)
//! 3. Formats results as JSON or Markdown

mod catalog;
pub mod intent;
mod search;
mod sql;

pub use catalog::*;
pub use intent::SearchIntent;
pub use search::*;
pub use sql::*;

use std::time::Duration;

use crate::clock::SharedClock;
use crate::config::ExecutorLimits;
use crate::error::ToolResult;
use crate::executor::QueryExecutor;
use crate::storage::SharedStorage;

/// Tool execution context.
#[derive(Clone)]
pub struct ToolContext {
    /// Policy-enforcing query executor.
    pub executor: QueryExecutor,
    /// Search result cache.
    pub storage: SharedStorage,
    pub clock: SharedClock,
    /// How long a search result stays fetchable.
    pub search_ttl: Duration,
}

impl ToolContext {
    /// Create a new tool context.
    #[must_use]
    pub fn new(
        executor: QueryExecutor,
        storage: SharedStorage,
        clock: SharedClock,
        search_ttl: Duration,
    ) -> Self {
        Self { executor, storage, clock, search_ttl }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("executor", &self.executor)
            .field("search_ttl", &self.search_ttl)
            .finish_non_exhaustive()
    }
}

/// Trait for MCP tools.
#[async_trait::async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name (e.g., "execute_sql").
    fn name(&self) -> &'static str;

    /// Tool description for LLM.
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input.
    async fn execute(
        &self,
        ctx: &ToolContext,
        input: serde_json::Value,
    ) -> ToolResult<String>;
}

/// Register all tools, advertising the given executor limits.
#[must_use]
pub fn register_all_tools(limits: &ExecutorLimits) -> Vec<Box<dyn McpTool>> {
    vec![
        // Catalog tools (3)
        Box::new(catalog::ListTablesTool),
        Box::new(catalog::DescribeTableTool),
        Box::new(catalog::TableSampleTool::new(limits)),

        // Statement tool (1)
        Box::new(sql::ExecuteSqlTool),

        // Search/fetch pair (2)
        Box::new(search::SearchTool),
        Box::new(search::FetchTool),
    ]
}

/// Shared `responseFormat` schema property.
fn response_format_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "string",
        "enum": ["json", "markdown"],
        "default": "json",
        "description": "Output format"
    })
}
