//! Search/fetch pair: search, fetch.
//!
//! `search` resolves a query to a [`SearchIntent`], runs it, and caches the
//! full result under a fresh id; `fetch` returns that cached result.

use serde::Serialize;
use serde_json::{Value, json};

use super::{McpTool, SearchIntent, ToolContext};
use crate::error::{ToolError, ToolResult};
use crate::formatters;
use crate::models::{FetchInput, SearchInput};
use crate::storage::SearchResultEntry;

/// Characters of content shown in a search hit.
const SNIPPET_CHARS: usize = 200;

/// One search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub snippet: String,
}

/// Intent-driven search tool.
pub struct SearchTool;

#[async_trait::async_trait]
impl McpTool for SearchTool {
    fn name(&self) -> &'static str {
        "search"
    }

    fn description(&self) -> &'static str {
        "Search the database with a short command: 'list tables', 'describe <table>', \
         'sample <table> [n]', 'first <n> rows of <table>', or a read-only SQL statement \
         (optionally prefixed with 'sql:'). Returns result ids to pass to `fetch`."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search command or SQL statement"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: SearchInput = serde_json::from_value(input)?;
        let intent = SearchIntent::parse(&params.query)?;

        tracing::debug!(intent = ?intent, "Resolved search intent");
        let content = run_intent(ctx, &intent).await?;
        let text = serde_json::to_string_pretty(&content)?;

        let entry = SearchResultEntry {
            id: uuid::Uuid::new_v4().to_string(),
            title: intent.title(),
            content: text,
            created_at: ctx.clock.now(),
            ttl: ctx.search_ttl,
        };
        let hit = SearchHit {
            id: entry.id.clone(),
            title: entry.title.clone(),
            snippet: snippet(&entry.content),
        };
        ctx.storage.insert_search_entry(entry).await?;

        Ok(serde_json::to_string_pretty(&json!({ "results": [hit] }))?)
    }
}

/// Cached search result retrieval tool.
pub struct FetchTool;

#[async_trait::async_trait]
impl McpTool for FetchTool {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn description(&self) -> &'static str {
        "Fetch the full content of a result returned by `search`. Results expire after \
         a few minutes."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Result id from search"
                }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: FetchInput = serde_json::from_value(input)?;

        let entry = ctx
            .storage
            .search_entry(&params.id, ctx.clock.now())
            .await?
            .ok_or_else(|| ToolError::not_found(format!("search result '{}' is unknown or expired", params.id)))?;

        Ok(serde_json::to_string_pretty(&json!({
            "id": entry.id,
            "title": entry.title,
            "text": entry.content,
        }))?)
    }
}

async fn run_intent(ctx: &ToolContext, intent: &SearchIntent) -> ToolResult<Value> {
    let executor = &ctx.executor;
    let content = match intent {
        SearchIntent::ListTables => formatters::tables_json(&executor.list_tables(None).await?),
        SearchIntent::DescribeTable(raw) => {
            let (table, columns) = executor.describe_table(raw).await?;
            formatters::table_description_json(&table, &columns)
        }
        SearchIntent::Sample(raw, rows) => {
            let (_, rows) = executor.sample(raw, *rows).await?;
            formatters::rows_json(&rows)
        }
        SearchIntent::RawQuery(sql) => formatters::rows_json(&executor.execute(sql, &[]).await?),
    };
    Ok(content)
}

/// First characters of `text` on a char boundary, whitespace collapsed.
fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
