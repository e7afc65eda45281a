//! Statement tool: execute_sql.

use serde_json::json;

use super::{McpTool, ToolContext, response_format_schema};
use crate::error::{ToolError, ToolResult};
use crate::formatters;
use crate::models::{ExecuteSqlInput, ResponseFormat};

/// Single-statement execution tool.
pub struct ExecuteSqlTool;

#[async_trait::async_trait]
impl McpTool for ExecuteSqlTool {
    fn name(&self) -> &'static str {
        "execute_sql"
    }

    fn description(&self) -> &'static str {
        "Execute exactly one SQL statement. Use $1, $2, ... placeholders with `params` \
         for values; add a cast (`$1::date`) when the type is ambiguous. In read-only \
         mode, statements that modify data or schema are rejected. Results are capped \
         and flagged as truncated when more rows exist."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "A single SQL statement"
                },
                "params": {
                    "type": "array",
                    "items": {},
                    "description": "Positional bind parameters for $1, $2, ..."
                },
                "responseFormat": response_format_schema()
            },
            "required": ["sql"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: ExecuteSqlInput = serde_json::from_value(input)?;

        if params.sql.trim().is_empty() {
            return Err(ToolError::validation("sql", "cannot be empty"));
        }

        let rows = ctx.executor.execute(&params.sql, &params.params).await?;

        match params.response_format {
            ResponseFormat::Markdown => Ok(formatters::format_rows_markdown(&rows)),
            ResponseFormat::Json => Ok(serde_json::to_string_pretty(&formatters::rows_json(&rows))?),
        }
    }
}
