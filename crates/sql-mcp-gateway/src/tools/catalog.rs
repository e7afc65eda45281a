//! Catalog tools: list_tables, describe_table, get_table_sample.

use serde_json::json;

use super::{McpTool, ToolContext, response_format_schema};
use crate::config::ExecutorLimits;
use crate::error::{ToolError, ToolResult};
use crate::formatters;
use crate::models::{DescribeTableInput, ListTablesInput, ResponseFormat, TableSampleInput};

/// Table listing tool.
pub struct ListTablesTool;

#[async_trait::async_trait]
impl McpTool for ListTablesTool {
    fn name(&self) -> &'static str {
        "list_tables"
    }

    fn description(&self) -> &'static str {
        "List the tables and views in the database, optionally restricted to one schema. \
         System schemas are excluded."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "schema": {
                    "type": "string",
                    "description": "Only list tables in this schema"
                },
                "responseFormat": response_format_schema()
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: ListTablesInput = serde_json::from_value(input)?;

        let tables = ctx.executor.list_tables(params.schema.as_deref()).await?;

        match params.response_format {
            ResponseFormat::Markdown => Ok(formatters::format_tables_markdown(&tables)),
            ResponseFormat::Json => Ok(serde_json::to_string_pretty(&formatters::tables_json(&tables))?),
        }
    }
}

/// Column description tool.
pub struct DescribeTableTool;

#[async_trait::async_trait]
impl McpTool for DescribeTableTool {
    fn name(&self) -> &'static str {
        "describe_table"
    }

    fn description(&self) -> &'static str {
        "Describe a table's columns: name, data type, nullability and default. \
         Accepts `table` or `schema.table`."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "table": {
                    "type": "string",
                    "description": "Table name, optionally schema-qualified"
                },
                "responseFormat": response_format_schema()
            },
            "required": ["table"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: DescribeTableInput = serde_json::from_value(input)?;

        let (table, columns) = ctx.executor.describe_table(&params.table).await?;

        match params.response_format {
            ResponseFormat::Markdown => Ok(formatters::format_columns_markdown(&table, &columns)),
            ResponseFormat::Json => Ok(serde_json::to_string_pretty(
                &formatters::table_description_json(&table, &columns),
            )?),
        }
    }
}

/// Table sampling tool. The advertised limits follow the executor's.
pub struct TableSampleTool {
    default_rows: u32,
    max_rows: u32,
}

impl TableSampleTool {
    #[must_use]
    pub fn new(limits: &ExecutorLimits) -> Self {
        Self { default_rows: limits.default_sample_rows, max_rows: limits.max_sample_rows }
    }
}

#[async_trait::async_trait]
impl McpTool for TableSampleTool {
    fn name(&self) -> &'static str {
        "get_table_sample"
    }

    fn description(&self) -> &'static str {
        "Return the first rows of a table. `limit` is optional; its default and maximum \
         are given in the input schema, and larger values are clamped to the maximum."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "table": {
                    "type": "string",
                    "description": "Table name, optionally schema-qualified"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": self.max_rows,
                    "default": self.default_rows
                },
                "responseFormat": response_format_schema()
            },
            "required": ["table"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: TableSampleInput = serde_json::from_value(input)?;

        if params.limit == Some(0) {
            return Err(ToolError::validation("limit", "must be at least 1"));
        }

        let (_, rows) = ctx.executor.sample(&params.table, params.limit).await?;

        match params.response_format {
            ResponseFormat::Markdown => Ok(formatters::format_rows_markdown(&rows)),
            ResponseFormat::Json => Ok(serde_json::to_string_pretty(&formatters::rows_json(&rows))?),
        }
    }
}
