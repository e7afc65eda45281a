//! Input models for MCP tool parameters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ResponseFormat;

/// Input for `list_tables`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTablesInput {
    /// Restrict to one schema.
    #[serde(default)]
    pub schema: Option<String>,

    /// Output format.
    #[serde(default)]
    pub response_format: ResponseFormat,
}

/// Input for `describe_table`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTableInput {
    /// Table name, optionally schema-qualified (`sales.orders`).
    pub table: String,

    /// Output format.
    #[serde(default)]
    pub response_format: ResponseFormat,
}

/// Input for `get_table_sample`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSampleInput {
    /// Table name, optionally schema-qualified.
    pub table: String,

    /// Rows to return; defaults to a small sample, capped server-side.
    #[serde(default)]
    pub limit: Option<u32>,

    /// Output format.
    #[serde(default)]
    pub response_format: ResponseFormat,
}

/// Input for `execute_sql`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSqlInput {
    /// A single SQL statement; use `$1`, `$2`, ... for parameters.
    pub sql: String,

    /// Positional bind parameters.
    #[serde(default)]
    pub params: Vec<Value>,

    /// Output format.
    #[serde(default)]
    pub response_format: ResponseFormat,
}

/// Input for `search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchInput {
    pub query: String,
}

/// Input for `fetch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchInput {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_sql_defaults() {
        let input: ExecuteSqlInput = serde_json::from_value(json!({"sql": "SELECT 1"})).unwrap();
        assert!(input.params.is_empty());
        assert_eq!(input.response_format, ResponseFormat::Json);
    }

    #[test]
    fn test_sample_camel_case() {
        let input: TableSampleInput = serde_json::from_value(json!({
            "table": "users",
            "limit": 10,
            "responseFormat": "markdown"
        }))
        .unwrap();
        assert_eq!(input.limit, Some(10));
        assert!(input.response_format.is_markdown());
    }

    #[test]
    fn test_missing_required_field() {
        assert!(serde_json::from_value::<DescribeTableInput>(json!({})).is_err());
        assert!(serde_json::from_value::<TableSampleInput>(json!({"table": "t", "limit": -1})).is_err());
    }
}
