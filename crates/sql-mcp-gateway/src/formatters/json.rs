//! JSON output formatting.

use serde_json::{Value, json};

use crate::executor::{ColumnInfo, QueryRows, TableInfo, TableName};

/// Table listing.
#[must_use]
pub fn tables_json(tables: &[TableInfo]) -> Value {
    json!({
        "count": tables.len(),
        "tables": tables,
    })
}

/// Column description of one table.
#[must_use]
pub fn table_description_json(table: &TableName, columns: &[ColumnInfo]) -> Value {
    json!({
        "schema": table.schema,
        "table": table.name,
        "columns": columns,
    })
}

/// Result set with its row count.
#[must_use]
pub fn rows_json(rows: &QueryRows) -> Value {
    let mut obj = json!({
        "columns": rows.columns,
        "rows": rows.rows,
        "rowCount": rows.rows.len(),
        "truncated": rows.truncated,
    });

    if let Some(affected) = rows.rows_affected {
        obj["rowsAffected"] = json!(affected);
    }

    obj
}
