//! Markdown output formatting.

use std::borrow::Cow;

use serde_json::Value;

use crate::executor::{ColumnInfo, QueryRows, TableInfo, TableName};

/// Format a table listing as Markdown.
#[must_use]
pub fn format_tables_markdown(tables: &[TableInfo]) -> String {
    if tables.is_empty() {
        return "No tables found.".to_string();
    }

    let mut output = format!("# Tables ({})\n\n", tables.len());
    output.push_str("| Schema | Name | Kind |\n| --- | --- | --- |\n");
    for t in tables {
        output.push_str(&format!(
            "| {} | {} | {} |\n",
            escape_cell(&t.schema),
            escape_cell(&t.name),
            t.kind
        ));
    }
    output
}

/// Format a table's columns as Markdown.
#[must_use]
pub fn format_columns_markdown(table: &TableName, columns: &[ColumnInfo]) -> String {
    let mut output = format!("# {table}\n\n");
    if columns.is_empty() {
        output.push_str("No visible columns.\n");
        return output;
    }

    output.push_str("| Column | Type | Nullable | Default |\n| --- | --- | --- | --- |\n");
    for c in columns {
        output.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            escape_cell(&c.name),
            escape_cell(&c.data_type),
            if c.nullable { "yes" } else { "no" },
            c.default.as_deref().map_or(Cow::Borrowed(""), escape_cell)
        ));
    }
    output
}

/// Format a result set as a Markdown table.
#[must_use]
pub fn format_rows_markdown(rows: &QueryRows) -> String {
    if rows.columns.is_empty() {
        return match rows.rows_affected {
            Some(n) => format!("Statement executed, {n} row(s) affected."),
            None => "Statement executed, no rows returned.".to_string(),
        };
    }

    let mut output = String::new();
    output.push_str(&format!(
        "| {} |\n",
        rows.columns.iter().map(|c| escape_cell(c)).collect::<Vec<_>>().join(" | ")
    ));
    output.push_str(&format!("|{}\n", " --- |".repeat(rows.columns.len())));

    for row in &rows.rows {
        let cells: Vec<Cow<'_, str>> = row.iter().map(format_cell).collect();
        output.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    output.push_str(&format!("\n{} row(s)", rows.rows.len()));
    if rows.truncated {
        output.push_str(" (truncated)");
    }
    output.push('\n');
    output
}

fn format_cell(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed("NULL"),
        Value::String(s) => escape_cell(s),
        other => Cow::Owned(escape_cell(&other.to_string()).into_owned()),
    }
}

/// Escape pipes and flatten newlines so a value stays in one cell.
fn escape_cell(s: &str) -> Cow<'_, str> {
    if s.contains(['|', '\n', '\r']) {
        Cow::Owned(s.replace('|', "\\|").replace("\r\n", " ").replace(['\n', '\r'], " "))
    } else {
        Cow::Borrowed(s)
    }
}
