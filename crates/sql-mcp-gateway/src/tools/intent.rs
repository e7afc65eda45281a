//! Grammar for `search` queries.
//!
//! The query is split on whitespace and matched against a fixed set of word
//! patterns. Text starting with a SQL keyword is taken as a raw statement.

use crate::error::{ToolError, ToolResult};

/// Forms listed back to the caller when a query is not understood.
pub const ACCEPTED_FORMS: &[&str] = &[
    "list tables",
    "describe <table>",
    "columns of <table>",
    "sample <table> [n]",
    "sample <n> rows from <table>",
    "first <n> rows of <table>",
    "sql: <statement>",
    "<statement starting with SELECT, WITH, VALUES, TABLE, SHOW or EXPLAIN>",
];

/// Keywords that make the whole query a raw statement. Mutating keywords are
/// included so the read-only guard can name them in its rejection.
const SQL_LEADERS: &[&str] = &[
    "SELECT", "WITH", "VALUES", "TABLE", "SHOW", "EXPLAIN", "INSERT", "UPDATE", "DELETE", "MERGE",
    "CREATE", "ALTER", "DROP", "TRUNCATE", "GRANT", "REVOKE", "COPY", "CALL",
];

/// What a `search` query asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchIntent {
    ListTables,
    DescribeTable(String),
    /// Table and requested row count (`None` uses the default sample size).
    Sample(String, Option<u32>),
    RawQuery(String),
}

impl SearchIntent {
    /// Interpret a search query.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing [`ACCEPTED_FORMS`] when nothing matches.
    pub fn parse(query: &str) -> ToolResult<Self> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ToolError::validation("query", "cannot be empty"));
        }

        if let Some(sql) = strip_sql_prefix(query) {
            if sql.is_empty() {
                return Err(ToolError::validation("query", "no statement after 'sql:'"));
            }
            return Ok(Self::RawQuery(sql.to_string()));
        }

        let words: Vec<&str> = query.split_whitespace().collect();
        if let Some(intent) = Self::from_words(&words)? {
            return Ok(intent);
        }

        let first = words[0].to_ascii_uppercase();
        if SQL_LEADERS.contains(&first.as_str()) {
            return Ok(Self::RawQuery(query.to_string()));
        }

        Err(ToolError::validation(
            "query",
            format!("unrecognized search '{query}'; accepted forms: {}", ACCEPTED_FORMS.join(" | ")),
        ))
    }

    /// Short human-readable title for a search result.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::ListTables => "Tables".to_string(),
            Self::DescribeTable(table) => format!("Columns of {table}"),
            Self::Sample(table, _) => format!("Sample rows of {table}"),
            Self::RawQuery(sql) => {
                let mut title: String = sql.chars().take(60).collect();
                if title.len() < sql.len() {
                    title.push_str("...");
                }
                format!("Query: {title}")
            }
        }
    }

    fn from_words(raw: &[&str]) -> ToolResult<Option<Self>> {
        let words: Vec<String> = raw
            .iter()
            .map(|w| w.trim_end_matches(['?', '.', '!']).to_ascii_lowercase())
            .collect();
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        let name = |i: usize| raw[i].trim_end_matches(['?', '.', '!', ';']).to_string();

        let intent = match words.as_slice() {
            ["tables"]
            | ["list", "tables"]
            | ["show", "tables"]
            | ["list", "all", "tables"]
            | ["what", "tables", "exist"] => Self::ListTables,

            ["describe", _] => Self::DescribeTable(name(1)),
            ["describe", "table", _] | ["columns", "of" | "in", _] | ["schema", "of", _] => {
                Self::DescribeTable(name(2))
            }

            ["sample", _] | ["preview", _] => Self::Sample(name(1), None),
            ["sample", a, b] => match (row_count(b), row_count(a)) {
                (Some(n), _) => Self::Sample(name(1), Some(n?)),
                (None, Some(n)) => Self::Sample(name(2), Some(n?)),
                (None, None) => return Ok(None),
            },
            ["sample", n, "from" | "of", _] => Self::Sample(name(3), Some(count(n)?)),
            ["sample" | "first" | "show", n, "rows", "from" | "of", _] => {
                Self::Sample(name(4), Some(count(n)?))
            }

            _ => return Ok(None),
        };
        Ok(Some(intent))
    }
}

/// `sql:` / `query:` prefix, case-insensitive.
fn strip_sql_prefix(query: &str) -> Option<&str> {
    ["sql:", "query:"].iter().find_map(|prefix| {
        query
            .get(..prefix.len())
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .map(|_| query[prefix.len()..].trim())
    })
}

/// `Some` when the word is numeric; the inner result rejects zero or overflow.
fn row_count(word: &str) -> Option<ToolResult<u32>> {
    word.bytes().all(|b| b.is_ascii_digit()).then(|| count(word))
}

fn count(word: &str) -> ToolResult<u32> {
    match word.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ToolError::validation("query", format!("'{word}' is not a positive row count"))),
    }
}
