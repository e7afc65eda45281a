//! Query executor: the policy layer between tools and the SQL backend.
//!
//! Enforces the read-only guard, identifier validation, row caps, per-call
//! timeouts and a single retry of transient failures. Caller values only ever
//! reach the database as bind parameters.

pub mod guard;
mod postgres;
pub mod value;

pub use guard::{Classified, StatementKind};
pub use postgres::PgBackend;
pub use value::ScalarValue;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::config::ExecutorLimits;
use crate::error::{BackendError, BackendResult, ExecutorError, ExecutorResult};

/// Longest identifier Postgres keeps (NAMEDATALEN - 1).
const MAX_IDENTIFIER_LEN: usize = 63;

/// A table or view visible to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    /// `table` or `view`.
    pub kind: String,
}

/// One column of a described table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Rows returned by a statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// More rows existed than the cap allowed.
    pub truncated: bool,
    /// Affected row count for statements that return no rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
}

/// How the backend must run a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Run inside a `READ ONLY` transaction.
    pub read_only: bool,
    /// Statement kind from the guard.
    pub kind: StatementKind,
    /// Return at most this many rows, flagging truncation.
    pub max_rows: u32,
    /// Server-side statement timeout.
    pub timeout: Duration,
}

/// A validated `schema.table` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    /// Parse `table` or `schema.table`; unqualified names use `default_schema`.
    ///
    /// Each part must match `[A-Za-z_][A-Za-z0-9_$]*` and fit in 63 bytes.
    ///
    /// # Errors
    ///
    /// `InvalidIdentifier` when the text does not follow that grammar.
    pub fn parse(raw: &str, default_schema: &str) -> ExecutorResult<Self> {
        let trimmed = raw.trim();
        let parts: Vec<&str> = trimmed.split('.').collect();
        let (schema, name) = match parts.as_slice() {
            [name] => (default_schema, *name),
            [schema, name] => (*schema, *name),
            _ => return Err(ExecutorError::InvalidIdentifier(raw.to_string())),
        };
        if !is_identifier(schema) || !is_identifier(name) {
            return Err(ExecutorError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self { schema: schema.to_string(), name: name.to_string() })
    }

    /// `"schema"."table"`, safe to splice into SQL text.
    #[must_use]
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    s.len() <= MAX_IDENTIFIER_LEN
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Double-quote an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// The SQL backend port.
#[async_trait::async_trait]
pub trait SqlBackend: Send + Sync {
    /// Tables and views, optionally limited to one schema. System schemas are excluded.
    async fn list_tables(&self, schema: Option<&str>) -> BackendResult<Vec<TableInfo>>;

    /// Whether the table exists (parameterized catalog lookup).
    async fn table_exists(&self, table: &TableName) -> BackendResult<bool>;

    /// Columns in ordinal order.
    async fn describe_table(&self, table: &TableName) -> BackendResult<Vec<ColumnInfo>>;

    /// Run one statement with positional bind parameters.
    async fn query(
        &self,
        sql: &str,
        params: &[Value],
        options: QueryOptions,
    ) -> BackendResult<QueryRows>;

    /// Cheap liveness check.
    async fn ping(&self) -> BackendResult<()>;
}

/// Shared backend handle.
pub type SharedBackend = Arc<dyn SqlBackend>;

/// Policy wrapper around a [`SqlBackend`].
#[derive(Clone)]
pub struct QueryExecutor {
    backend: SharedBackend,
    limits: ExecutorLimits,
    read_only: bool,
}

impl QueryExecutor {
    #[must_use]
    pub fn new(backend: SharedBackend, limits: ExecutorLimits, read_only: bool) -> Self {
        Self { backend, limits, read_only }
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub fn limits(&self) -> &ExecutorLimits {
        &self.limits
    }

    /// Parse a table reference with the configured default schema.
    ///
    /// # Errors
    ///
    /// `InvalidIdentifier` for malformed names.
    pub fn table_name(&self, raw: &str) -> ExecutorResult<TableName> {
        TableName::parse(raw, &self.limits.default_schema)
    }

    /// List tables and views.
    ///
    /// # Errors
    ///
    /// `InvalidIdentifier` for a malformed schema, or the backend failure.
    pub async fn list_tables(&self, schema: Option<&str>) -> ExecutorResult<Vec<TableInfo>> {
        if let Some(schema) = schema {
            if !is_identifier(schema) {
                return Err(ExecutorError::InvalidIdentifier(schema.to_string()));
            }
        }
        Ok(self.call("list_tables", || self.backend.list_tables(schema)).await?)
    }

    /// Describe a table's columns.
    ///
    /// # Errors
    ///
    /// `InvalidIdentifier`, `UnknownTable`, or the backend failure.
    pub async fn describe_table(&self, raw: &str) -> ExecutorResult<(TableName, Vec<ColumnInfo>)> {
        let table = self.existing_table(raw).await?;
        let columns = self.call("describe_table", || self.backend.describe_table(&table)).await?;
        Ok((table, columns))
    }

    /// Fetch the first rows of a table. `rows` defaults to the configured
    /// sample size and is capped at the sampling maximum.
    ///
    /// # Errors
    ///
    /// `InvalidIdentifier`, `UnknownTable`, or the backend failure.
    pub async fn sample(&self, raw: &str, rows: Option<u32>) -> ExecutorResult<(TableName, QueryRows)> {
        let table = self.existing_table(raw).await?;
        let limit = self.sample_size(rows);

        // Identifier is validated and quoted; the limit is bound.
        let sql = format!("SELECT * FROM {} LIMIT $1", table.quoted());
        let params = [Value::from(i64::from(limit))];
        let options = QueryOptions {
            read_only: true,
            kind: StatementKind::Read,
            max_rows: limit,
            timeout: self.limits.query_timeout,
        };
        let result = self.call("sample", || self.backend.query(&sql, &params, options)).await?;
        Ok((table, result))
    }

    /// Effective sample size for a requested count.
    #[must_use]
    pub fn sample_size(&self, rows: Option<u32>) -> u32 {
        rows.unwrap_or(self.limits.default_sample_rows).clamp(1, self.limits.max_sample_rows)
    }

    /// Run one caller-supplied statement.
    ///
    /// # Errors
    ///
    /// `ReadOnlyViolation` for writes in read-only mode, `InvalidStatement`
    /// for empty or multi-statement text, or the backend failure.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> ExecutorResult<QueryRows> {
        let classified = if self.read_only { guard::ensure_read_only(sql)? } else { guard::classify(sql)? };

        let options = QueryOptions {
            read_only: classified.kind == StatementKind::Read,
            kind: classified.kind,
            max_rows: self.limits.max_result_rows,
            timeout: self.limits.query_timeout,
        };
        tracing::debug!(keyword = %classified.keyword, params = params.len(), "Executing statement");
        let run = || self.backend.query(sql, params, options);
        let result = match classified.kind {
            StatementKind::Read => self.call("execute", run).await,
            // A write whose commit failed may still have been applied; never replay it.
            StatementKind::Write => self.timed(run()).await,
        };
        Ok(result?)
    }

    /// Check that the backend answers.
    ///
    /// # Errors
    ///
    /// The backend failure.
    pub async fn ping(&self) -> ExecutorResult<()> {
        Ok(self.call("ping", || self.backend.ping()).await?)
    }

    async fn existing_table(&self, raw: &str) -> ExecutorResult<TableName> {
        let table = self.table_name(raw)?;
        if self.call("table_exists", || self.backend.table_exists(&table)).await? {
            Ok(table)
        } else {
            Err(ExecutorError::UnknownTable(table.to_string()))
        }
    }

    /// Run a backend call under the timeout, retrying once if it failed transiently.
    async fn call<T, F, Fut>(&self, op: &'static str, mut f: F) -> BackendResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        match self.timed(f()).await {
            Err(e) if e.is_retryable() => {
                tracing::warn!(op, error = %e, "Transient backend failure, retrying once");
                tokio::time::sleep(self.limits.retry_delay).await;
                self.timed(f()).await
            }
            other => other,
        }
    }

    async fn timed<T>(&self, fut: impl Future<Output = BackendResult<T>>) -> BackendResult<T> {
        let timeout = self.limits.query_timeout;
        tokio::time::timeout(timeout, fut).await.unwrap_or(Err(BackendError::Timeout(timeout)))
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("limits", &self.limits)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}
