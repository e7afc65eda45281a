//! PostgreSQL backend on a bounded sqlx pool.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Decode, Executor, Postgres, Row, Type, TypeInfo};

use super::{ColumnInfo, QueryOptions, QueryRows, ScalarValue, SqlBackend, StatementKind, TableInfo, TableName};
use crate::config::Config;
use crate::error::BackendResult;

const LIST_TABLES_SQL: &str = "\
SELECT table_schema::text, table_name::text,
       CASE table_type WHEN 'VIEW' THEN 'view' ELSE 'table' END
FROM information_schema.tables
WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
  AND ($1::text IS NULL OR table_schema = $1)
ORDER BY table_schema, table_name";

const TABLE_EXISTS_SQL: &str = "\
SELECT EXISTS (
    SELECT 1 FROM information_schema.tables
    WHERE table_schema = $1 AND table_name = $2
)";

const DESCRIBE_TABLE_SQL: &str = "\
SELECT column_name::text, data_type::text, is_nullable = 'YES', column_default::text
FROM information_schema.columns
WHERE table_schema = $1 AND table_name = $2
ORDER BY ordinal_position";

/// PostgreSQL implementation of [`SqlBackend`].
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Build the pool without connecting; connections open on first use.
    ///
    /// # Errors
    ///
    /// Returns error if the database URL cannot be parsed.
    pub fn connect_lazy(config: &Config) -> BackendResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max_connections)
            .acquire_timeout(config.pool_acquire_timeout)
            .connect_lazy(&config.database_url)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SqlBackend for PgBackend {
    async fn list_tables(&self, schema: Option<&str>) -> BackendResult<Vec<TableInfo>> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as(LIST_TABLES_SQL).bind(schema).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(schema, name, kind)| TableInfo { schema, name, kind })
            .collect())
    }

    async fn table_exists(&self, table: &TableName) -> BackendResult<bool> {
        Ok(sqlx::query_scalar::<_, bool>(TABLE_EXISTS_SQL)
            .bind(&table.schema)
            .bind(&table.name)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn describe_table(&self, table: &TableName) -> BackendResult<Vec<ColumnInfo>> {
        let rows: Vec<(String, String, bool, Option<String>)> = sqlx::query_as(DESCRIBE_TABLE_SQL)
            .bind(&table.schema)
            .bind(&table.name)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable, default)| ColumnInfo { name, data_type, nullable, default })
            .collect())
    }

    async fn query(
        &self,
        sql: &str,
        params: &[Value],
        options: QueryOptions,
    ) -> BackendResult<QueryRows> {
        let mut tx = self.pool.begin().await?;

        if options.read_only {
            sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
        }
        let timeout_ms = u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX);
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(timeout_ms.to_string())
            .execute(&mut *tx)
            .await?;

        let query = params.iter().fold(sqlx::query(sql), bind_json);

        let result = if options.kind == StatementKind::Write && !options.read_only {
            let done = query.execute(&mut *tx).await?;
            QueryRows { rows_affected: Some(done.rows_affected()), ..QueryRows::default() }
        } else {
            let mut columns = Vec::new();
            let mut rows = Vec::new();
            let mut truncated = false;
            {
                let mut stream = query.fetch(&mut *tx);
                while let Some(row) = stream.try_next().await? {
                    if columns.is_empty() {
                        columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    if rows.len() >= options.max_rows as usize {
                        truncated = true;
                        break;
                    }
                    rows.push(decode_row(&row));
                }
            }
            if columns.is_empty() {
                let described = (&mut *tx).describe(sql).await?;
                columns = described.columns().iter().map(|c| c.name().to_string()).collect();
            }
            QueryRows { columns, rows, truncated, rows_affected: None }
        };

        if options.read_only {
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }
        Ok(result)
    }

    async fn ping(&self) -> BackendResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Bind a JSON parameter with the closest Postgres type.
fn bind_json<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => query.bind(i),
            (None, Some(f)) => query.bind(f),
            (None, None) => query.bind(n.to_string()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(sqlx::types::Json(other.clone())),
    }
}

fn decode_row(row: &PgRow) -> Vec<Value> {
    row.columns()
        .iter()
        .map(|col| decode_column(row, col.ordinal(), col.type_info().name()).into_json())
        .collect()
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> ScalarValue {
    let decoded = match type_name {
        "BOOL" => scalar::<bool>(row, idx),
        "INT2" => scalar::<i16>(row, idx),
        "INT4" => scalar::<i32>(row, idx),
        "INT8" => scalar::<i64>(row, idx),
        "FLOAT4" => scalar::<f32>(row, idx),
        "FLOAT8" => scalar::<f64>(row, idx),
        "NUMERIC" => row
            .try_get::<Option<BigDecimal>, _>(idx)
            .map(|v| v.map_or(ScalarValue::Null, |d| ScalarValue::Numeric(d.to_string()))),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => scalar::<String>(row, idx),
        "DATE" => scalar::<NaiveDate>(row, idx),
        "TIME" => scalar::<NaiveTime>(row, idx),
        "TIMESTAMP" => scalar::<NaiveDateTime>(row, idx),
        "TIMESTAMPTZ" => scalar::<DateTime<Utc>>(row, idx),
        "UUID" => scalar::<uuid::Uuid>(row, idx),
        "BYTEA" => scalar::<Vec<u8>>(row, idx),
        "JSON" | "JSONB" => scalar::<Value>(row, idx),
        "BOOL[]" => array::<bool>(row, idx),
        "INT4[]" => array::<i32>(row, idx),
        "INT8[]" => array::<i64>(row, idx),
        "FLOAT4[]" => array::<f32>(row, idx),
        "FLOAT8[]" => array::<f64>(row, idx),
        "TEXT[]" | "VARCHAR[]" => array::<String>(row, idx),
        "UUID[]" => array::<uuid::Uuid>(row, idx),
        other => return ScalarValue::Unsupported(other.to_string()),
    };

    decoded.unwrap_or_else(|e| {
        tracing::debug!(column = idx, type_name, error = %e, "Column decode failed");
        ScalarValue::Unsupported(type_name.to_string())
    })
}

fn scalar<'r, T>(row: &'r PgRow, idx: usize) -> Result<ScalarValue, sqlx::Error>
where
    T: Decode<'r, Postgres> + Type<Postgres> + Into<ScalarValue>,
{
    row.try_get::<Option<T>, _>(idx).map(ScalarValue::from)
}

fn array<'r, T>(row: &'r PgRow, idx: usize) -> Result<ScalarValue, sqlx::Error>
where
    Vec<Option<T>>: Decode<'r, Postgres> + Type<Postgres>,
    T: Into<ScalarValue>,
{
    row.try_get::<Option<Vec<Option<T>>>, _>(idx).map(|v| {
        v.map_or(ScalarValue::Null, |items| {
            ScalarValue::Array(items.into_iter().map(ScalarValue::from).collect())
        })
    })
}
