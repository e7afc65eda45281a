//! Static read/write classification of SQL statements.
//!
//! Text is parsed with the PostgreSQL dialect and the AST is inspected. When
//! the dialect cannot parse the text, a token-level keyword scan decides, and
//! anything it cannot prove harmless is treated as a write.

use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::{ExecutorError, ExecutorResult};

/// Whether a statement can modify state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
}

/// A single statement that passed the structural checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: StatementKind,
    /// Leading keyword, upper-cased (`SELECT`, `DELETE`, ...).
    pub keyword: String,
}

/// Keywords that begin a statement the scan accepts as a read.
const READ_LEADERS: &[&str] = &["SELECT", "WITH", "VALUES", "TABLE", "SHOW", "EXPLAIN"];

/// Keywords that mark a statement as mutating wherever they appear.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "REPLACE", "CREATE", "ALTER", "DROP",
    "TRUNCATE", "RENAME", "GRANT", "REVOKE", "COPY", "CALL", "DO", "VACUUM", "ANALYZE",
    "REINDEX", "CLUSTER", "LOCK", "COMMENT", "REFRESH", "SET", "RESET", "IMPORT", "LISTEN",
    "NOTIFY", "UNLISTEN", "PREPARE", "EXECUTE", "DEALLOCATE", "DISCARD", "SECURITY",
    "REASSIGN", "INTO", "BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "CHECKPOINT", "LOAD",
];

/// Classify exactly one statement.
///
/// # Errors
///
/// Returns `InvalidStatement` for empty text, more than one statement, or
/// text that cannot even be tokenized.
pub fn classify(sql: &str) -> ExecutorResult<Classified> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| ExecutorError::InvalidStatement(e.to_string()))?;
    let words = significant_tokens(&tokens);

    let Some(keyword) = words.iter().find_map(|t| match t {
        Token::Word(w) => Some(w.value.to_ascii_uppercase()),
        _ => None,
    }) else {
        return Err(ExecutorError::InvalidStatement("statement is empty".to_string()));
    };

    match Parser::parse_sql(&dialect, sql) {
        Ok(statements) => match statements.as_slice() {
            [] => Err(ExecutorError::InvalidStatement("statement is empty".to_string())),
            [statement] => Ok(Classified { kind: statement_kind(statement), keyword }),
            _ => Err(ExecutorError::InvalidStatement(
                "exactly one statement is allowed per call".to_string(),
            )),
        },
        Err(e) => {
            tracing::debug!(error = %e, "SQL parse failed, falling back to keyword scan");
            if statement_count(&words) > 1 {
                return Err(ExecutorError::InvalidStatement(
                    "exactly one statement is allowed per call".to_string(),
                ));
            }
            Ok(Classified { kind: scan_kind(&words), keyword })
        }
    }
}

/// Reject anything but a read.
///
/// # Errors
///
/// `ReadOnlyViolation` naming the leading keyword for writes, plus everything
/// [`classify`] rejects.
pub fn ensure_read_only(sql: &str) -> ExecutorResult<Classified> {
    let classified = classify(sql)?;
    match classified.kind {
        StatementKind::Read => Ok(classified),
        StatementKind::Write => {
            Err(ExecutorError::ReadOnlyViolation { statement: classified.keyword })
        }
    }
}

fn statement_kind(statement: &Statement) -> StatementKind {
    match statement {
        Statement::Query(query) => query_kind(query),
        Statement::Explain { analyze, statement, .. } => {
            // EXPLAIN ANALYZE executes its statement.
            if *analyze { statement_kind(statement) } else { StatementKind::Read }
        }
        Statement::ExplainTable { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. } => StatementKind::Read,
        _ => StatementKind::Write,
    }
}

fn query_kind(query: &Query) -> StatementKind {
    if !query.locks.is_empty() {
        // SELECT ... FOR UPDATE takes row locks.
        return StatementKind::Write;
    }
    if let Some(with) = &query.with {
        if with.cte_tables.iter().any(|cte| query_kind(&cte.query) == StatementKind::Write) {
            return StatementKind::Write;
        }
    }
    set_expr_kind(&query.body)
}

fn set_expr_kind(body: &SetExpr) -> StatementKind {
    match body {
        SetExpr::Select(select) if select.into.is_some() => StatementKind::Write,
        SetExpr::Select(_) | SetExpr::Values(_) | SetExpr::Table(_) => StatementKind::Read,
        SetExpr::Query(query) => query_kind(query),
        SetExpr::SetOperation { left, right, .. } => {
            if set_expr_kind(left) == StatementKind::Read && set_expr_kind(right) == StatementKind::Read {
                StatementKind::Read
            } else {
                StatementKind::Write
            }
        }
        _ => StatementKind::Write,
    }
}

fn significant_tokens(tokens: &[Token]) -> Vec<&Token> {
    tokens.iter().filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF)).collect()
}

/// Statements separated by `;`, ignoring a trailing terminator.
fn statement_count(tokens: &[&Token]) -> usize {
    tokens
        .split(|t| matches!(t, Token::SemiColon))
        .filter(|chunk| !chunk.is_empty())
        .count()
}

fn scan_kind(tokens: &[&Token]) -> StatementKind {
    let mut words = tokens.iter().filter_map(|t| match t {
        Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_ascii_uppercase()),
        _ => None,
    });

    let leads_with_read = words.next().is_some_and(|first| READ_LEADERS.contains(&first.as_str()));
    if leads_with_read && !words.any(|w| WRITE_KEYWORDS.contains(&w.as_str())) {
        StatementKind::Read
    } else {
        StatementKind::Write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(sql: &str) -> StatementKind {
        classify(sql).unwrap().kind
    }

    #[test]
    fn test_reads() {
        assert_eq!(kind("SELECT 1"), StatementKind::Read);
        assert_eq!(kind("select * from users where id = $1;"), StatementKind::Read);
        assert_eq!(kind("WITH t AS (SELECT 1) SELECT * FROM t"), StatementKind::Read);
        assert_eq!(kind("SELECT 1 UNION SELECT 2"), StatementKind::Read);
        assert_eq!(kind("VALUES (1), (2)"), StatementKind::Read);
        assert_eq!(kind("EXPLAIN SELECT * FROM users"), StatementKind::Read);
        assert_eq!(kind("SHOW search_path"), StatementKind::Read);
    }

    #[test]
    fn test_writes() {
        for sql in [
            "DELETE FROM t",
            "INSERT INTO t VALUES (1)",
            "UPDATE t SET a = 1",
            "DROP TABLE t",
            "CREATE TABLE t (id INT)",
            "TRUNCATE t",
            "GRANT SELECT ON t TO bob",
            "SELECT * INTO backup FROM t",
            "SELECT * FROM t FOR UPDATE",
            "EXPLAIN ANALYZE DELETE FROM t",
        ] {
            assert_eq!(kind(sql), StatementKind::Write, "{sql}");
        }
    }

    #[test]
    fn test_mutating_cte_is_write() {
        let sql = "WITH gone AS (DELETE FROM t RETURNING *) SELECT * FROM gone";
        assert_eq!(kind(sql), StatementKind::Write);
    }

    #[test]
    fn test_violation_names_leading_keyword() {
        let err = ensure_read_only("  delete from t").unwrap_err();
        assert!(matches!(err, ExecutorError::ReadOnlyViolation { ref statement } if statement == "DELETE"));
        assert!(ensure_read_only("SELECT 1").is_ok());
    }

    #[test]
    fn test_multiple_statements_rejected() {
        let err = classify("SELECT 1; DELETE FROM t").unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidStatement(_)));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(classify("   "), Err(ExecutorError::InvalidStatement(_))));
        assert!(matches!(classify("-- just a comment"), Err(ExecutorError::InvalidStatement(_))));
        assert!(matches!(classify(";"), Err(ExecutorError::InvalidStatement(_))));
    }

    #[test]
    fn test_scan_fallback() {
        let tokens = Tokenizer::new(&PostgreSqlDialect {}, "SELECT weird syntax here ???")
            .tokenize()
            .unwrap();
        assert_eq!(scan_kind(&significant_tokens(&tokens)), StatementKind::Read);

        let tokens = Tokenizer::new(&PostgreSqlDialect {}, "SELECT 1 ; DROP TABLE x")
            .tokenize()
            .unwrap();
        let significant = significant_tokens(&tokens);
        assert_eq!(statement_count(&significant), 2);
        assert_eq!(scan_kind(&significant), StatementKind::Write);
    }

    #[test]
    fn test_quoted_keywords_do_not_trip_scan() {
        let tokens = Tokenizer::new(&PostgreSqlDialect {}, r#"SELECT "delete" FROM "update""#)
            .tokenize()
            .unwrap();
        assert_eq!(scan_kind(&significant_tokens(&tokens)), StatementKind::Read);
    }
}
