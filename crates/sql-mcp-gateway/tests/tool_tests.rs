//! End-to-end tool tests over the SSE transport against the in-memory backend.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::{Value, json};

use common::{TestApp, test_app, test_app_with, tool_json};
use sql_mcp_gateway::config::Config;
use sql_mcp_gateway::error::rpc_codes;

async fn authed() -> (TestApp, String) {
    let app = test_app();
    let token = app.access_token().await;
    (app, token)
}

fn assert_tool_error(message: &Value, code: i32, kind: &str) {
    assert_eq!(message["error"]["code"], code, "{message}");
    assert_eq!(message["error"]["data"]["kind"], kind);
}

fn text(message: &Value) -> &str {
    message["result"]["content"][0]["text"].as_str().unwrap()
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_tables() {
    let (app, token) = authed().await;

    let json = tool_json(&app.call_tool(&token, "list_tables", json!({})).await);
    assert_eq!(json["count"], 2);
    assert_eq!(json["tables"][0]["name"], "users");
    assert_eq!(json["tables"][1]["kind"], "view");
}

#[tokio::test]
async fn test_list_tables_by_schema() {
    let (app, token) = authed().await;

    let json = tool_json(&app.call_tool(&token, "list_tables", json!({"schema": "sales"})).await);
    assert_eq!(json["count"], 1);
    assert_eq!(json["tables"][0]["schema"], "sales");
}

#[tokio::test]
async fn test_list_tables_rejects_bad_schema() {
    let (app, token) = authed().await;

    let message = app.call_tool(&token, "list_tables", json!({"schema": "x; drop"})).await;
    assert_tool_error(&message, rpc_codes::INVALID_PARAMS, "validation_error");
}

#[tokio::test]
async fn test_list_tables_markdown() {
    let (app, token) = authed().await;

    let message =
        app.call_tool(&token, "list_tables", json!({"responseFormat": "markdown"})).await;
    let md = text(&message);
    assert!(md.starts_with("# Tables (2)"));
    assert!(md.contains("| public | users | table |"));
}

#[tokio::test]
async fn test_describe_table() {
    let (app, token) = authed().await;

    let json = tool_json(&app.call_tool(&token, "describe_table", json!({"table": "users"})).await);
    assert_eq!(json["schema"], "public");
    assert_eq!(json["table"], "users");
    assert_eq!(json["columns"].as_array().unwrap().len(), 3);
    assert_eq!(json["columns"][2]["dataType"], "numeric");
    assert_eq!(json["columns"][2]["nullable"], true);
}

#[tokio::test]
async fn test_describe_unknown_table_is_not_found() {
    let (app, token) = authed().await;

    let message = app.call_tool(&token, "describe_table", json!({"table": "public.ghosts"})).await;
    assert_tool_error(&message, rpc_codes::NOT_FOUND, "not_found");
}

#[tokio::test]
async fn test_describe_missing_argument() {
    let (app, token) = authed().await;

    let message = app.call_tool(&token, "describe_table", json!({})).await;
    assert_tool_error(&message, rpc_codes::INVALID_PARAMS, "validation_error");
}

#[tokio::test]
async fn test_sample_default_and_cap() {
    let (app, token) = authed().await;

    let json = tool_json(&app.call_tool(&token, "get_table_sample", json!({"table": "users"})).await);
    assert_eq!(json["rowCount"], 5);
    assert_eq!(json["truncated"], true);
    assert_eq!(json["columns"], json!(["id", "email", "balance"]));

    app.call_tool(&token, "get_table_sample", json!({"table": "users", "limit": 5000})).await;
    let last = app.backend.recorded().pop().unwrap();
    assert_eq!(last.params, vec![json!(100)]);
    assert_eq!(last.sql, r#"SELECT * FROM "public"."users" LIMIT $1"#);
    assert!(last.options.read_only);
}

#[tokio::test]
async fn test_sample_schema_reflects_configured_limits() {
    let mut config = Config::for_testing();
    config.limits.default_sample_rows = 3;
    config.limits.max_sample_rows = 25;
    let app = test_app_with(config);
    let token = app.access_token().await;

    let messages = app
        .rpc(Some(&token), &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .await;
    let tools = messages[0]["result"]["tools"].as_array().unwrap();
    let sample = tools.iter().find(|t| t["name"] == "get_table_sample").unwrap();
    assert_eq!(sample["inputSchema"]["properties"]["limit"]["maximum"], 25);
    assert_eq!(sample["inputSchema"]["properties"]["limit"]["default"], 3);

    app.call_tool(&token, "get_table_sample", json!({"table": "users", "limit": 5000})).await;
    assert_eq!(app.backend.recorded().pop().unwrap().params, vec![json!(25)]);
}

#[tokio::test]
async fn test_sample_zero_limit_rejected() {
    let (app, token) = authed().await;

    let message =
        app.call_tool(&token, "get_table_sample", json!({"table": "users", "limit": 0})).await;
    assert_tool_error(&message, rpc_codes::INVALID_PARAMS, "validation_error");
    assert!(app.backend.recorded().is_empty());
}

#[tokio::test]
async fn test_sample_rejects_injected_name() {
    let (app, token) = authed().await;

    let message = app
        .call_tool(&token, "get_table_sample", json!({"table": "users; DELETE FROM users"}))
        .await;
    assert_tool_error(&message, rpc_codes::INVALID_PARAMS, "validation_error");
    assert!(app.backend.recorded().is_empty());
}

// ─── execute_sql ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_execute_select() {
    let (app, token) = authed().await;

    let json = tool_json(&app.call_tool(&token, "execute_sql", json!({"sql": "SELECT 1"})).await);
    assert_eq!(json["rows"], json!([[1]]));
    assert_eq!(json["rowCount"], 1);
}

#[tokio::test]
async fn test_execute_passes_params() {
    let (app, token) = authed().await;

    app.call_tool(
        &token,
        "execute_sql",
        json!({"sql": "SELECT * FROM users WHERE id = $1 AND email = $2", "params": [3, "a@b.c"]}),
    )
    .await;

    let recorded = app.backend.recorded();
    assert_eq!(recorded[0].params, vec![json!(3), json!("a@b.c")]);
    assert_eq!(recorded[0].options.max_rows, 1000);
}

#[tokio::test]
async fn test_read_only_rejects_writes() {
    let (app, token) = authed().await;

    for sql in [
        "DELETE FROM users",
        "update users set email = 'x'",
        "DROP TABLE users",
        "WITH gone AS (DELETE FROM users RETURNING *) SELECT * FROM gone",
    ] {
        let message = app.call_tool(&token, "execute_sql", json!({"sql": sql})).await;
        assert_tool_error(&message, rpc_codes::PERMISSION_DENIED, "permission_error");
        assert_eq!(message["error"]["data"]["retryable"], false);
    }
    assert!(app.backend.recorded().is_empty());
}

#[tokio::test]
async fn test_multiple_statements_rejected() {
    let (app, token) = authed().await;

    let message =
        app.call_tool(&token, "execute_sql", json!({"sql": "SELECT 1; SELECT 2"})).await;
    assert_tool_error(&message, rpc_codes::INVALID_PARAMS, "validation_error");
}

#[tokio::test]
async fn test_empty_sql_rejected() {
    let (app, token) = authed().await;

    let message = app.call_tool(&token, "execute_sql", json!({"sql": "   "})).await;
    assert_tool_error(&message, rpc_codes::INVALID_PARAMS, "validation_error");
}

#[tokio::test]
async fn test_writes_allowed_when_not_read_only() {
    let mut config = Config::for_testing();
    config.read_only = false;
    let app = test_app_with(config);
    let token = app.access_token().await;

    let message = app
        .call_tool(&token, "execute_sql", json!({"sql": "DELETE FROM users WHERE id = 1"}))
        .await;
    assert_eq!(tool_json(&message)["rowsAffected"], 1);
    assert!(!app.backend.recorded()[0].options.read_only);
}

#[tokio::test]
async fn test_transient_failure_retried_once() {
    let (app, token) = authed().await;
    app.backend.transient_failures.store(1, Ordering::SeqCst);

    let message = app.call_tool(&token, "execute_sql", json!({"sql": "SELECT 1"})).await;
    assert!(message["result"].is_object());
    assert_eq!(app.backend.recorded().len(), 2);
}

#[tokio::test]
async fn test_persistent_failure_is_retryable_backend_error() {
    let (app, token) = authed().await;
    app.backend.transient_failures.store(2, Ordering::SeqCst);

    let message = app.call_tool(&token, "execute_sql", json!({"sql": "SELECT 1"})).await;
    assert_tool_error(&message, rpc_codes::TOOL_ERROR, "backend_error");
    assert_eq!(message["error"]["data"]["retryable"], true);
    assert_eq!(app.backend.recorded().len(), 2);
}

#[tokio::test]
async fn test_writes_are_not_retried() {
    let mut config = Config::for_testing();
    config.read_only = false;
    let app = test_app_with(config);
    let token = app.access_token().await;
    app.backend.transient_failures.store(1, Ordering::SeqCst);

    let message = app
        .call_tool(&token, "execute_sql", json!({"sql": "UPDATE users SET balance = 0"}))
        .await;
    assert_tool_error(&message, rpc_codes::TOOL_ERROR, "backend_error");
    assert_eq!(app.backend.recorded().len(), 1);
}

#[tokio::test]
async fn test_markdown_rows() {
    let (app, token) = authed().await;

    let message = app
        .call_tool(
            &token,
            "get_table_sample",
            json!({"table": "users", "limit": 2, "responseFormat": "markdown"}),
        )
        .await;
    let md = text(&message);
    assert!(md.contains("| id | email | balance |"));
    assert!(md.contains("user2@example.com"));
}

// ─── search / fetch ──────────────────────────────────────────────────────────

async fn search(app: &TestApp, token: &str, query: &str) -> Value {
    app.call_tool(token, "search", json!({"query": query})).await
}

#[tokio::test]
async fn test_search_then_fetch() {
    let (app, token) = authed().await;

    let hits = tool_json(&search(&app, &token, "list tables").await);
    let hit = &hits["results"][0];
    assert!(hit["snippet"].as_str().unwrap().contains("users"));

    let fetched = tool_json(&app.call_tool(&token, "fetch", json!({"id": hit["id"]})).await);
    assert_eq!(fetched["id"], hit["id"]);
    assert_eq!(fetched["title"], hit["title"]);

    let content: Value = serde_json::from_str(fetched["text"].as_str().unwrap()).unwrap();
    assert_eq!(content["count"], 2);
}

#[tokio::test]
async fn test_search_intents() {
    let (app, token) = authed().await;

    let hits = tool_json(&search(&app, &token, "describe sales.orders").await);
    assert!(hits["results"][0]["snippet"].as_str().unwrap().contains("order_id"));

    search(&app, &token, "sample users 3").await;
    assert_eq!(app.backend.recorded().last().unwrap().params, vec![json!(3)]);

    search(&app, &token, "sql: SELECT count(*) FROM users").await;
    assert_eq!(app.backend.recorded().last().unwrap().sql, "SELECT count(*) FROM users");
}

#[tokio::test]
async fn test_search_unrecognized_query() {
    let (app, token) = authed().await;

    let message = search(&app, &token, "what is the meaning of life").await;
    assert_tool_error(&message, rpc_codes::INVALID_PARAMS, "validation_error");
    assert!(message["error"]["message"].as_str().unwrap().contains("list tables"));
}

#[tokio::test]
async fn test_search_write_in_read_only_mode() {
    let (app, token) = authed().await;

    let message = search(&app, &token, "sql: DELETE FROM users").await;
    assert_tool_error(&message, rpc_codes::PERMISSION_DENIED, "permission_error");
}

#[tokio::test]
async fn test_fetch_unknown_id() {
    let (app, token) = authed().await;

    let message = app.call_tool(&token, "fetch", json!({"id": "no-such-result"})).await;
    assert_tool_error(&message, rpc_codes::NOT_FOUND, "not_found");
}

#[tokio::test]
async fn test_fetch_after_expiry() {
    let (app, token) = authed().await;

    let hits = tool_json(&search(&app, &token, "list tables").await);
    let id = hits["results"][0]["id"].clone();

    app.clock.advance(Duration::from_secs(599));
    assert!(app.call_tool(&token, "fetch", json!({"id": id})).await["result"].is_object());

    app.clock.advance(Duration::from_secs(1));
    let message = app.call_tool(&token, "fetch", json!({"id": id})).await;
    assert_tool_error(&message, rpc_codes::NOT_FOUND, "not_found");
}
