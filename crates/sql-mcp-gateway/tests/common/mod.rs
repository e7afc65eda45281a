//! Shared fixtures for integration tests: an in-memory SQL backend and
//! helpers for driving the router.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;

use sql_mcp_gateway::clock::ManualClock;
use sql_mcp_gateway::config::Config;
use sql_mcp_gateway::error::{BackendError, BackendResult};
use sql_mcp_gateway::executor::{
    ColumnInfo, QueryOptions, QueryRows, SqlBackend, StatementKind, TableInfo, TableName,
};
use sql_mcp_gateway::server::transport::{HttpState, create_router};
use sql_mcp_gateway::storage::MemoryStorage;

pub const REDIRECT_URI: &str = "https://example.com/callback";

/// Any query containing this identifier makes the fake backend panic.
pub const PANIC_MARKER: &str = "boom_panic";

/// A statement the fake backend received.
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub options: QueryOptions,
}

/// In-memory [`SqlBackend`] with a `public.users` table and a `sales.orders` view.
#[derive(Debug, Default)]
pub struct FakeBackend {
    tables: Vec<TableInfo>,
    columns: HashMap<TableName, Vec<ColumnInfo>>,
    rows: HashMap<TableName, Vec<Vec<Value>>>,
    pub queries: Mutex<Vec<RecordedQuery>>,
    /// Fail this many upcoming queries with a transient error.
    pub transient_failures: AtomicUsize,
    /// Make every query wait this long.
    pub query_delay: Mutex<Option<Duration>>,
    pub unreachable: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Self {
        let users = TableName { schema: "public".into(), name: "users".into() };
        let orders = TableName { schema: "sales".into(), name: "orders".into() };

        let mut backend = Self::default();
        backend.tables = vec![
            TableInfo { schema: "public".into(), name: "users".into(), kind: "table".into() },
            TableInfo { schema: "sales".into(), name: "orders".into(), kind: "view".into() },
        ];
        backend.columns.insert(
            users.clone(),
            vec![
                column("id", "integer", false, Some("nextval('users_id_seq'::regclass)")),
                column("email", "text", false, None),
                column("balance", "numeric", true, None),
            ],
        );
        backend.columns.insert(orders.clone(), vec![column("order_id", "uuid", false, None)]);
        backend.rows.insert(
            users,
            (1..=20)
                .map(|i| vec![json!(i), json!(format!("user{i}@example.com")), json!("10.50")])
                .collect(),
        );
        backend.rows.insert(orders, Vec::new());
        backend
    }

    pub fn recorded(&self) -> Vec<RecordedQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.queries_delay() = Some(delay);
    }

    fn queries_delay(&self) -> std::sync::MutexGuard<'_, Option<Duration>> {
        self.query_delay.lock().unwrap()
    }

    fn table_rows(&self, sql: &str) -> Option<(&TableName, &Vec<Vec<Value>>)> {
        self.rows.iter().find(|(table, _)| sql.contains(&table.quoted()))
    }
}

fn column(name: &str, data_type: &str, nullable: bool, default: Option<&str>) -> ColumnInfo {
    ColumnInfo {
        name: name.into(),
        data_type: data_type.into(),
        nullable,
        default: default.map(Into::into),
    }
}

#[async_trait::async_trait]
impl SqlBackend for FakeBackend {
    async fn list_tables(&self, schema: Option<&str>) -> BackendResult<Vec<TableInfo>> {
        Ok(self
            .tables
            .iter()
            .filter(|t| schema.is_none_or(|s| t.schema == s))
            .cloned()
            .collect())
    }

    async fn table_exists(&self, table: &TableName) -> BackendResult<bool> {
        Ok(self.columns.contains_key(table))
    }

    async fn describe_table(&self, table: &TableName) -> BackendResult<Vec<ColumnInfo>> {
        Ok(self.columns.get(table).cloned().unwrap_or_default())
    }

    async fn query(
        &self,
        sql: &str,
        params: &[Value],
        options: QueryOptions,
    ) -> BackendResult<QueryRows> {
        self.queries.lock().unwrap().push(RecordedQuery {
            sql: sql.to_string(),
            params: params.to_vec(),
            options,
        });

        if sql.contains(PANIC_MARKER) {
            panic!("fake backend asked to panic");
        }

        let delay = *self.queries_delay();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::Connection("connection reset by peer".into()));
        }

        if options.kind == StatementKind::Write && !options.read_only {
            return Ok(QueryRows { rows_affected: Some(1), ..QueryRows::default() });
        }

        if let Some((table, rows)) = self.table_rows(sql) {
            let names = self.columns[table].iter().map(|c| c.name.clone()).collect();
            let cap = options.max_rows as usize;
            return Ok(QueryRows {
                columns: names,
                rows: rows.iter().take(cap).cloned().collect(),
                truncated: rows.len() > cap,
                rows_affected: None,
            });
        }

        Ok(QueryRows {
            columns: vec!["?column?".into()],
            rows: vec![vec![json!(1)]],
            truncated: false,
            rows_affected: None,
        })
    }

    async fn ping(&self) -> BackendResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(BackendError::Connection("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

/// A router wired to fakes, plus handles to drive them.
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<HttpState>,
    pub clock: Arc<ManualClock>,
    pub backend: Arc<FakeBackend>,
    pub storage: Arc<MemoryStorage>,
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

pub fn test_app() -> TestApp {
    test_app_with(Config::for_testing())
}

pub fn test_app_with(config: Config) -> TestApp {
    let clock = Arc::new(ManualClock::new(start_time()));
    let backend = Arc::new(FakeBackend::new());
    let storage = Arc::new(MemoryStorage::new(&config));
    let state = Arc::new(HttpState::with_clock(
        &config,
        backend.clone(),
        storage.clone(),
        clock.clone(),
    ));

    TestApp { router: create_router(state.clone()), state, clock, backend, storage }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Register a client for [`REDIRECT_URI`]; returns `(client_id, client_secret)`.
    pub async fn register_client(&self) -> (String, String) {
        let response = self
            .send(json_post("/register", &json!({
                "client_name": "Test Client",
                "redirect_uris": [REDIRECT_URI]
            })))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        (
            body["client_id"].as_str().unwrap().to_string(),
            body["client_secret"].as_str().unwrap().to_string(),
        )
    }

    /// Run `/authorize` and return the issued code.
    pub async fn authorize(&self, client_id: &str) -> String {
        let query = serde_urlencoded::to_string([
            ("client_id", client_id),
            ("redirect_uri", REDIRECT_URI),
            ("response_type", "code"),
            ("state", "xyz"),
        ])
        .unwrap();
        let response = self
            .send(Request::get(format!("/authorize?{query}")).body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let location = response.headers()[header::LOCATION].to_str().unwrap();
        let url = url::Url::parse(location).unwrap();
        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["state"], "xyz");
        pairs["code"].clone()
    }

    /// POST `/token` as a form; returns the raw response.
    pub async fn exchange(&self, client_id: &str, secret: &str, code: &str) -> Response<Body> {
        let form = serde_urlencoded::to_string([
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id),
            ("client_secret", secret),
        ])
        .unwrap();
        self.send(
            Request::post("/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
    }

    /// Full register, authorize and token flow; returns an access token.
    pub async fn access_token(&self) -> String {
        let (client_id, secret) = self.register_client().await;
        let code = self.authorize(&client_id).await;
        let response = self.exchange(&client_id, &secret, &code).await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["access_token"].as_str().unwrap().to_string()
    }

    /// POST a JSON-RPC body to `/sse` and collect the streamed messages.
    pub async fn rpc(&self, token: Option<&str>, body: &Value) -> Vec<Value> {
        let response = self.send(sse_post(token, body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        sse_messages(response).await
    }

    /// Call one tool and return its response message.
    pub async fn call_tool(&self, token: &str, name: &str, arguments: Value) -> Value {
        let mut messages = self
            .rpc(Some(token), &json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": name, "arguments": arguments}
            }))
            .await;
        assert_eq!(messages.len(), 1);
        messages.remove(0)
    }
}

pub fn json_post(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn sse_post(token: Option<&str>, body: &Value) -> Request<Body> {
    sse_post_raw(token, body.to_string())
}

pub fn sse_post_raw(token: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut request = Request::post("/sse")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "text/event-stream");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    request.body(body.into()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Parse the `data:` payloads of every `event: message` frame.
pub async fn sse_messages(response: Response<Body>) -> Vec<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    text.split("\n\n")
        .filter(|frame| frame.lines().any(|l| l == "event: message"))
        .map(|frame| {
            let data: Vec<&str> = frame
                .lines()
                .filter_map(|l| l.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            serde_json::from_str(&data.join("\n")).unwrap()
        })
        .collect()
}

/// Text payload of a successful tool call, parsed as JSON.
pub fn tool_json(message: &Value) -> Value {
    let text = message["result"]["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}
