//! Streamable HTTP transport
//!
//! JSON-RPC messages are POSTed to the MCP path and answered with a JSON
//! body. A session is opened by an `initialize` request, identified by the
//! `Mcp-Session-Id` header returned with it, and owns its own
//! [`AmadeusServer`] configured from the query string of that request.
//! Idle sessions expire and the table is bounded; unknown ids get a 404.

use crate::config::{ConnectionConfig, Settings};
use crate::server::{prompts, render_prompt, AmadeusServer, SERVICE_NAME};
use crate::session::{AmadeusConnector, Connector};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::model::{CallToolRequestParam, GetPromptRequestParam};
use rmcp::{Error as McpError, ServerHandler};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// Sessions idle for longer than this are dropped
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

struct SessionEntry {
    server: AmadeusServer,
    last_activity: Instant,
}

impl SessionEntry {
    fn new(server: AmadeusServer) -> Self {
        Self {
            server,
            last_activity: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_activity.elapsed() > ttl
    }
}

/// Shared transport state: the live sessions and how they connect upstream
pub struct HttpState {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    connector: Arc<dyn Connector>,
    ttl: Duration,
    max_sessions: usize,
}

impl HttpState {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_limits(connector, DEFAULT_SESSION_TTL, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_limits(connector: Arc<dyn Connector>, ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            connector,
            ttl,
            max_sessions,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    fn build_server(&self, id: &str, query: &HashMap<String, String>) -> AmadeusServer {
        let config = ConnectionConfig::from_query(query);
        debug!(
            session_id = %id,
            per_connection_config = config.has_overrides(),
            "Building server"
        );
        AmadeusServer::with_connector(id, config, self.connector.clone())
    }

    /// Look up a live session, refreshing its activity timestamp
    async fn find_session(&self, id: &str) -> Option<AmadeusServer> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        if entry.is_expired(self.ttl) {
            sessions.remove(id);
            info!(session_id = %id, "Session expired");
            return None;
        }
        entry.touch();
        Some(entry.server.clone())
    }

    /// Open a session under a fresh id from the query string of an initialize request
    async fn open_session(&self, query: &HashMap<String, String>) -> (String, AmadeusServer) {
        let id = Uuid::new_v4().to_string();
        let server = self.build_server(&id, query);

        let mut sessions = self.sessions.write().await;
        self.evict(&mut sessions);
        sessions.insert(id.clone(), SessionEntry::new(server.clone()));
        info!(session_id = %id, active_sessions = sessions.len(), "Created new session");
        (id, server)
    }

    /// Server for a header-less request that does not initialize; it is never stored
    fn transient_server(&self, query: &HashMap<String, String>) -> AmadeusServer {
        self.build_server("transient", query)
    }

    /// Drop expired sessions, then the least recently active ones until a new one fits
    fn evict(&self, sessions: &mut HashMap<String, SessionEntry>) {
        let ttl = self.ttl;
        sessions.retain(|_, entry| !entry.is_expired(ttl));

        while !sessions.is_empty() && sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_activity)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            sessions.remove(&oldest);
            warn!(session_id = %oldest, "Session table full, evicted least recently active session");
        }
    }

    async fn remove_session(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }
}

/// Build the router serving the MCP endpoint at `mcp_path` and `/health`
pub fn router(state: Arc<HttpState>, mcp_path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(mcp_path, post(handle_messages).delete(handle_delete))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the HTTP transport until interrupted
pub async fn serve(settings: &Settings) -> anyhow::Result<()> {
    let state = Arc::new(HttpState::new(Arc::new(AmadeusConnector)));
    let path = settings.mcp_path();
    let app = router(state, &path);

    let listener = tokio::net::TcpListener::bind(settings.bind_address()).await?;
    let addr = listener.local_addr()?;
    info!(address = %addr, path = %path, "Streamable HTTP transport listening");
    info!("  POST   http://{}{}   - MCP messages", addr, path);
    info!("  DELETE http://{}{}   - End session", addr, path);
    info!("  GET    http://{}/health - Health check", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP transport stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Whether the message (or any message of a batch) is an initialize request
fn opens_session(message: &Value) -> bool {
    let is_initialize = |m: &Value| m.get("method").and_then(Value::as_str) == Some("initialize");
    match message {
        Value::Array(batch) => batch.iter().any(is_initialize),
        message => is_initialize(message),
    }
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

async fn handle_messages(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    debug!(body_length = body.len(), "Received MCP message");

    let message: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to parse request: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(rpc_error(Value::Null, PARSE_ERROR, "Parse error")),
            )
                .into_response();
        }
    };

    let (session_id, server) = match session_header(&headers) {
        Some(id) => match state.find_session(&id).await {
            Some(server) => (Some(id), server),
            None => {
                warn!(session_id = %id, "Unknown or expired session");
                return (
                    StatusCode::NOT_FOUND,
                    Json(rpc_error(Value::Null, INVALID_REQUEST, "Session not found")),
                )
                    .into_response();
            }
        },
        None if opens_session(&message) => {
            let (id, server) = state.open_session(&query).await;
            (Some(id), server)
        }
        None => (None, state.transient_server(&query)),
    };

    let reply = match message {
        Value::Array(batch) => {
            let mut replies = Vec::new();
            for message in batch {
                if let Some(reply) = dispatch(&server, message).await {
                    replies.push(reply);
                }
            }
            (!replies.is_empty()).then_some(Value::Array(replies))
        }
        message => dispatch(&server, message).await,
    };

    let response = match reply {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    match session_id {
        Some(id) => with_session_header(response, &id),
        None => response,
    }
}

async fn handle_delete(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> StatusCode {
    let Some(id) = session_header(&headers) else {
        return StatusCode::BAD_REQUEST;
    };
    if state.remove_session(&id).await {
        info!(session_id = %id, "Session ended");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

fn mcp_failure(e: McpError) -> (i64, String) {
    (i64::from(e.code.0), e.message.to_string())
}

/// Handle one JSON-RPC message; notifications produce no reply
pub async fn dispatch(server: &AmadeusServer, message: Value) -> Option<Value> {
    let id = message.get("id").cloned();
    let Some(method) = message.get("method").and_then(Value::as_str) else {
        return Some(rpc_error(
            id.unwrap_or(Value::Null),
            INVALID_REQUEST,
            "Invalid request",
        ));
    };

    let Some(id) = id else {
        debug!(method, "Notification received");
        return None;
    };

    let params = message.get("params").cloned().unwrap_or(Value::Null);
    debug!(method, "Dispatching request");

    let outcome = match method {
        "initialize" => serde_json::to_value(server.get_info())
            .map_err(|e| (INTERNAL_ERROR, e.to_string())),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": AmadeusServer::tools() })),
        "tools/call" => call_tool(server, params).await,
        "prompts/list" => Ok(json!({ "prompts": prompts() })),
        "prompts/get" => get_prompt(params),
        other => Err((METHOD_NOT_FOUND, format!("Method not found: {}", other))),
    };

    Some(match outcome {
        Ok(result) => rpc_result(id, result),
        Err((code, message)) => rpc_error(id, code, &message),
    })
}

async fn call_tool(server: &AmadeusServer, params: Value) -> Result<Value, (i64, String)> {
    let request: CallToolRequestParam =
        serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, e.to_string()))?;
    let result = server.call_named_tool(request).await.map_err(mcp_failure)?;
    serde_json::to_value(result).map_err(|e| (INTERNAL_ERROR, e.to_string()))
}

fn get_prompt(params: Value) -> Result<Value, (i64, String)> {
    let GetPromptRequestParam { name, arguments } =
        serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, e.to_string()))?;
    let result = render_prompt(&name, arguments.as_ref()).map_err(mcp_failure)?;
    serde_json::to_value(result).map_err(|e| (INTERNAL_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FlightOffersApi;
    use crate::config::ConfigError;
    use crate::session::Connector;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RefusingConnector {
        calls: AtomicUsize,
    }

    impl Connector for RefusingConnector {
        fn connect(&self, _: &ConnectionConfig) -> Result<Arc<dyn FlightOffersApi>, ConfigError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ConfigError::MissingCredentials)
        }
    }

    fn server() -> AmadeusServer {
        AmadeusServer::with_connector(
            "test",
            ConnectionConfig::from_values(HashMap::new()),
            Arc::new(RefusingConnector::default()),
        )
    }

    fn text_of(reply: &Value) -> &str {
        reply["result"]["content"][0]["text"].as_str().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_initialize_reports_service() {
        let reply = dispatch(
            &server(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        )
        .await
        .unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["serverInfo"]["name"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn test_notifications_get_no_reply() {
        let reply = dispatch(
            &server(),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_tools_list_and_ping_call() {
        let server = server();
        let reply = dispatch(&server, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await
            .unwrap();
        let tools = reply["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);

        let reply = dispatch(
            &server,
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call",
                   "params": {"name": "ping", "arguments": {}}}),
        )
        .await
        .unwrap();
        assert_eq!(text_of(&reply), "pong");
    }

    #[tokio::test]
    async fn test_search_call_validation_error() {
        let reply = dispatch(
            &server(),
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call", "params": {
                "name": "search_flight_offers",
                "arguments": {"originLocationCode": "SYD", "destinationLocationCode": "BKK",
                              "departureDate": "2023-05-02", "adults": 10}
            }}),
        )
        .await
        .unwrap();
        assert_eq!(text_of(&reply), r#"{"error":"Adults must be between 1 and 9"}"#);
    }

    #[tokio::test]
    async fn test_search_call_missing_arguments() {
        let reply = dispatch(
            &server(),
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call",
                   "params": {"name": "search_flight_offers", "arguments": {"adults": 1}}}),
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_method_and_tool() {
        let server = server();
        let reply = dispatch(&server, json!({"jsonrpc": "2.0", "id": 6, "method": "resources/list"}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);

        let reply = dispatch(
            &server,
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call", "params": {"name": "book"}}),
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);

        let reply = dispatch(&server, json!({"jsonrpc": "2.0", "id": 8})).await.unwrap();
        assert_eq!(reply["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_prompts_over_rpc() {
        let server = server();
        let reply = dispatch(&server, json!({"jsonrpc": "2.0", "id": 9, "method": "prompts/list"}))
            .await
            .unwrap();
        assert_eq!(reply["result"]["prompts"][0]["name"], "flight_search_prompt");

        let reply = dispatch(
            &server,
            json!({"jsonrpc": "2.0", "id": 10, "method": "prompts/get", "params": {
                "name": "flight_search_prompt",
                "arguments": {"origin": "SYD", "destination": "BKK", "date": "2023-05-02"}
            }}),
        )
        .await
        .unwrap();
        let text = reply["result"]["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("from SYD to BKK on 2023-05-02"));
    }

    #[tokio::test]
    async fn test_sessions_open_only_on_initialize() {
        assert!(opens_session(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})));
        assert!(opens_session(&json!([
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "id": 1, "method": "initialize"}
        ])));
        assert!(!opens_session(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"})));
        assert!(!opens_session(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})));

        let state = HttpState::new(Arc::new(RefusingConnector::default()));
        let query = HashMap::new();
        let (first, _) = state.open_session(&query).await;
        let (second, _) = state.open_session(&query).await;
        assert_ne!(first, second);
        assert!(state.find_session(&first).await.is_some());
        assert!(state.find_session("attacker-chosen").await.is_none());
        assert_eq!(state.session_count().await, 2);

        assert!(state.remove_session(&first).await);
        assert!(!state.remove_session(&first).await);
        assert_eq!(state.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let state = HttpState::with_limits(
            Arc::new(RefusingConnector::default()),
            Duration::from_millis(1),
            DEFAULT_MAX_SESSIONS,
        );
        let (id, _) = state.open_session(&HashMap::new()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(state.find_session(&id).await.is_none());
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_session_table_is_bounded() {
        let state = HttpState::with_limits(
            Arc::new(RefusingConnector::default()),
            DEFAULT_SESSION_TTL,
            2,
        );
        let query = HashMap::new();
        let (first, _) = state.open_session(&query).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (second, _) = state.open_session(&query).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(state.find_session(&first).await.is_some());

        let (third, _) = state.open_session(&query).await;
        assert_eq!(state.session_count().await, 2);
        assert!(state.find_session(&second).await.is_none());
        assert!(state.find_session(&first).await.is_some());
        assert!(state.find_session(&third).await.is_some());

        for _ in 0..100 {
            state.open_session(&query).await;
        }
        assert_eq!(state.session_count().await, 2);
    }
}
