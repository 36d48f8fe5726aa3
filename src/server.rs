//! MCP tool surface: `ping`, `search_flight_offers` and the flight search prompt

use crate::config::ConnectionConfig;
use crate::request::{normalize, SearchRequest};
use crate::session::{Connector, Session};
use crate::ToolError;
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, GetPromptRequestParam, GetPromptResult,
        Implementation, JsonObject, ListPromptsResult, ListToolsResult, PaginatedRequestParam,
        Prompt, PromptArgument, PromptMessage, PromptMessageContent, PromptMessageRole,
        ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    tool, Error as McpError, RoleServer, ServerHandler,
};
use serde_json::value::RawValue;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Service name reported by the server and its health endpoint
pub const SERVICE_NAME: &str = "amadeus-mcp-api";

pub const FLIGHT_SEARCH_PROMPT: &str = "flight_search_prompt";

/// Validate, connect and search.
///
/// Validation runs first, so a rejected request never resolves credentials
/// or touches the network.
pub async fn search_flight_offers(
    session: &Session,
    request: &SearchRequest,
) -> Result<Box<RawValue>, ToolError> {
    let params = normalize(request)?;
    debug!("Built flight offers parameters successfully");

    let client = session.client().await?;

    info!(
        origin = request.origin_location_code.as_str(),
        destination = request.destination_location_code.as_str(),
        "Searching flights"
    );
    debug!(
        parameters = %serde_json::to_string(&params).unwrap_or_default(),
        "API parameters"
    );

    Ok(client.search(&params).await?)
}

/// Text of the flight search prompt
pub fn flight_search_prompt(origin: &str, destination: &str, date: &str) -> String {
    format!(
        "Please search for flights from {} to {} on {}.\n\n\
         I'd like to see options sorted by price, with information about the airlines,\n\
         departure/arrival times, and any layovers.",
        origin, destination, date
    )
}

/// Prompts advertised by the server
pub fn prompts() -> Vec<Prompt> {
    let argument = |name: &str, description: &str| PromptArgument {
        name: name.to_string(),
        description: Some(description.to_string()),
        required: Some(true),
    };
    vec![Prompt::new(
        FLIGHT_SEARCH_PROMPT,
        Some("Create a flight search prompt"),
        Some(vec![
            argument("origin", "Origin city or airport"),
            argument("destination", "Destination city or airport"),
            argument("date", "Departure date (YYYY-MM-DD)"),
        ]),
    )]
}

/// Render a prompt by name
pub fn render_prompt(name: &str, arguments: Option<&JsonObject>) -> Result<GetPromptResult, McpError> {
    if name != FLIGHT_SEARCH_PROMPT {
        return Err(McpError::invalid_params(format!("prompt not found: {}", name), None));
    }

    let arg = |key: &str| -> Result<String, McpError> {
        arguments
            .and_then(|args| args.get(key))
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .ok_or_else(|| McpError::invalid_params(format!("missing prompt argument: {}", key), None))
    };

    let text = flight_search_prompt(&arg("origin")?, &arg("destination")?, &arg("date")?);
    Ok(GetPromptResult {
        description: Some("Flight search request".to_string()),
        messages: vec![PromptMessage {
            role: PromptMessageRole::User,
            content: PromptMessageContent::text(text),
        }],
    })
}

/// Amadeus flight search MCP server, bound to one session
#[derive(Clone, Debug)]
pub struct AmadeusServer {
    session: Arc<Session>,
}

impl AmadeusServer {
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    /// Server for the whole process, configured from the environment
    pub fn from_env() -> Self {
        Self::new(Session::amadeus("stdio", ConnectionConfig::from_env()))
    }

    pub fn with_connector(id: &str, config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self::new(Session::new(id, config, connector))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Tools advertised by the server
    pub fn tools() -> Vec<Tool> {
        Self::tool_box().list()
    }

    /// Run a tool by name. Every transport routes tool calls through here.
    pub async fn call_named_tool(
        &self,
        CallToolRequestParam { name, arguments }: CallToolRequestParam,
    ) -> Result<CallToolResult, McpError> {
        let text = match name.as_ref() {
            "ping" => self.ping(),
            "search_flight_offers" => {
                let arguments = serde_json::Value::Object(arguments.unwrap_or_default());
                let request: SearchRequest = serde_json::from_value(arguments).map_err(|e| {
                    McpError::invalid_params(format!("Invalid arguments: {}", e), None)
                })?;
                self.search_flight_offers(request).await
            }
            other => {
                return Err(McpError::invalid_params(format!("tool not found: {}", other), None))
            }
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

#[tool(tool_box)]
impl AmadeusServer {
    /// Liveness probe that needs no credentials
    #[tool(description = "Simple ping tool to test server connectivity")]
    pub fn ping(&self) -> String {
        "pong".to_string()
    }

    #[tool(description = "Search for flight offers using the Amadeus API. Requires origin and destination IATA codes, a departure date (YYYY-MM-DD) and 1-9 adults; optional filters narrow the results. Returns the Amadeus response as JSON, or {\"error\": ...} on failure.")]
    pub async fn search_flight_offers(&self, #[tool(aggr)] request: SearchRequest) -> String {
        info!(
            session_id = self.session.id(),
            origin = request.origin_location_code.as_str(),
            destination = request.destination_location_code.as_str(),
            departure_date = request.departure_date.as_str(),
            return_date = request.return_date.as_deref(),
            adults = request.adults,
            children = request.children,
            infants = request.infants,
            travel_class = request.travel_class.as_deref(),
            "Flight offers search request received"
        );

        match search_flight_offers(&self.session, &request).await {
            Ok(body) => {
                info!(body_length = body.get().len(), "Flight offers search completed successfully");
                body.get().to_string()
            }
            Err(e) => {
                match &e {
                    ToolError::Validation(_) => warn!("Rejected flight offers request: {}", e),
                    _ => error!("Flight offers search failed: {}", e),
                }
                e.to_payload()
            }
        }
    }
}

impl ServerHandler for AmadeusServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some("Amadeus flight offer search. Use search_flight_offers with IATA airport codes and an ISO departure date; results are the raw Amadeus JSON response. Errors come back as {\"error\": \"...\"}.".into()),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_prompts()
                .build(),
            server_info: Implementation {
                name: SERVICE_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: PaginatedRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            next_cursor: None,
            tools: Self::tools(),
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.call_named_tool(request).await
    }

    async fn list_prompts(
        &self,
        _request: PaginatedRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(ListPromptsResult {
            next_cursor: None,
            prompts: prompts(),
        })
    }

    async fn get_prompt(
        &self,
        GetPromptRequestParam { name, arguments }: GetPromptRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        render_prompt(&name, arguments.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FlightOffersApi, UpstreamError};
    use crate::config::ConfigError;
    use crate::request::NormalizedParameters;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    enum Reply {
        Body(&'static str),
        Provider(&'static str),
        Unexpected(&'static str),
    }

    struct StubApi {
        reply: Reply,
        seen: Mutex<Vec<NormalizedParameters>>,
    }

    #[async_trait]
    impl FlightOffersApi for StubApi {
        async fn search(&self, params: &NormalizedParameters) -> Result<Box<RawValue>, UpstreamError> {
            self.seen.lock().unwrap().push(params.clone());
            match self.reply {
                Reply::Body(body) => Ok(RawValue::from_string(body.to_string())?),
                Reply::Provider(msg) => Err(UpstreamError::Provider(msg.to_string())),
                Reply::Unexpected(msg) => Err(UpstreamError::Unexpected(msg.to_string())),
            }
        }
    }

    struct StubConnector {
        api: Arc<StubApi>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubConnector {
        fn build(reply: Reply, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                api: Arc::new(StubApi {
                    reply,
                    seen: Mutex::new(Vec::new()),
                }),
                fail,
                calls: AtomicUsize::new(0),
            })
        }

        fn new(reply: Reply) -> Arc<Self> {
            Self::build(reply, false)
        }

        fn failing() -> Arc<Self> {
            Self::build(Reply::Body("{}"), true)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Connector for StubConnector {
        fn connect(&self, _: &ConnectionConfig) -> Result<Arc<dyn FlightOffersApi>, ConfigError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ConfigError::MissingCredentials);
            }
            Ok(self.api.clone())
        }
    }

    fn server(connector: Arc<StubConnector>) -> AmadeusServer {
        AmadeusServer::with_connector(
            "test",
            ConnectionConfig::from_values(HashMap::new()),
            connector,
        )
    }

    #[test]
    fn test_ping() {
        let connector = StubConnector::new(Reply::Body("{}"));
        assert_eq!(server(connector.clone()).ping(), "pong");
        assert_eq!(connector.calls(), 0);
    }

    #[tokio::test]
    async fn test_success_body_is_passed_through() {
        let body = r#"{"meta":{"count":1},"data":[{"id":"1","price":{"total":"120.50"}}]}"#;
        let connector = StubConnector::new(Reply::Body(body));
        let server = server(connector.clone());

        let result = server
            .search_flight_offers(SearchRequest::new("SYD", "BKK", "2023-05-02", 1))
            .await;
        assert_eq!(result, body);

        let seen = connector.api.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("originLocationCode"));
    }

    #[tokio::test]
    async fn test_validation_error_skips_connection() {
        let connector = StubConnector::new(Reply::Body("{}"));
        let server = server(connector.clone());

        let result = server
            .search_flight_offers(SearchRequest::new("SYD", "BKK", "2023-05-02", 10))
            .await;
        assert_eq!(result, r#"{"error":"Adults must be between 1 and 9"}"#);
        assert_eq!(connector.calls(), 0);
        assert!(connector.api.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_config_error_payload() {
        let connector = StubConnector::failing();
        let server = server(connector.clone());

        let result = server
            .search_flight_offers(SearchRequest::new("SYD", "BKK", "2023-05-02", 1))
            .await;
        let payload: serde_json::Value = serde_json::from_str(&result).unwrap();
        let message = payload["error"].as_str().unwrap();
        assert!(message.contains("AMADEUS_CLIENT_ID"));
        assert!(message.contains("AMADEUS_CLIENT_SECRET"));
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test]
    async fn test_upstream_errors_are_tagged() {
        let server_provider = server(StubConnector::new(Reply::Provider("[400]\nINVALID FORMAT")));
        let result = server_provider
            .search_flight_offers(SearchRequest::new("SYD", "BKK", "bad-date", 1))
            .await;
        let payload: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(payload["error"], "Amadeus API error: [400]\nINVALID FORMAT");

        let server_unexpected = server(StubConnector::new(Reply::Unexpected("connection reset")));
        let result = server_unexpected
            .search_flight_offers(SearchRequest::new("SYD", "BKK", "2023-05-02", 1))
            .await;
        assert_eq!(result, r#"{"error":"Unexpected error: connection reset"}"#);
    }

    #[tokio::test]
    async fn test_failing_call_does_not_poison_session() {
        let connector = StubConnector::new(Reply::Body(r#"{"data":[]}"#));
        let server = server(connector.clone());

        let _ = server
            .search_flight_offers(SearchRequest::new("SYD", "BKK", "2023-05-02", 0))
            .await;
        let result = server
            .search_flight_offers(SearchRequest::new("SYD", "BKK", "2023-05-02", 2))
            .await;
        assert_eq!(result, r#"{"data":[]}"#);
        assert_eq!(connector.calls(), 1);
    }

    #[test]
    fn test_prompt_rendering() {
        let text = flight_search_prompt("SYD", "BKK", "2023-05-02");
        assert!(text.starts_with("Please search for flights from SYD to BKK on 2023-05-02."));
        assert!(text.contains("sorted by price"));

        let mut args = JsonObject::new();
        args.insert("origin".to_string(), "SYD".into());
        args.insert("destination".to_string(), "BKK".into());
        args.insert("date".to_string(), "2023-05-02".into());
        let result = render_prompt(FLIGHT_SEARCH_PROMPT, Some(&args)).unwrap();
        assert_eq!(result.messages.len(), 1);

        args.remove("date");
        assert!(render_prompt(FLIGHT_SEARCH_PROMPT, Some(&args)).is_err());
        assert!(render_prompt("other", None).is_err());
    }

    fn call(name: &str, arguments: Option<JsonObject>) -> CallToolRequestParam {
        CallToolRequestParam {
            name: name.to_string().into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_every_listed_tool_is_callable() {
        let connector = StubConnector::new(Reply::Body(r#"{"data":[]}"#));
        let server = server(connector.clone());
        let arguments = serde_json::json!({
            "originLocationCode": "SYD",
            "destinationLocationCode": "BKK",
            "departureDate": "2023-05-02",
            "adults": 1
        });

        for tool in AmadeusServer::tools() {
            let result = server
                .call_named_tool(call(&tool.name, arguments.as_object().cloned()))
                .await;
            assert!(result.is_ok(), "{} is advertised but not dispatched", tool.name);
        }
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test]
    async fn test_call_named_tool_rejects_unknown_and_malformed() {
        let server = server(StubConnector::new(Reply::Body("{}")));

        let err = server.call_named_tool(call("book", None)).await.unwrap_err();
        assert!(err.message.contains("tool not found: book"));

        let mut args = JsonObject::new();
        args.insert("adults".to_string(), 1.into());
        let err = server
            .call_named_tool(call("search_flight_offers", Some(args)))
            .await
            .unwrap_err();
        assert!(err.message.starts_with("Invalid arguments"));
    }

    #[test]
    fn test_tools_are_listed() {
        let names: Vec<String> = AmadeusServer::tools()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        assert!(names.contains(&"ping".to_string()));
        assert!(names.contains(&"search_flight_offers".to_string()));
        assert_eq!(prompts().len(), 1);
    }
}
