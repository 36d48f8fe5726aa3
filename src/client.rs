//! HTTP client for the Amadeus flight offers API

use crate::config::{ConfigError, Credentials};
use crate::request::NormalizedParameters;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::time::Duration as StdDuration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

const TOKEN_PATH: &str = "/v1/security/oauth2/token";
const FLIGHT_OFFERS_PATH: &str = "/v2/shopping/flight-offers";
const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Seconds shaved off a token's lifetime so it is never used right at expiry
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 10;

/// Failures of the upstream call, rendered verbatim into the tool result
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Amadeus API error: {0}")]
    Provider(String),

    #[error("Unexpected error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// The flight offer search operation of the upstream provider
#[async_trait]
pub trait FlightOffersApi: Send + Sync {
    /// Search with exactly `params`, returning the response body untouched
    async fn search(&self, params: &NormalizedParameters) -> Result<Box<RawValue>, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Amadeus `errors` response body
#[derive(Debug, Deserialize)]
struct ProviderErrors {
    errors: Vec<ProviderIssue>,
}

#[derive(Debug, Deserialize)]
struct ProviderIssue {
    title: Option<String>,
    detail: Option<String>,
    source: Option<IssueSource>,
}

#[derive(Debug, Deserialize)]
struct IssueSource {
    parameter: Option<String>,
    pointer: Option<String>,
}

/// OAuth error body returned by the token endpoint
#[derive(Debug, Deserialize)]
struct OAuthError {
    error: Option<String>,
    error_description: Option<String>,
    title: Option<String>,
}

/// Render a provider rejection as `[status]` followed by one line per issue
fn describe_provider_error(status: StatusCode, body: &str) -> String {
    let mut description = format!("[{}]", status.as_u16());

    if let Ok(parsed) = serde_json::from_str::<ProviderErrors>(body) {
        for issue in parsed.errors {
            description.push('\n');
            let location = issue
                .source
                .and_then(|s| s.parameter.or(s.pointer));
            if let Some(location) = location {
                description.push_str(&format!("[{}] ", location));
            }
            match (issue.title, issue.detail) {
                (Some(title), Some(detail)) => description.push_str(&format!("{}: {}", title, detail)),
                (Some(text), None) | (None, Some(text)) => description.push_str(&text),
                (None, None) => description.push_str("Unknown error"),
            }
        }
    } else if let Ok(parsed) = serde_json::from_str::<OAuthError>(body) {
        let text = parsed
            .error_description
            .or(parsed.title)
            .or(parsed.error);
        if let Some(text) = text {
            description.push('\n');
            description.push_str(&text);
        }
    } else if !body.trim().is_empty() {
        description.push('\n');
        description.push_str(body.trim());
    }

    description
}

/// Authenticated client for one credential set
pub struct AmadeusClient {
    http_client: Client,
    base_url: String,
    credentials: Credentials,
    token: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for AmadeusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmadeusClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl AmadeusClient {
    /// Create a client for the environment named by the credentials' hostname
    pub fn new(credentials: Credentials) -> Result<Self, ConfigError> {
        let base_url = credentials.parsed_hostname()?.base_url().to_string();
        Self::with_base_url(credentials, base_url)
    }

    /// Create a client against an explicit API root
    pub fn with_base_url(credentials: Credentials, base_url: impl Into<String>) -> Result<Self, ConfigError> {
        debug!("Creating new Amadeus client");
        let http_client = Client::builder()
            .user_agent(concat!("amadeus-flights-mcp/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::ClientInit(e.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "Amadeus client created successfully");
        Ok(Self {
            http_client,
            base_url,
            credentials,
            token: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current access token, fetching a new one when missing or stale
    async fn access_token(&self) -> Result<String, UpstreamError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.value.clone());
        }

        debug!("Requesting Amadeus access token");
        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, TOKEN_PATH))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.api_key.as_str()),
                ("client_secret", self.credentials.api_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!(status = %status, "Access token request rejected");
            return Err(UpstreamError::Provider(describe_provider_error(status, &body)));
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        let lifetime = (token.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0);
        let access = AccessToken {
            value: token.access_token,
            expires_at: now + Duration::seconds(lifetime),
        };
        debug!(expires_at = %access.expires_at, "Access token obtained");

        let value = access.value.clone();
        *cached = Some(access);
        Ok(value)
    }
}

#[async_trait]
impl FlightOffersApi for AmadeusClient {
    #[instrument(level = "info", skip(self, params))]
    async fn search(&self, params: &NormalizedParameters) -> Result<Box<RawValue>, UpstreamError> {
        let token = self.access_token().await?;

        let url = format!("{}{}", self.base_url, FLIGHT_OFFERS_PATH);
        info!(url = %url, parameters = params.len(), "Making flight offers request to Amadeus");

        let start_time = std::time::Instant::now();
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .query(&params.query_pairs())
            .send()
            .await?;
        let status = response.status();
        let request_duration = start_time.elapsed();

        info!(
            status = %status,
            duration_ms = request_duration.as_millis(),
            "HTTP request completed"
        );

        let body = response.text().await?;
        if !status.is_success() {
            error!(status = %status, "Amadeus rejected the flight offers request");
            return Err(UpstreamError::Provider(describe_provider_error(status, &body)));
        }

        info!(body_length = body.len(), "Received flight offers response");
        let raw = RawValue::from_string(body)?;
        if !raw.get().trim_start().starts_with('{') {
            return Err(UpstreamError::Unexpected(
                "flight offers response is not a JSON object".to_string(),
            ));
        }
        Ok(raw)
    }
}
