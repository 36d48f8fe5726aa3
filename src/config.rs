//! Credential resolution and process settings
//!
//! Credentials are looked up through a [`ConnectionConfig`], which holds the
//! values a single session was configured with and optionally falls back to
//! the process environment. Nothing here mutates the environment.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use clap::{Parser, ValueEnum};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

pub const CLIENT_ID_VAR: &str = "AMADEUS_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "AMADEUS_CLIENT_SECRET";
pub const LEGACY_API_KEY_VAR: &str = "AMADEUS_API_KEY";
pub const LEGACY_API_SECRET_VAR: &str = "AMADEUS_API_SECRET";
pub const HOSTNAME_VAR: &str = "AMADEUS_HOSTNAME";
pub const DEFAULT_HOSTNAME: &str = "test";

/// Query parameter carrying the combined, base64-encoded configuration blob
pub const CONFIG_BLOB_PARAM: &str = "config";

/// camelCase spellings accepted from hosting platforms, mapped to variable names
const CONFIG_ALIASES: &[(&str, &str)] = &[
    ("amadeusClientId", CLIENT_ID_VAR),
    ("amadeusClientSecret", CLIENT_SECRET_VAR),
    ("amadeusApiKey", LEGACY_API_KEY_VAR),
    ("amadeusApiSecret", LEGACY_API_SECRET_VAR),
    ("amadeusHostname", HOSTNAME_VAR),
];

/// Configuration failures; never retried
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "Amadeus API credentials not configured. Please provide AMADEUS_CLIENT_ID and \
         AMADEUS_CLIENT_SECRET (or the legacy AMADEUS_API_KEY and AMADEUS_API_SECRET) \
         when connecting to this server."
    )]
    MissingCredentials,

    #[error("Failed to initialize Amadeus client: invalid hostname '{0}', expected 'test' or 'production'")]
    InvalidHostname(String),

    #[error("Failed to initialize Amadeus client: {0}")]
    ClientInit(String),
}

/// Amadeus environment the client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hostname {
    Test,
    Production,
}

impl Hostname {
    pub fn base_url(&self) -> &'static str {
        match self {
            Hostname::Test => "https://test.api.amadeus.com",
            Hostname::Production => "https://api.amadeus.com",
        }
    }
}

impl FromStr for Hostname {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "test" => Ok(Hostname::Test),
            "production" => Ok(Hostname::Production),
            _ => Err(ConfigError::InvalidHostname(s.to_string())),
        }
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hostname::Test => f.write_str("test"),
            Hostname::Production => f.write_str("production"),
        }
    }
}

/// Resolved provider credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub hostname: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("hostname", &self.hostname)
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials through `lookup`, primary names before legacy ones.
    ///
    /// Empty values count as unset.
    pub fn resolve<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve_first(|names| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        })
    }

    /// Resolve through `first`, which returns the first set value among `names`
    fn resolve_first<F>(first: F) -> Result<Self, ConfigError>
    where
        F: Fn(&[&str]) -> Option<String>,
    {
        let api_key = first(&[CLIENT_ID_VAR, LEGACY_API_KEY_VAR]);
        let api_secret = first(&[CLIENT_SECRET_VAR, LEGACY_API_SECRET_VAR]);
        let hostname = first(&[HOSTNAME_VAR]).unwrap_or_else(|| DEFAULT_HOSTNAME.to_string());

        match (api_key, api_secret) {
            (Some(api_key), Some(api_secret)) => Ok(Self {
                api_key,
                api_secret,
                hostname,
            }),
            _ => Err(ConfigError::MissingCredentials),
        }
    }

    pub fn parsed_hostname(&self) -> Result<Hostname, ConfigError> {
        self.hostname.parse()
    }
}

/// Configuration values visible to one session
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    values: HashMap<String, String>,
    inherit_env: bool,
}

impl ConnectionConfig {
    /// Process environment only, as used by the stdio transport
    pub fn from_env() -> Self {
        Self {
            values: HashMap::new(),
            inherit_env: true,
        }
    }

    /// Explicit values with no environment fallback
    pub fn from_values(values: HashMap<String, String>) -> Self {
        Self {
            values,
            inherit_env: false,
        }
    }

    /// Per-connection values from HTTP query parameters, over the environment.
    ///
    /// Fields may come individually or in the `config` blob; blob fields win.
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        let mut values = HashMap::new();
        for (key, value) in query {
            if let Some(name) = canonical_name(key) {
                values.insert(name.to_string(), value.clone());
            }
        }

        if let Some(blob) = query.get(CONFIG_BLOB_PARAM) {
            match decode_config_blob(blob) {
                Ok(decoded) => {
                    debug!(fields = decoded.len(), "Applying combined configuration blob");
                    values.extend(decoded);
                }
                Err(e) => warn!(error = %e, "Ignoring undecodable configuration blob"),
            }
        }

        Self {
            values,
            inherit_env: true,
        }
    }

    /// Set a single value, replacing any earlier one
    pub fn with_value(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }

    fn own_value(&self, name: &str) -> Option<String> {
        self.values
            .get(name)
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }

    fn env_value(&self, name: &str) -> Option<String> {
        if !self.inherit_env {
            return None;
        }
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    pub fn lookup(&self, name: &str) -> Option<String> {
        self.own_value(name).or_else(|| self.env_value(name))
    }

    /// Resolve credentials; this session's own values beat the environment
    /// even when only a legacy name was supplied here.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        Credentials::resolve_first(|names| {
            names
                .iter()
                .find_map(|name| self.own_value(name))
                .or_else(|| names.iter().find_map(|name| self.env_value(name)))
        })
    }

    /// Whether this session carries any of its own configuration
    pub fn has_overrides(&self) -> bool {
        !self.values.is_empty()
    }
}

fn canonical_name(key: &str) -> Option<&'static str> {
    [
        CLIENT_ID_VAR,
        CLIENT_SECRET_VAR,
        LEGACY_API_KEY_VAR,
        LEGACY_API_SECRET_VAR,
        HOSTNAME_VAR,
    ]
    .into_iter()
    .find(|name| *name == key)
    .or_else(|| {
        CONFIG_ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, name)| *name)
    })
}

/// Decode a base64 JSON object into canonical configuration names
fn decode_config_blob(blob: &str) -> Result<HashMap<String, String>, String> {
    // Query decoding turns an unescaped '+' into a space
    let blob = blob.trim().replace(' ', "+");
    let bytes = [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(&blob).ok())
        .ok_or_else(|| "configuration blob is not valid base64".to_string())?;

    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&bytes)
        .map_err(|e| format!("configuration blob is not a JSON object: {}", e))?;

    let mut values = HashMap::new();
    for (key, value) in object {
        let Some(name) = canonical_name(&key) else {
            continue;
        };
        let value = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => continue,
            other => other.to_string(),
        };
        values.insert(name.to_string(), value);
    }
    Ok(values)
}

/// Transport the MCP server is served over
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    Stdio,
    #[value(alias = "streamable-http")]
    Http,
}

/// Process settings, from flags or the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "amadeus-flights-mcp")]
#[command(about = "MCP server for Amadeus flight offer search")]
#[command(version)]
pub struct Settings {
    /// Transport to serve the MCP protocol over
    #[arg(long, env = "MCP_TRANSPORT", value_enum, default_value_t = TransportKind::Stdio)]
    pub transport: TransportKind,

    /// Bind address for the HTTP transport
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port for the HTTP transport
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Path of the MCP endpoint for the HTTP transport
    #[arg(long, env = "MCP_PATH", default_value = "/mcp")]
    pub path: String,

    /// Log filter (e.g. info, debug, amadeus_flights_mcp=trace)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Directory for rolling log files
    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,
}

impl Settings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// MCP path with a leading slash
    pub fn mcp_path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }
}
