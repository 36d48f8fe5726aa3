//! # Amadeus Flights MCP
//!
//! Exposes the Amadeus flight offer search as a tool for AI agents over the
//! model context protocol. Agent calls are validated and normalized locally,
//! then forwarded with credentials resolved per session.

pub mod client;
pub mod config;
pub mod http;
pub mod logging;
pub mod request;
pub mod server;
pub mod session;

use thiserror::Error;

// Re-export main types for convenience
pub use client::{AmadeusClient, FlightOffersApi, UpstreamError};
pub use config::{ConfigError, ConnectionConfig, Credentials, Hostname, Settings, TransportKind};
pub use request::{normalize, NormalizedParameters, ParamValue, SearchRequest, ValidationError};
pub use server::{flight_search_prompt, search_flight_offers, AmadeusServer, SERVICE_NAME};
pub use session::{AmadeusConnector, Connector, Session};

/// Any failure of a tool call
#[derive(Error, Debug)]
pub enum ToolError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ToolError {
    /// The `{"error": "..."}` string returned to the agent
    pub fn to_payload(&self) -> String {
        serde_json::json!({ "error": self.to_string() }).to_string()
    }
}
