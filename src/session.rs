//! Per-session client cache
//!
//! Each session resolves its credentials once, on first need, and keeps the
//! resulting client for later calls. Sessions never share a client.

use crate::client::{AmadeusClient, FlightOffersApi};
use crate::config::{ConfigError, ConnectionConfig};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Builds an authenticated upstream client from a session's configuration
pub trait Connector: Send + Sync {
    fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn FlightOffersApi>, ConfigError>;
}

/// Connects to Amadeus with credentials resolved from the configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct AmadeusConnector;

impl Connector for AmadeusConnector {
    fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn FlightOffersApi>, ConfigError> {
        let credentials = config.credentials()?;
        info!(hostname = %credentials.hostname, "Resolved Amadeus credentials");
        Ok(Arc::new(AmadeusClient::new(credentials)?))
    }
}

/// One agent connection and its lazily built client
pub struct Session {
    id: String,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    client: OnceCell<Arc<dyn FlightOffersApi>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connected", &self.client.initialized())
            .finish()
    }
}

impl Session {
    pub fn new(id: impl Into<String>, config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            id: id.into(),
            config,
            connector,
            client: OnceCell::new(),
        }
    }

    /// Session backed by the real Amadeus connector
    pub fn amadeus(id: impl Into<String>, config: ConnectionConfig) -> Self {
        Self::new(id, config, Arc::new(AmadeusConnector))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The session's client, connecting on first use.
    ///
    /// A failed connection is not cached; the next call tries again.
    pub async fn client(&self) -> Result<Arc<dyn FlightOffersApi>, ConfigError> {
        let client = self
            .client
            .get_or_try_init(|| async {
                debug!(session_id = %self.id, "Connecting session to upstream provider");
                self.connector.connect(&self.config)
            })
            .await?;
        Ok(Arc::clone(client))
    }
}
