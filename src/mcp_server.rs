// src/mcp_server.rs

use amadeus_flights_mcp::{http, logging::init_logging, AmadeusServer, Settings, TransportKind};
use anyhow::Result;
use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};
use tracing::{debug, info};

const LOG_FILE_NAME: &str = "amadeus-flights-mcp.log";

async fn serve_stdio() -> Result<()> {
    // One credential set for the whole process, resolved on first search
    let server = AmadeusServer::from_env();
    let transport = stdio();

    info!("MCP server initialized, starting stdio service");

    // SDK handles initialization, tool discovery, and message routing
    let service = server.serve(transport).await?;

    info!("MCP service started, waiting for requests");
    service.waiting().await?;

    info!("MCP service shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();

    // Initialize logging before anything else
    if let Err(e) = init_logging(&settings.log_dir, LOG_FILE_NAME, &settings.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        // Continue without logging rather than failing
    }

    info!(
        transport = ?settings.transport,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Amadeus MCP server"
    );
    debug!(?settings, "Resolved settings");

    match settings.transport {
        TransportKind::Stdio => serve_stdio().await,
        TransportKind::Http => {
            info!(
                address = %settings.bind_address(),
                path = %settings.mcp_path(),
                "Starting streamable HTTP transport"
            );
            http::serve(&settings).await
        }
    }
}
