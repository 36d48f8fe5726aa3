//! CLI interface for amadeus-flights

use amadeus_flights_mcp::{search_flight_offers, ConnectionConfig, SearchRequest, Session};
use clap::{Parser, Subcommand};
use std::fs;

#[derive(Parser)]
#[command(name = "amadeus-flights")]
#[command(about = "Search Amadeus flight offers from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search for flight offers
    Search {
        /// Origin IATA code
        #[arg(short, long)]
        from: String,
        /// Destination IATA code
        #[arg(short, long)]
        to: String,
        /// Departure date (YYYY-MM-DD)
        #[arg(short, long)]
        date: String,
        /// Return date for round trips (YYYY-MM-DD)
        #[arg(short, long)]
        return_date: Option<String>,
        /// Number of adults
        #[arg(long, default_value = "1")]
        adults: i32,
        /// Number of children
        #[arg(long)]
        children: Option<i32>,
        /// Number of infants
        #[arg(long)]
        infants: Option<i32>,
        /// Travel class (ECONOMY, PREMIUM_ECONOMY, BUSINESS, FIRST)
        #[arg(long)]
        class: Option<String>,
        /// Airlines to include (comma-separated)
        #[arg(long)]
        include_airlines: Option<String>,
        /// Airlines to exclude (comma-separated)
        #[arg(long)]
        exclude_airlines: Option<String>,
        /// Only non-stop flights
        #[arg(long)]
        non_stop: bool,
        /// Currency code (ISO 4217)
        #[arg(long)]
        currency: Option<String>,
        /// Maximum price per traveler
        #[arg(long)]
        max_price: Option<i32>,
        /// Maximum number of offers
        #[arg(long, default_value = "250")]
        max: i32,
        /// Output file for JSON results
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            from,
            to,
            date,
            return_date,
            adults,
            children,
            infants,
            class,
            include_airlines,
            exclude_airlines,
            non_stop,
            currency,
            max_price,
            max,
            output,
        } => {
            let request = SearchRequest {
                return_date,
                children,
                infants,
                travel_class: class,
                included_airline_codes: include_airlines,
                excluded_airline_codes: exclude_airlines,
                non_stop: Some(non_stop),
                currency_code: currency,
                max_price,
                max: Some(max),
                ..SearchRequest::new(&from, &to, &date, adults)
            };

            let session = Session::amadeus("cli", ConnectionConfig::from_env());

            eprintln!("Searching for flights...");
            let json = match search_flight_offers(&session, &request).await {
                Ok(body) => {
                    let value: serde_json::Value = serde_json::from_str(body.get())?;
                    if let Some(offers) = value.get("data").and_then(|d| d.as_array()) {
                        eprintln!("Found {} flight offers", offers.len());
                    }
                    serde_json::to_string_pretty(&value)?
                }
                Err(e) => {
                    eprintln!("Search failed: {}", e);
                    std::process::exit(1);
                }
            };

            if let Some(output_file) = output {
                fs::write(&output_file, &json)?;
                eprintln!("Results saved to {}", output_file);
            } else {
                println!("{}", json);
            }
        }
    }

    Ok(())
}
