//! Flight offer search request and its normalization into provider parameters

use rmcp::schemars;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Upper bound on seated travelers accepted by the provider
pub const MAX_SEATED_TRAVELERS: i32 = 9;

/// Default number of offers requested when the caller does not say
pub const DEFAULT_MAX_RESULTS: i32 = 250;

/// Input validation failures, detected before any credential or network access
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Adults must be between 1 and 9")]
    AdultsOutOfRange(i32),

    #[error("Total number of seated travelers (adults + children) cannot exceed 9")]
    TooManySeatedTravelers { adults: i32, children: i32 },

    #[error("Number of infants cannot exceed number of adults")]
    TooManyInfants { adults: i32, infants: i32 },
}

fn default_max() -> Option<i32> {
    Some(DEFAULT_MAX_RESULTS)
}

/// Agent-supplied flight offer search
#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[schemars(description = "IATA code of the departure city/airport (e.g., SYD for Sydney)")]
    pub origin_location_code: String,
    #[schemars(description = "IATA code of the destination city/airport (e.g., BKK for Bangkok)")]
    pub destination_location_code: String,
    #[schemars(description = "Departure date in ISO 8601 format (YYYY-MM-DD, e.g., 2023-05-02)")]
    pub departure_date: String,
    #[schemars(description = "Number of adult travelers (age 12+), must be 1-9")]
    pub adults: i32,
    #[schemars(description = "Return date in ISO 8601 format (YYYY-MM-DD), if round-trip is desired")]
    pub return_date: Option<String>,
    #[schemars(description = "Number of child travelers (age 2-11)")]
    pub children: Option<i32>,
    #[schemars(description = "Number of infant travelers (age <= 2)")]
    pub infants: Option<i32>,
    #[schemars(description = "Travel class (ECONOMY, PREMIUM_ECONOMY, BUSINESS, FIRST)")]
    pub travel_class: Option<String>,
    #[schemars(description = "Comma-separated IATA airline codes to include (e.g., '6X,7X')")]
    pub included_airline_codes: Option<String>,
    #[schemars(description = "Comma-separated IATA airline codes to exclude (e.g., '6X,7X')")]
    pub excluded_airline_codes: Option<String>,
    #[schemars(description = "If true, only non-stop flights are returned")]
    pub non_stop: Option<bool>,
    #[schemars(description = "ISO 4217 currency code (e.g., EUR for Euro)")]
    pub currency_code: Option<String>,
    #[schemars(description = "Maximum price per traveler, positive integer with no decimals")]
    pub max_price: Option<i32>,
    #[serde(default = "default_max")]
    #[schemars(description = "Maximum number of flight offers to return (default: 250)")]
    pub max: Option<i32>,
}

impl SearchRequest {
    /// One-way search with only the required fields set
    pub fn new(origin: &str, destination: &str, departure_date: &str, adults: i32) -> Self {
        Self {
            origin_location_code: origin.to_string(),
            destination_location_code: destination.to_string(),
            departure_date: departure_date.to_string(),
            adults,
            max: default_max(),
            ..Default::default()
        }
    }

    /// Check the passenger mix without touching any other field.
    ///
    /// The seated-travelers rule only applies when infants are present too,
    /// and zero counts are treated as absent.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let adults = self.adults;
        if !(1..=MAX_SEATED_TRAVELERS).contains(&adults) {
            return Err(ValidationError::AdultsOutOfRange(adults));
        }

        let children = present(self.children);
        let infants = present(self.infants);

        if let (Some(children), Some(_)) = (children, infants) {
            let seated = adults.checked_add(children);
            if seated.map_or(true, |n| n > MAX_SEATED_TRAVELERS) {
                return Err(ValidationError::TooManySeatedTravelers { adults, children });
            }
        }

        if let Some(infants) = infants {
            if infants > adults {
                return Err(ValidationError::TooManyInfants { adults, infants });
            }
        }

        Ok(())
    }
}

fn present(count: Option<i32>) -> Option<i32> {
    count.filter(|&n| n != 0)
}

fn meaningful_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn positive(value: Option<i32>) -> Option<i32> {
    value.filter(|&n| n > 0)
}

/// A single provider parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(String),
    Integer(i32),
    Flag(bool),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Integer(n) => write!(f, "{}", n),
            ParamValue::Flag(b) => write!(f, "{}", b),
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ParamValue::Text(s) => serializer.serialize_str(s),
            ParamValue::Integer(n) => serializer.serialize_i32(*n),
            ParamValue::Flag(b) => serializer.serialize_bool(*b),
        }
    }
}

/// Provider parameters in forwarding order, holding only meaningful values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedParameters {
    entries: Vec<(&'static str, ParamValue)>,
}

impl NormalizedParameters {
    fn push(&mut self, name: &'static str, value: ParamValue) {
        self.entries.push((name, value));
    }

    fn push_text(&mut self, name: &'static str, value: Option<String>) {
        if let Some(value) = value {
            self.push(name, ParamValue::Text(value));
        }
    }

    fn push_integer(&mut self, name: &'static str, value: Option<i32>) {
        if let Some(value) = value {
            self.push(name, ParamValue::Integer(value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ParamValue)> {
        self.entries.iter().map(|(key, value)| (*key, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name/value pairs as the query string expects them
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        self.iter().map(|(key, value)| (key, value.to_string())).collect()
    }
}

impl Serialize for NormalizedParameters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Validate a request and keep only the fields the provider accepts as meaningful.
///
/// `nonStop` is only ever forwarded as `true`; an explicit `false` is dropped.
pub fn normalize(request: &SearchRequest) -> Result<NormalizedParameters, ValidationError> {
    request.validate()?;

    let mut params = NormalizedParameters::default();
    params.push(
        "originLocationCode",
        ParamValue::Text(request.origin_location_code.clone()),
    );
    params.push(
        "destinationLocationCode",
        ParamValue::Text(request.destination_location_code.clone()),
    );
    params.push(
        "departureDate",
        ParamValue::Text(request.departure_date.clone()),
    );
    params.push("adults", ParamValue::Integer(request.adults));

    params.push_text("returnDate", meaningful_text(&request.return_date));
    params.push_integer("children", positive(request.children));
    params.push_integer("infants", positive(request.infants));
    params.push_text("travelClass", meaningful_text(&request.travel_class));
    params.push_text(
        "includedAirlineCodes",
        meaningful_text(&request.included_airline_codes),
    );
    params.push_text(
        "excludedAirlineCodes",
        meaningful_text(&request.excluded_airline_codes),
    );
    if request.non_stop == Some(true) {
        params.push("nonStop", ParamValue::Flag(true));
    }
    params.push_text("currencyCode", meaningful_text(&request.currency_code));
    params.push_integer("maxPrice", positive(request.max_price));
    params.push_integer("max", positive(request.max));

    Ok(params)
}
