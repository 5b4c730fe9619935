use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Product categories reported per station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuelType {
    Regular,
    Premium,
    Diesel,
}

impl FuelType {
    pub const ALL: [FuelType; 3] = [FuelType::Regular, FuelType::Premium, FuelType::Diesel];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FuelType::Regular => "regular",
            FuelType::Premium => "premium",
            FuelType::Diesel => "diesel",
        }
    }

    /// Maps an upstream product label such as `"Regular (con contenido menor a 92 octanos)"`
    /// to a fuel type. Returns `None` for labels outside the closed set.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let lowered = label.trim().to_lowercase();
        if lowered.starts_with("regular") {
            Some(FuelType::Regular)
        } else if lowered.starts_with("premium") {
            Some(FuelType::Premium)
        } else if lowered.starts_with("diesel") || lowered.starts_with("diésel") {
            Some(FuelType::Diesel)
        } else {
            None
        }
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown fuel type: {0}")]
pub struct UnknownFuelType(pub String);

impl FromStr for FuelType {
    type Err = UnknownFuelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(FuelType::Regular),
            "premium" => Ok(FuelType::Premium),
            "diesel" => Ok(FuelType::Diesel),
            other => Err(UnknownFuelType(other.to_string())),
        }
    }
}

/// Composite key identifying one price series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriceKey {
    pub station_id: String,
    pub fuel_type: FuelType,
}

impl PriceKey {
    #[must_use]
    pub fn new(station_id: impl Into<String>, fuel_type: FuelType) -> Self {
        Self {
            station_id: station_id.into(),
            fuel_type,
        }
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.station_id, self.fuel_type)
    }
}

/// Identity and location of a fuel station as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    /// Stable catalog id (the permit number upstream).
    pub id: String,
    pub name: String,
    pub brand: Option<String>,
    pub address: Option<String>,
    pub estado_id: String,
    pub municipio_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A validated price for one fuel at one station.
///
/// Prices reaching this type are positive and carry a mapped fuel type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPrice {
    pub station_id: String,
    pub fuel_type: FuelType,
    /// Product label exactly as upstream reported it.
    pub raw_label: String,
    pub price: Decimal,
}

impl ParsedPrice {
    #[must_use]
    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.station_id.clone(), self.fuel_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedStation {
    pub station: StationRecord,
    pub prices: Vec<ParsedPrice>,
}

/// The most recent price recorded for a `(station, fuel)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastKnownPrice {
    pub station_id: String,
    pub fuel_type: FuelType,
    pub price: Decimal,
    pub changed_at: DateTime<Utc>,
}

impl LastKnownPrice {
    #[must_use]
    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.station_id.clone(), self.fuel_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceChangeKind {
    /// No previous price existed for the key.
    NewPrice,
    /// The price moved by more than the configured epsilon.
    ChangedPrice,
}

/// A price that must be written to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub station_id: String,
    pub fuel_type: FuelType,
    pub price: Decimal,
    pub previous_price: Option<Decimal>,
    pub kind: PriceChangeKind,
}
