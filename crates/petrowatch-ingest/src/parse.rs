//! Validation and grouping of raw catalog rows into [`ParsedStation`]s.
//!
//! Everything that reaches the change detector passes through here: prices
//! are positive decimals and fuel labels map onto [`FuelType`].

use std::str::FromStr;

use petrowatch_core::{FuelType, ParsedPrice, ParsedStation, StationRecord};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::catalog::RawStationPrice;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    /// Stations in first-seen order.
    pub stations: Vec<ParsedStation>,
    /// Rows dropped for an empty station number, unknown label, bad price,
    /// or a repeated fuel at the same station.
    pub skipped_rows: usize,
}

/// Groups one municipio's price rows by station.
///
/// A station whose every row was rejected is still returned with an empty
/// price list, so its identity is kept current.
#[must_use]
pub fn parse_station_prices(
    estado_id: &str,
    municipio_id: &str,
    rows: Vec<RawStationPrice>,
) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();

    for row in rows {
        let station_id = row.numero.trim().to_owned();
        if station_id.is_empty() {
            tracing::debug!(estado_id, municipio_id, "row without station number skipped");
            outcome.skipped_rows += 1;
            continue;
        }

        let index = match outcome
            .stations
            .iter()
            .position(|s| s.station.id == station_id)
        {
            Some(index) => index,
            None => {
                outcome.stations.push(ParsedStation {
                    station: station_record(&station_id, estado_id, municipio_id, &row),
                    prices: Vec::new(),
                });
                outcome.stations.len() - 1
            }
        };

        let Some(fuel_type) = FuelType::from_label(&row.subproducto) else {
            tracing::debug!(
                %station_id,
                label = row.subproducto.as_str(),
                "unmapped product label skipped"
            );
            outcome.skipped_rows += 1;
            continue;
        };

        let Some(price) = parse_price(&row.precio_vigente).filter(|p| *p > Decimal::ZERO) else {
            tracing::debug!(
                %station_id,
                %fuel_type,
                raw = %row.precio_vigente,
                "invalid price skipped"
            );
            outcome.skipped_rows += 1;
            continue;
        };

        let station = &mut outcome.stations[index];
        if station.prices.iter().any(|p| p.fuel_type == fuel_type) {
            tracing::debug!(%station_id, %fuel_type, "duplicate fuel row skipped");
            outcome.skipped_rows += 1;
            continue;
        }
        station.prices.push(ParsedPrice {
            station_id,
            fuel_type,
            raw_label: row.subproducto,
            price,
        });
    }

    outcome
}

fn station_record(
    station_id: &str,
    estado_id: &str,
    municipio_id: &str,
    row: &RawStationPrice,
) -> StationRecord {
    StationRecord {
        id: station_id.to_owned(),
        name: row.nombre.trim().to_owned(),
        brand: non_empty(row.marca.as_deref()),
        address: non_empty(row.direccion.as_deref()),
        estado_id: estado_id.to_owned(),
        municipio_id: municipio_id.to_owned(),
        latitude: row.latitud.as_ref().and_then(parse_coordinate),
        longitude: row.longitud.as_ref().and_then(parse_coordinate),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn parse_price(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::String(s) => s.trim().to_owned(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn parse_coordinate(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}
