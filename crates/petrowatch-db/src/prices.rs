//! Database operations for `last_prices` and `price_history`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use petrowatch_core::{FuelType, LastKnownPrice, PriceChange, PriceChangeKind};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::DbError;

const INSERT_CHUNK: usize = 1_000;

#[derive(Debug, Clone, sqlx::FromRow)]
struct LastPriceRow {
    station_id: String,
    fuel_type: String,
    price: Decimal,
    changed_at: DateTime<Utc>,
}

impl TryFrom<LastPriceRow> for LastKnownPrice {
    type Error = DbError;

    fn try_from(row: LastPriceRow) -> Result<Self, Self::Error> {
        let fuel_type = row
            .fuel_type
            .parse::<FuelType>()
            .map_err(|_| DbError::InvalidFuelType(row.fuel_type.clone()))?;
        Ok(LastKnownPrice {
            station_id: row.station_id,
            fuel_type,
            price: row.price,
            changed_at: row.changed_at,
        })
    }
}

/// A row from the `price_history` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PriceHistoryRow {
    pub id: i64,
    pub station_id: String,
    pub fuel_type: String,
    pub price: Decimal,
    pub previous_price: Option<Decimal>,
    /// `new_price` or `changed_price`.
    pub change_kind: String,
    pub recorded_at: DateTime<Utc>,
}

fn change_kind_label(kind: PriceChangeKind) -> &'static str {
    match kind {
        PriceChangeKind::NewPrice => "new_price",
        PriceChangeKind::ChangedPrice => "changed_price",
    }
}

/// Returns the latest price of every `(station, fuel)` series.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::InvalidFuelType`]
/// if a stored row carries a fuel type outside the known set.
pub async fn all_last_prices(pool: &PgPool) -> Result<Vec<LastKnownPrice>, DbError> {
    let rows = sqlx::query_as::<_, LastPriceRow>(
        "SELECT station_id, fuel_type, price, changed_at FROM last_prices",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(LastKnownPrice::try_from).collect()
}

/// Appends `changes` to `price_history` and moves `last_prices` forward, in
/// one transaction. A `(station, fuel)` key repeated within `changes` is
/// written once (first wins).
///
/// Referenced stations must already exist.
///
/// Returns the number of history rows written.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; nothing is written in that case.
pub async fn insert_price_changes(pool: &PgPool, changes: &[PriceChange]) -> Result<u64, DbError> {
    let mut seen = HashSet::new();
    let unique: Vec<&PriceChange> = changes
        .iter()
        .filter(|c| seen.insert((c.station_id.as_str(), c.fuel_type)))
        .collect();
    if unique.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut written = 0;
    for chunk in unique.chunks(INSERT_CHUNK) {
        let mut history: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO price_history \
                 (station_id, fuel_type, price, previous_price, change_kind) ",
        );
        history.push_values(chunk, |mut row, change| {
            row.push_bind(&change.station_id)
                .push_bind(change.fuel_type.as_str())
                .push_bind(change.price)
                .push_bind(change.previous_price)
                .push_bind(change_kind_label(change.kind));
        });
        written += history.build().execute(&mut *tx).await?.rows_affected();

        let mut latest: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO last_prices (station_id, fuel_type, price) ");
        latest.push_values(chunk, |mut row, change| {
            row.push_bind(&change.station_id)
                .push_bind(change.fuel_type.as_str())
                .push_bind(change.price);
        });
        latest.push(
            " ON CONFLICT (station_id, fuel_type) DO UPDATE SET \
                 price      = EXCLUDED.price, \
                 changed_at = NOW()",
        );
        latest.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;

    tracing::debug!(written, "price changes recorded");
    Ok(written)
}

/// Returns the history of one series, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_price_history(
    pool: &PgPool,
    station_id: &str,
    fuel_type: FuelType,
    limit: i64,
) -> Result<Vec<PriceHistoryRow>, DbError> {
    let rows = sqlx::query_as::<_, PriceHistoryRow>(
        "SELECT id, station_id, fuel_type, price, previous_price, change_kind, recorded_at \
         FROM price_history \
         WHERE station_id = $1 AND fuel_type = $2 \
         ORDER BY recorded_at DESC, id DESC \
         LIMIT $3",
    )
    .bind(station_id)
    .bind(fuel_type.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
