//! Database operations for `stations`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use petrowatch_core::StationRecord;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::DbError;

/// Rows per multi-row INSERT. Eight binds per row keeps this well under the
/// Postgres bind-parameter limit.
const UPSERT_CHUNK: usize = 1_000;

/// A row from the `stations` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StationRow {
    pub id: String,
    pub name: String,
    pub brand: Option<String>,
    pub address: Option<String>,
    pub estado_id: String,
    pub municipio_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inserts stations or refreshes their identity and location fields.
///
/// A station id repeated within `stations` is written once (first wins), since
/// one `ON CONFLICT` statement cannot touch the same row twice.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; the transaction is rolled back.
pub async fn upsert_stations(pool: &PgPool, stations: &[StationRecord]) -> Result<u64, DbError> {
    let mut seen = HashSet::new();
    let unique: Vec<&StationRecord> = stations
        .iter()
        .filter(|s| seen.insert(s.id.as_str()))
        .collect();
    if unique.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut written = 0;
    for chunk in unique.chunks(UPSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO stations \
                 (id, name, brand, address, estado_id, municipio_id, latitude, longitude) ",
        );
        builder.push_values(chunk, |mut row, station| {
            row.push_bind(&station.id)
                .push_bind(&station.name)
                .push_bind(&station.brand)
                .push_bind(&station.address)
                .push_bind(&station.estado_id)
                .push_bind(&station.municipio_id)
                .push_bind(station.latitude)
                .push_bind(station.longitude);
        });
        builder.push(
            " ON CONFLICT (id) DO UPDATE SET \
                 name         = EXCLUDED.name, \
                 brand        = EXCLUDED.brand, \
                 address      = EXCLUDED.address, \
                 estado_id    = EXCLUDED.estado_id, \
                 municipio_id = EXCLUDED.municipio_id, \
                 latitude     = EXCLUDED.latitude, \
                 longitude    = EXCLUDED.longitude, \
                 updated_at   = NOW()",
        );
        written += builder.build().execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;

    Ok(written)
}

/// Fetches one station by catalog id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if the query fails.
pub async fn get_station(pool: &PgPool, id: &str) -> Result<StationRow, DbError> {
    sqlx::query_as::<_, StationRow>(
        "SELECT id, name, brand, address, estado_id, municipio_id, \
                latitude, longitude, created_at, updated_at \
         FROM stations \
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}
