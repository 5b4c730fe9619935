//! Typed access to the upstream fuel-price catalog.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Path | Query | Returns |
//! |------|-------|---------|
//! | `/estados` | none | states |
//! | `/municipios` | `EntidadFederativaId` | municipalities of one state |
//! | `/precios` | `EntidadFederativaId`, `MunicipioId` | one row per station and product |
//!
//! Every request goes through the client's circuit breaker, so a storm of
//! transient failures turns later calls into fast [`HttpError::CircuitOpen`]
//! errors. Client errors and malformed payloads do not trip it.

use petrowatch_http::{CircuitBreaker, HttpError, RequestOptions, ResilientHttpClient};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Estado {
    #[serde(rename = "EntidadFederativaId", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "Nombre")]
    pub nombre: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Municipio {
    #[serde(rename = "MunicipioId", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "Nombre")]
    pub nombre: String,
}

/// One upstream price row. Numeric fields are kept loosely typed because the
/// catalog emits them as strings or numbers depending on the record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawStationPrice {
    #[serde(rename = "Numero", deserialize_with = "string_or_number")]
    pub numero: String,
    #[serde(rename = "Nombre", default)]
    pub nombre: String,
    #[serde(rename = "Marca", default)]
    pub marca: Option<String>,
    #[serde(rename = "Direccion", default)]
    pub direccion: Option<String>,
    #[serde(rename = "Latitud", default)]
    pub latitud: Option<serde_json::Value>,
    #[serde(rename = "Longitud", default)]
    pub longitud: Option<serde_json::Value>,
    #[serde(rename = "SubProducto")]
    pub subproducto: String,
    #[serde(rename = "PrecioVigente")]
    pub precio_vigente: serde_json::Value,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s.trim().to_owned()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

pub struct CatalogClient {
    http: ResilientHttpClient,
    breaker: CircuitBreaker,
    base_url: String,
}

impl CatalogClient {
    pub fn new(base_url: &str, http: ResilientHttpClient, breaker: CircuitBreaker) -> Self {
        Self {
            http,
            breaker,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn http(&self) -> &ResilientHttpClient {
        &self.http
    }

    /// # Errors
    ///
    /// Any [`HttpError`] from the guarded request, including
    /// [`HttpError::CircuitOpen`] while the breaker is open.
    pub async fn fetch_estados(&self) -> Result<Vec<Estado>, HttpError> {
        let url = self.url("estados", &[])?;
        self.guarded_get(&url).await
    }

    /// # Errors
    ///
    /// Any [`HttpError`] from the guarded request.
    pub async fn fetch_municipios(&self, estado_id: &str) -> Result<Vec<Municipio>, HttpError> {
        let url = self.url("municipios", &[("EntidadFederativaId", estado_id)])?;
        self.guarded_get(&url).await
    }

    /// # Errors
    ///
    /// Any [`HttpError`] from the guarded request.
    pub async fn fetch_station_prices(
        &self,
        estado_id: &str,
        municipio_id: &str,
    ) -> Result<Vec<RawStationPrice>, HttpError> {
        let url = self.url(
            "precios",
            &[
                ("EntidadFederativaId", estado_id),
                ("MunicipioId", municipio_id),
            ],
        )?;
        self.guarded_get(&url).await
    }

    /// Only transient failures feed the breaker. A 404 or a malformed body
    /// still proves the upstream is answering.
    async fn guarded_get<T>(&self, url: &str) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        self.breaker
            .execute_with(
                || self.http.get(url, RequestOptions::default()),
                HttpError::is_retriable,
            )
            .await
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<String, HttpError> {
        let raw = format!("{}/{path}", self.base_url);
        let mut url = Url::parse(&raw).map_err(|e| HttpError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url.into())
    }
}
