pub mod app_config;
pub mod config;
pub mod stations;
pub mod store;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use stations::{
    FuelType, LastKnownPrice, ParsedPrice, ParsedStation, PriceChange, PriceChangeKind, PriceKey,
    StationRecord, UnknownFuelType,
};
pub use store::PriceStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
