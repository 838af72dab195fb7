use thiserror::Error;

use crate::models::Sport;

/// Fatal configuration problems. These are surfaced once at startup,
/// before any record is written.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{sport}: ensemble weights elo + efficiency + form sum to {sum}, expected 1.0")]
    WeightsDoNotSumToOne { sport: Sport, sum: f64 },

    #[error("{sport}: invalid value for {field}: {reason}")]
    InvalidValue {
        sport: Sport,
        field: &'static str,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid stored value in {table}.{column}: {value}")]
    InvalidStoredValue {
        table: &'static str,
        column: &'static str,
        value: String,
    },
}
