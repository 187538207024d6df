//! Error type for the server side: transports, sinks, cache, and API.

use nmea_core::NmeaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Nmea(#[from] NmeaError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid address '{0}'")]
    Address(String),
    #[error("{0} transport is disabled in the configuration")]
    Disabled(&'static str),
}

pub type Result<T> = std::result::Result<T, ServerError>;
