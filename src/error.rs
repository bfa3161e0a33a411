// src/error.rs
//! Error types for the geofence monitor

use std::fmt;

use crate::geofence::event::StatusCode;

pub type Result<T> = std::result::Result<T, GeofenceError>;

#[derive(Debug)]
pub enum GeofenceError {
    /// Bad id, radius or coordinates; rejected at registration time.
    InvalidRegion(String),
    TooManyRegions { limit: usize },
    NoProviderAvailable,
    ProviderUnavailable,
    SubscriptionTimeout,
    /// The fix queue is full; the fix was rejected.
    Overrun,
    /// Regions were added before `start` supplied a dispatch sink.
    NotStarted,
    /// The subscription this sink belonged to has been torn down.
    SubscriptionClosed,
    Decode(String),
    Io(std::io::Error),
    Serial(tokio_serial::Error),
    Json(serde_json::Error),
    Connection(String),
    Parse(String),
    Other(String),
}

impl GeofenceError {
    /// Status code reported in an error event for this failure, if it is
    /// one that can surface at runtime.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            GeofenceError::NoProviderAvailable | GeofenceError::ProviderUnavailable => {
                Some(StatusCode::NotAvailable)
            }
            GeofenceError::TooManyRegions { .. } => Some(StatusCode::TooManyGeofences),
            GeofenceError::Overrun => Some(StatusCode::Overrun),
            _ => None,
        }
    }
}

impl fmt::Display for GeofenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeofenceError::InvalidRegion(msg) => write!(f, "Invalid region: {}", msg),
            GeofenceError::TooManyRegions { limit } => {
                write!(f, "Too many regions: at most {} can be monitored", limit)
            }
            GeofenceError::NoProviderAvailable => write!(f, "No location provider is enabled"),
            GeofenceError::ProviderUnavailable => write!(f, "Location provider became unavailable"),
            GeofenceError::SubscriptionTimeout => {
                write!(f, "Timed out waiting for the position source subscription")
            }
            GeofenceError::Overrun => write!(f, "Fix queue overrun"),
            GeofenceError::NotStarted => write!(f, "Monitoring has not been started"),
            GeofenceError::SubscriptionClosed => write!(f, "Subscription is closed"),
            GeofenceError::Decode(msg) => write!(f, "Decode error: {}", msg),
            GeofenceError::Io(e) => write!(f, "IO error: {}", e),
            GeofenceError::Serial(e) => write!(f, "Serial error: {}", e),
            GeofenceError::Json(e) => write!(f, "JSON error: {}", e),
            GeofenceError::Connection(msg) => write!(f, "Connection error: {}", msg),
            GeofenceError::Parse(msg) => write!(f, "Parse error: {}", msg),
            GeofenceError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for GeofenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GeofenceError::Io(e) => Some(e),
            GeofenceError::Serial(e) => Some(e),
            GeofenceError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GeofenceError {
    fn from(error: std::io::Error) -> Self {
        GeofenceError::Io(error)
    }
}

impl From<tokio_serial::Error> for GeofenceError {
    fn from(error: tokio_serial::Error) -> Self {
        GeofenceError::Serial(error)
    }
}

impl From<serde_json::Error> for GeofenceError {
    fn from(error: serde_json::Error) -> Self {
        GeofenceError::Json(error)
    }
}

impl From<anyhow::Error> for GeofenceError {
    fn from(error: anyhow::Error) -> Self {
        GeofenceError::Other(error.to_string())
    }
}
