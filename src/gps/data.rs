// src/gps/data.rs
//! Position fix data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geofence::Coordinate;

/// A single timestamped position sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    /// Horizontal accuracy radius in meters
    #[serde(rename = "accuracy")]
    pub accuracy_meters: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, accuracy_meters: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters,
            altitude: None,
            timestamp,
        }
    }

    /// Fix stamped with the current time
    pub fn now(latitude: f64, longitude: f64, accuracy_meters: f64) -> Self {
        Self::new(latitude, longitude, accuracy_meters, Utc::now())
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Latitude and longitude are finite and inside their valid ranges
    pub fn is_valid(&self) -> bool {
        self.coordinate().is_valid()
    }

    /// Format coordinate for display
    pub fn format_coordinate(coord: f64) -> String {
        format!("{:>12.6}°", coord)
    }
}
