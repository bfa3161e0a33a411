// src/geofence/region.rs
//! Circular regions and the transitions they watch

use crate::error::{GeofenceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point on the globe in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A geofence transition type. Integer values match the platform constants
/// carried in event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Enter,
    Exit,
    /// Accepted in watch masks but never produced; there is no loiter timer.
    Dwell,
}

impl Transition {
    pub const fn code(self) -> i32 {
        match self {
            Transition::Enter => 1,
            Transition::Exit => 2,
            Transition::Dwell => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Transition::Enter),
            2 => Some(Transition::Exit),
            4 => Some(Transition::Dwell),
            _ => None,
        }
    }

    /// Transition implied by the new containment state
    pub fn from_containment(inside: bool) -> Self {
        if inside {
            Transition::Enter
        } else {
            Transition::Exit
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Enter => write!(f, "ENTER"),
            Transition::Exit => write!(f, "EXIT"),
            Transition::Dwell => write!(f, "DWELL"),
        }
    }
}

/// Bitmask of watched transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionMask(u8);

impl TransitionMask {
    pub const NONE: Self = Self(0);
    pub const ENTER: Self = Self(1);
    pub const EXIT: Self = Self(2);
    pub const DWELL: Self = Self(4);
    pub const ENTER_EXIT: Self = Self(1 | 2);
    const ALL_BITS: u8 = 1 | 2 | 4;

    /// Build a mask from raw bits; unknown bits are rejected.
    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL_BITS == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn watches(self, transition: Transition) -> bool {
        self.0 & transition.code() as u8 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Transition> for TransitionMask {
    fn from(transition: Transition) -> Self {
        Self(transition.code() as u8)
    }
}

impl std::ops::BitOr for TransitionMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// A named circular geofence. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    id: String,
    latitude: f64,
    longitude: f64,
    radius: f64,
    #[serde(default = "default_transitions")]
    transitions: TransitionMask,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

fn default_transitions() -> TransitionMask {
    TransitionMask::ENTER_EXIT
}

impl Region {
    /// Create a region watching ENTER and EXIT that never expires.
    pub fn new(id: impl Into<String>, center: Coordinate, radius_meters: f64) -> Result<Self> {
        let region = Self {
            id: id.into(),
            latitude: center.latitude,
            longitude: center.longitude,
            radius: radius_meters,
            transitions: TransitionMask::ENTER_EXIT,
            expires_at: None,
        };
        region.validate()?;
        Ok(region)
    }

    pub fn with_transitions(mut self, transitions: TransitionMask) -> Self {
        self.transitions = transitions;
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Expire `after` from now.
    pub fn expires_after(self, after: chrono::Duration) -> Self {
        self.expires_at(Utc::now() + after)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius
    }

    pub fn transitions(&self) -> TransitionMask {
        self.transitions
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    /// Regions can also arrive through deserialization, so the registry
    /// re-checks them on insert.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(GeofenceError::InvalidRegion("region id must not be empty".to_string()));
        }
        if !self.center().is_valid() {
            return Err(GeofenceError::InvalidRegion(format!(
                "region {} has invalid center ({}, {})",
                self.id, self.latitude, self.longitude
            )));
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(GeofenceError::InvalidRegion(format!(
                "region {} has invalid radius {}",
                self.id, self.radius
            )));
        }
        let bits = self.transitions.bits();
        if bits == 0 || TransitionMask::from_bits(bits).is_none() {
            return Err(GeofenceError::InvalidRegion(format!(
                "region {} has invalid transition mask {}",
                self.id, bits
            )));
        }
        Ok(())
    }
}

/// Parse a JSON array of regions, validating each one.
pub fn parse_regions(json: &str) -> Result<Vec<Region>> {
    let regions: Vec<Region> = serde_json::from_str(json)
        .map_err(|e| GeofenceError::Parse(format!("invalid region list: {}", e)))?;
    for region in &regions {
        region.validate()?;
    }
    Ok(regions)
}
