// src/lib.rs
//! Geofence Monitor Library
//!
//! Evaluates raw position fixes against circular geofences and reports
//! enter/exit transitions. Fixes come from any [`PositionSource`]: gpsd,
//! an NMEA serial receiver, or a recorded fix log.

pub mod config;
pub mod dispatch;
pub mod display;
pub mod error;
pub mod foreground;
pub mod geofence;
pub mod gps;
pub mod monitor;

// Re-export main types for convenience
pub use config::{AppConfig, MonitorConfig};
pub use dispatch::{ChannelSink, DispatchSink, JsonLinesSink};
pub use error::{GeofenceError, Result};
pub use foreground::{AlwaysForeground, ForegroundFlag, ForegroundStateProvider};
pub use geofence::{
    Coordinate, GeofenceRegistry, Region, StatusCode, Transition, TransitionEvent, TransitionMask,
};
pub use gps::{BackpressurePolicy, Fix, FixSink, PositionSource, SubscriptionHandle, SubscriptionRequest};
pub use monitor::GeofenceMonitor;
