// src/geofence/mod.rs
//! Regions, containment and transition detection

pub mod event;
pub mod geo;
pub mod region;
pub mod registry;

pub use event::{StatusCode, TransitionEvent};
pub use region::{parse_regions, Coordinate, Region, Transition, TransitionMask};
pub use registry::{Evaluation, GeofenceRegistry, RegionState};
