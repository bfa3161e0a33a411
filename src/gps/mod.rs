// src/gps/mod.rs
//! Position fixes and the sources that produce them

pub mod data;
pub mod gpsd;
pub mod nmea;
pub mod replay;
pub mod serial;
pub mod source;

pub use data::Fix;
pub use source::{
    fix_channel, BackpressurePolicy, FixReceiver, FixSink, PositionSource, SourceEvent,
    SubscriptionHandle, SubscriptionRequest,
};
