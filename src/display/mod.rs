// src/display/mod.rs
//! Human-facing output for transition events

pub mod terminal;

pub use terminal::{print_header, TerminalSink};
