// src/display/terminal.rs
//! Terminal event printer

use crate::{
    dispatch::DispatchSink,
    error::{GeofenceError, Result},
    geofence::{Region, Transition, TransitionEvent},
    gps::Fix,
};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::{
    io::{self, Write},
    sync::{Mutex, PoisonError},
};

/// Prints each transition event as one colored line.
pub struct TerminalSink<W: Write + Send = io::Stdout> {
    out: Mutex<W>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn render_event(&self, out: &mut W, event: &TransitionEvent) -> Result<()> {
        match event {
            TransitionEvent::Transition {
                transition,
                region_ids,
                location,
            } => {
                let color = match transition {
                    Transition::Enter => Color::Green,
                    Transition::Exit => Color::Yellow,
                    Transition::Dwell => Color::Cyan,
                };
                execute!(
                    out,
                    SetForegroundColor(color),
                    Print(format!("{:<5}", transition.to_string())),
                    ResetColor,
                    Print(format!(
                        " {} {}\n",
                        region_ids.join(", "),
                        format_location(location)
                    ))
                )
                .map_err(GeofenceError::Io)?;
            }
            TransitionEvent::Error { code } => {
                execute!(
                    out,
                    SetForegroundColor(Color::Red),
                    Print("ERROR"),
                    ResetColor,
                    Print(format!(" {} ({})\n", code, code.code()))
                )
                .map_err(GeofenceError::Io)?;
            }
        }
        out.flush().map_err(GeofenceError::Io)
    }
}

impl<W: Write + Send> DispatchSink for TerminalSink<W> {
    fn deliver(&self, event: TransitionEvent) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.render_event(&mut out, &event) {
            eprintln!("Failed to print event: {}", e);
        }
    }
}

fn format_location(fix: &Fix) -> String {
    format!(
        "at {}, {} ±{:.0} m ({})",
        Fix::format_coordinate(fix.latitude),
        Fix::format_coordinate(fix.longitude),
        fix.accuracy_meters,
        fix.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// Print the watch header: a banner followed by one line per region
pub fn print_header(out: &mut impl Write, source: &str, regions: &[Region]) -> Result<()> {
    execute!(
        out,
        SetForegroundColor(Color::Green),
        Print("=".repeat(60)),
        Print("\n"),
        Print("Geofence Monitor"),
        Print("\n"),
        Print("=".repeat(60)),
        Print("\n"),
        ResetColor,
        Print(format!("Source: {}\n", source)),
        SetForegroundColor(Color::Cyan),
        Print(format!("REGIONS ({}):\n", regions.len())),
        ResetColor
    )
    .map_err(GeofenceError::Io)?;

    for region in regions {
        let center = region.center();
        execute!(
            out,
            Print(format!(
                "  {:<16} {} {} r={:.0} m\n",
                region.id(),
                Fix::format_coordinate(center.latitude),
                Fix::format_coordinate(center.longitude),
                region.radius_meters()
            ))
        )
        .map_err(GeofenceError::Io)?;
    }

    execute!(out, Print("Press Ctrl+C to exit\n\n")).map_err(GeofenceError::Io)?;
    Ok(())
}
