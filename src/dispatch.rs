// src/dispatch.rs
//! Dispatch sinks: where transition events go

use crate::geofence::event::{self, TransitionEvent};
use std::{
    io::Write,
    sync::{Mutex, PoisonError},
};
use tokio::sync::mpsc;

/// Consumer of transition events.
///
/// Called by the monitor while it holds the registry lock, so
/// implementations should hand the event off and return quickly.
pub trait DispatchSink: Send + Sync {
    fn deliver(&self, event: TransitionEvent);
}

impl<F> DispatchSink for F
where
    F: Fn(TransitionEvent) + Send + Sync,
{
    fn deliver(&self, event: TransitionEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TransitionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransitionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DispatchSink for ChannelSink {
    fn deliver(&self, event: TransitionEvent) {
        // A closed receiver means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

/// Writes each event as one encoded JSON payload per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> DispatchSink for JsonLinesSink<W> {
    fn deliver(&self, event: TransitionEvent) {
        let line = match event::encode(&event) {
            Ok(line) => line,
            Err(e) => {
                eprintln!("Failed to encode event: {}", e);
                return;
            }
        };

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            eprintln!("Failed to write event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::{StatusCode, Transition};
    use crate::gps::Fix;
    use std::sync::Arc;

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |event: TransitionEvent| seen.lock().unwrap().push(event)
        };

        sink.deliver(TransitionEvent::error(StatusCode::Overrun));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_channel_sink() {
        let (sink, mut rx) = ChannelSink::new();
        sink.deliver(TransitionEvent::error(StatusCode::NotAvailable));
        assert_eq!(
            rx.try_recv().unwrap(),
            TransitionEvent::error(StatusCode::NotAvailable)
        );

        drop(rx);
        // Does not panic without a receiver
        sink.deliver(TransitionEvent::error(StatusCode::NotAvailable));
    }

    #[test]
    fn test_json_lines_sink() {
        let sink = JsonLinesSink::new(Vec::new());
        let fix = Fix::now(38.8977, -77.0365, 5.0);
        let event = TransitionEvent::transition(Transition::Enter, vec!["home".into()], fix).unwrap();

        sink.deliver(event.clone());
        sink.deliver(TransitionEvent::error(StatusCode::Overrun));

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(event::decode(lines[0]).unwrap(), event);
        assert_eq!(
            event::decode(lines[1]).unwrap(),
            TransitionEvent::error(StatusCode::Overrun)
        );
    }
}
