// src/gps/serial.rs
//! NMEA receiver on a serial port

use super::data::Fix;
use super::nmea::{self, NmeaSentence};
use super::source::{FixSink, PositionSource, SubscriptionHandle, SubscriptionRequest};
use crate::error::{GeofenceError, Result};
use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinHandle,
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Open a serial port for line-oriented NMEA reading
pub fn open_serial(port: &str, baudrate: u32) -> Result<BufReader<SerialStream>> {
    let serial = tokio_serial::new(port, baudrate)
        .timeout(Duration::from_millis(1000))
        .open_native_async()
        .map_err(|e| GeofenceError::Connection(format!("Failed to open serial port {}: {}", port, e)))?;
    Ok(BufReader::new(serial))
}

/// Position source reading GGA sentences from a serial GPS receiver.
#[derive(Debug)]
pub struct SerialNmeaSource {
    port: String,
    baudrate: u32,
    request_timeout: Duration,
    next_id: AtomicU64,
    readers: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl SerialNmeaSource {
    pub fn new(port: impl Into<String>, baudrate: u32) -> Self {
        Self {
            port: port.into(),
            baudrate,
            request_timeout: Duration::from_secs(10),
            next_id: AtomicU64::new(1),
            readers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn read_loop(mut reader: BufReader<SerialStream>, sink: FixSink) {
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    if let NmeaSentence::Fix(fix) = nmea::parse_nmea_sentence(&line) {
                        if let Err(GeofenceError::SubscriptionClosed) = sink.push_fix(fix) {
                            return;
                        }
                    }
                }
                Err(e) => {
                    eprintln!("Error reading from serial port: {}", e);
                    break;
                }
            }
        }

        let _ = sink.provider_changed(false);
    }
}

impl PositionSource for SerialNmeaSource {
    fn is_provider_enabled(&self) -> bool {
        let listed = tokio_serial::available_ports()
            .map(|ports| ports.iter().any(|p| p.port_name == self.port))
            .unwrap_or(false);
        listed || Path::new(&self.port).exists()
    }

    async fn subscribe(&self, _request: SubscriptionRequest, sink: FixSink) -> Result<SubscriptionHandle> {
        let reader = open_serial(&self.port, self.baudrate)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(Self::read_loop(reader, sink));
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);

        Ok(SubscriptionHandle::new(id))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let task = self
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id());
        if let Some(task) = task {
            task.abort();
        }
        Ok(())
    }

    async fn request_once(&self) -> Result<Fix> {
        let mut reader = open_serial(&self.port, self.baudrate)?;

        tokio::time::timeout(self.request_timeout, read_until_fix(&mut reader))
            .await
            .map_err(|_| GeofenceError::Connection(format!("no fix on {} before timeout", self.port)))?
    }
}

async fn read_until_fix(reader: &mut BufReader<SerialStream>) -> Result<Fix> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(GeofenceError::Connection("serial port closed".to_string()));
        }
        if let NmeaSentence::Fix(fix) = nmea::parse_nmea_sentence(&line) {
            return Ok(fix);
        }
    }
}

/// List available serial ports
pub fn list_serial_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| GeofenceError::Other(format!("Failed to list serial ports: {}", e)))?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_port_is_not_enabled() {
        let source = SerialNmeaSource::new("/dev/does-not-exist-gps0", 9600);
        assert!(!source.is_provider_enabled());
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        assert!(matches!(
            open_serial("/dev/does-not-exist-gps0", 9600),
            Err(GeofenceError::Connection(_))
        ));
    }
}
