// src/gps/gpsd.rs
//! GPSD client and position source

use super::data::Fix;
use super::source::{FixSink, PositionSource, SubscriptionHandle, SubscriptionRequest};
use crate::error::{GeofenceError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    task::JoinHandle,
};

/// Accuracy reported when a TPV carries no error estimate
pub const UNKNOWN_ACCURACY_M: f64 = 50.0;

#[derive(Debug, Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(flatten)]
    data: HashMap<String, serde_json::Value>,
}

/// What a gpsd report line means for geofencing.
#[derive(Debug, Clone, PartialEq)]
pub enum GpsdReport {
    Fix(Fix),
    /// TPV without a 2D/3D fix
    NoFix,
    /// DEVICES listing; zero devices means no provider is enabled
    Devices(usize),
    Other,
}

/// Connect to a gpsd daemon and return a stream reader
pub async fn connect_gpsd(host: &str, port: u16) -> Result<BufReader<TcpStream>> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| GeofenceError::Connection(format!("Failed to connect to gpsd at {}:{}: {}", host, port, e)))?;

    // Send WATCH command to start receiving JSON data
    let watch_cmd = "?WATCH={\"enable\":true,\"json\":true}\n";
    stream
        .write_all(watch_cmd.as_bytes())
        .await
        .map_err(|e| GeofenceError::Connection(format!("Failed to send WATCH command: {}", e)))?;

    Ok(BufReader::new(stream))
}

/// Parse a single line of gpsd JSON data
pub fn parse_gpsd_json(line: &str) -> Result<GpsdReport> {
    let msg: GpsdMessage = serde_json::from_str(line)
        .map_err(|e| GeofenceError::Parse(format!("Failed to parse gpsd JSON: {}", e)))?;

    let report = match msg.class.as_str() {
        "TPV" => parse_tpv_message(&msg.data),
        "DEVICES" => {
            let count = msg
                .data
                .get("devices")
                .and_then(|v| v.as_array())
                .map_or(0, |devices| devices.len());
            GpsdReport::Devices(count)
        }
        _ => GpsdReport::Other,
    };

    Ok(report)
}

/// Parse TPV (Time Position Velocity) message
fn parse_tpv_message(msg_data: &HashMap<String, serde_json::Value>) -> GpsdReport {
    let field = |name: &str| msg_data.get(name).and_then(|v| v.as_f64());

    let mode = msg_data.get("mode").and_then(|v| v.as_u64()).unwrap_or(0);
    let (Some(lat), Some(lon)) = (field("lat"), field("lon")) else {
        return GpsdReport::NoFix;
    };
    if mode < 2 {
        return GpsdReport::NoFix;
    }

    // Prefer the combined horizontal estimate, fall back to the worse axis
    let accuracy = field("eph")
        .or_else(|| match (field("epx"), field("epy")) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        })
        .unwrap_or(UNKNOWN_ACCURACY_M);

    let timestamp = msg_data
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut fix = Fix::new(lat, lon, accuracy, timestamp);
    if let Some(alt) = field("altHAE").or_else(|| field("alt")) {
        fix = fix.with_altitude(alt);
    }
    GpsdReport::Fix(fix)
}

/// Position source backed by a gpsd daemon.
///
/// gpsd has no rate control, so the subscription cadence is left to the
/// monitor's own throttle.
#[derive(Debug)]
pub struct GpsdSource {
    host: String,
    port: u16,
    request_timeout: Duration,
    enabled: Arc<AtomicBool>,
    next_id: AtomicU64,
    readers: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl GpsdSource {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            request_timeout: Duration::from_secs(10),
            enabled: Arc::new(AtomicBool::new(true)),
            next_id: AtomicU64::new(1),
            readers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn read_loop(mut reader: BufReader<TcpStream>, sink: FixSink, enabled: Arc<AtomicBool>) {
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    eprintln!("gpsd closed the connection");
                    break;
                }
                Ok(_) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let delivered = match parse_gpsd_json(line) {
                        Ok(GpsdReport::Fix(fix)) => sink.push_fix(fix),
                        Ok(GpsdReport::Devices(count)) => {
                            let available = count > 0;
                            if enabled.swap(available, Ordering::Relaxed) != available {
                                sink.provider_changed(available)
                            } else {
                                Ok(())
                            }
                        }
                        Ok(_) => Ok(()),
                        Err(e) => {
                            eprintln!("Error parsing gpsd JSON: {}", e);
                            Ok(())
                        }
                    };

                    if let Err(GeofenceError::SubscriptionClosed) = delivered {
                        return;
                    }
                }
                Err(e) => {
                    eprintln!("Error reading from gpsd: {}", e);
                    break;
                }
            }
        }

        // A dropped connection is reported to the subscriber but does not
        // mark the daemon disabled; a later subscribe reconnects.
        let _ = sink.provider_changed(false);
    }
}

impl PositionSource for GpsdSource {
    fn is_provider_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn subscribe(&self, _request: SubscriptionRequest, sink: FixSink) -> Result<SubscriptionHandle> {
        let reader = connect_gpsd(&self.host, self.port).await?;
        self.enabled.store(true, Ordering::Relaxed);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(Self::read_loop(reader, sink, Arc::clone(&self.enabled)));
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
        let mut reader = connect_gpsd(&self.host, self.port).await?;

        tokio::time::timeout(self.request_timeout, read_until_fix(&mut reader))
            .await
            .map_err(|_| GeofenceError::Connection("no fix from gpsd before timeout".to_string()))?
    }
}

/// Read reports until the first TPV carrying a fix
async fn read_until_fix(reader: &mut BufReader<TcpStream>) -> Result<Fix> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(GeofenceError::Connection("gpsd closed the connection".to_string()));
        }
        if let Ok(GpsdReport::Fix(fix)) = parse_gpsd_json(line.trim()) {
            return Ok(fix);
        }
    }
}
