// src/gps/replay.rs
//! Replays recorded fixes from a JSON-lines log

use super::data::Fix;
use super::source::{FixSink, PositionSource, SubscriptionHandle, SubscriptionRequest};
use crate::error::{GeofenceError, Result};
use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::task::JoinHandle;

/// Position source that plays back a fixed list of fixes.
///
/// Each subscription replays the whole log from the start, one fix per
/// `interval`, then reports the provider as gone.
#[derive(Debug)]
pub struct ReplaySource {
    fixes: Arc<Vec<Fix>>,
    interval: Duration,
    next_id: AtomicU64,
    players: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl ReplaySource {
    pub fn new(fixes: Vec<Fix>, interval: Duration) -> Self {
        Self {
            fixes: Arc::new(fixes),
            interval,
            next_id: AtomicU64::new(1),
            players: Mutex::new(HashMap::new()),
        }
    }

    /// Load a log with one JSON fix per line; blank lines and `#` comments are skipped.
    pub fn from_file(path: &Path, interval: Duration) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::new(parse_fix_log(&contents)?, interval))
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    async fn play(fixes: Arc<Vec<Fix>>, interval: Duration, sink: FixSink) {
        for fix in fixes.iter() {
            match sink.push_fix(fix.clone()) {
                Err(GeofenceError::SubscriptionClosed) => return,
                // The monitor reports the overrun itself
                Ok(()) | Err(_) => {}
            }
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }
        let _ = sink.provider_changed(false);
    }
}

/// Parse a JSON-lines fix log
pub fn parse_fix_log(contents: &str) -> Result<Vec<Fix>> {
    contents
        .lines()
        .enumerate()
        .map(|(n, line)| (n, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| {
            serde_json::from_str::<Fix>(line)
                .map_err(|e| GeofenceError::Parse(format!("fix log line {}: {}", n + 1, e)))
        })
        .collect()
}

impl PositionSource for ReplaySource {
    fn is_provider_enabled(&self) -> bool {
        !self.fixes.is_empty()
    }

    async fn subscribe(&self, _request: SubscriptionRequest, sink: FixSink) -> Result<SubscriptionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(Self::play(Arc::clone(&self.fixes), self.interval, sink));
        self.players
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);
        Ok(SubscriptionHandle::new(id))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let task = self
            .players
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id());
        if let Some(task) = task {
            task.abort();
        }
        Ok(())
    }

    async fn request_once(&self) -> Result<Fix> {
        self.fixes
            .first()
            .cloned()
            .ok_or(GeofenceError::NoProviderAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::source::{fix_channel, BackpressurePolicy, SourceEvent};
    use std::io::Write;

    const LOG: &str = r#"
# home run
{"lat":38.8977,"lon":-77.0365,"accuracy":5.0,"timestamp":"2024-05-01T12:00:00Z"}
{"lat":39.5,"lon":-78.0,"accuracy":8.0,"altitude":120.0,"timestamp":"2024-05-01T12:00:10Z"}
"#;

    #[test]
    fn test_parse_fix_log() {
        let fixes = parse_fix_log(LOG).unwrap();
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[1].altitude, Some(120.0));
    }

    #[test]
    fn test_parse_fix_log_reports_line() {
        let err = parse_fix_log("{\"lat\":1}\n").unwrap_err();
        assert!(err.to_string().contains("line 1"), "{}", err);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LOG.as_bytes()).unwrap();

        let source = ReplaySource::from_file(file.path(), Duration::ZERO).unwrap();
        assert_eq!(source.len(), 2);
        assert!(source.is_provider_enabled());
    }

    #[tokio::test]
    async fn test_replay_then_provider_gone() {
        let source = ReplaySource::new(parse_fix_log(LOG).unwrap(), Duration::ZERO);
        let (sink, rx) = fix_channel(8, BackpressurePolicy::Lossless);
        let request = SubscriptionRequest {
            min_time: Duration::ZERO,
            min_distance_m: 0.0,
        };
        let handle = source.subscribe(request, sink).await.unwrap();

        assert!(matches!(rx.recv().await, Some(SourceEvent::Fix(f)) if f.latitude == 38.8977));
        assert!(matches!(rx.recv().await, Some(SourceEvent::Fix(f)) if f.latitude == 39.5));
        assert_eq!(
            rx.recv().await,
            Some(SourceEvent::ProviderChanged { enabled: false })
        );
        source.unsubscribe(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_once() {
        let empty = ReplaySource::new(Vec::new(), Duration::ZERO);
        assert!(matches!(
            empty.request_once().await,
            Err(GeofenceError::NoProviderAvailable)
        ));

        let source = ReplaySource::new(parse_fix_log(LOG).unwrap(), Duration::ZERO);
        assert_eq!(source.request_once().await.unwrap().latitude, 38.8977);
    }
}
