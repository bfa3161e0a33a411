// src/gps/source.rs
//! Position source boundary: the adapter trait and the fix queue adapters push into

use super::data::Fix;
use crate::error::{GeofenceError, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::Notify;

/// Cadence requested from a position source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubscriptionRequest {
    /// Minimum time between delivered fixes
    pub min_time: Duration,
    /// Minimum movement in meters between delivered fixes
    pub min_distance_m: f64,
}

/// Opaque handle identifying a live subscription on a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Something that produces position fixes.
///
/// Fixes are pushed: `subscribe` hands the source a [`FixSink`] which it
/// feeds until `unsubscribe` is called with the returned handle.
pub trait PositionSource: Send + Sync + 'static {
    /// Whether a provider is currently enabled and able to deliver fixes
    fn is_provider_enabled(&self) -> bool;

    fn subscribe(
        &self,
        request: SubscriptionRequest,
        sink: FixSink,
    ) -> impl Future<Output = Result<SubscriptionHandle>> + Send;

    fn unsubscribe(&self, handle: SubscriptionHandle) -> impl Future<Output = Result<()>> + Send;

    /// Single position request, independent of any subscription
    fn request_once(&self) -> impl Future<Output = Result<Fix>> + Send;
}

/// What to do when fixes arrive faster than they are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Reject the new fix and report an overrun
    #[default]
    Lossless,
    /// Drop the oldest queued fix in favour of the new one
    LatestOnly,
}

/// Item read from a fix queue, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Fix(Fix),
    ProviderChanged { enabled: bool },
    /// At least one fix was rejected because the queue was full. Read in
    /// the position of the first rejected fix, after everything queued
    /// ahead of it.
    Overrun,
}

#[derive(Debug)]
enum Update {
    Fix(Fix),
    ProviderChanged(bool),
    Overrun,
}

#[derive(Debug, Default)]
struct QueueState {
    updates: VecDeque<Update>,
    queued_fixes: usize,
    /// An overrun marker is queued; further rejections fold into it
    overrun_queued: bool,
    closed: bool,
}

#[derive(Debug)]
struct FixQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_depth: usize,
    policy: BackpressurePolicy,
}

impl FixQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }
}

/// Create a bounded fix queue. `max_depth` bounds queued fixes; provider
/// notifications are never dropped.
pub fn fix_channel(max_depth: usize, policy: BackpressurePolicy) -> (FixSink, FixReceiver) {
    let queue = Arc::new(FixQueue {
        state: Mutex::new(QueueState::default()),
        notify: Notify::new(),
        max_depth: max_depth.max(1),
        policy,
    });
    (
        FixSink {
            queue: Arc::clone(&queue),
        },
        FixReceiver { queue },
    )
}

/// Producer half handed to a [`PositionSource`].
#[derive(Debug, Clone)]
pub struct FixSink {
    queue: Arc<FixQueue>,
}

impl FixSink {
    /// Queue a fix.
    ///
    /// Fails with `Overrun` when the queue is full under the lossless policy
    /// and with `SubscriptionClosed` once the subscription is torn down.
    pub fn push_fix(&self, fix: Fix) -> Result<()> {
        {
            let mut state = self.queue.lock();
            if state.closed {
                return Err(GeofenceError::SubscriptionClosed);
            }

            if state.queued_fixes >= self.queue.max_depth {
                match self.queue.policy {
                    BackpressurePolicy::Lossless => {
                        if !state.overrun_queued {
                            state.overrun_queued = true;
                            state.updates.push_back(Update::Overrun);
                        }
                        drop(state);
                        self.queue.notify.notify_one();
                        return Err(GeofenceError::Overrun);
                    }
                    BackpressurePolicy::LatestOnly => {
                        if let Some(oldest) = state
                            .updates
                            .iter()
                            .position(|update| matches!(update, Update::Fix(_)))
                        {
                            state.updates.remove(oldest);
                            state.queued_fixes -= 1;
                        }
                    }
                }
            }

            state.updates.push_back(Update::Fix(fix));
            state.queued_fixes += 1;
        }
        self.queue.notify.notify_one();
        Ok(())
    }

    /// Report a provider being enabled or disabled.
    pub fn provider_changed(&self, enabled: bool) -> Result<()> {
        {
            let mut state = self.queue.lock();
            if state.closed {
                return Err(GeofenceError::SubscriptionClosed);
            }
            state.updates.push_back(Update::ProviderChanged(enabled));
        }
        self.queue.notify.notify_one();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    pub fn queued_fixes(&self) -> usize {
        self.queue.lock().queued_fixes
    }
}

/// Consumer half; there is exactly one per queue. Dropping it closes the queue.
#[derive(Debug)]
pub struct FixReceiver {
    queue: Arc<FixQueue>,
}

impl FixReceiver {
    /// Next queued item, or `None` once the queue is closed.
    pub async fn recv(&self) -> Option<SourceEvent> {
        loop {
            {
                let mut state = self.queue.lock();
                if state.closed {
                    return None;
                }
                match state.updates.pop_front() {
                    Some(Update::Fix(fix)) => {
                        state.queued_fixes -= 1;
                        return Some(SourceEvent::Fix(fix));
                    }
                    Some(Update::ProviderChanged(enabled)) => {
                        return Some(SourceEvent::ProviderChanged { enabled });
                    }
                    Some(Update::Overrun) => {
                        state.overrun_queued = false;
                        return Some(SourceEvent::Overrun);
                    }
                    None => {}
                }
            }
            // A notify_one issued between the check above and this await
            // leaves a permit, so no wakeup is lost.
            self.queue.notify.notified().await;
        }
    }

    /// Close the queue; pending items are discarded and producers get
    /// `SubscriptionClosed`.
    pub fn close(&self) {
        self.queue.close();
    }
}

impl Drop for FixReceiver {
    fn drop(&mut self) {
        self.queue.close();
    }
}
