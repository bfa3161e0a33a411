// src/monitor.rs
//! Geofence monitor: drives the registry from a position source

use crate::{
    config::MonitorConfig,
    dispatch::DispatchSink,
    error::{GeofenceError, Result},
    foreground::{AlwaysForeground, ForegroundStateProvider},
    geofence::{geo, GeofenceRegistry, Region, RegionState, Transition, TransitionEvent},
    gps::{
        fix_channel, Fix, FixReceiver, PositionSource, SourceEvent, SubscriptionHandle,
        SubscriptionRequest,
    },
};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::task::JoinHandle;

/// Registry, sink and liveness, guarded by one mutex. Every evaluation and
/// every registry mutation happens under this lock, and so does delivery.
struct Session {
    registry: GeofenceRegistry,
    sink: Option<Arc<dyn DispatchSink>>,
    /// Bumped on every subscribe and teardown; a worker only delivers while
    /// the generation it was spawned with is current.
    generation: u64,
    active: bool,
}

impl Session {
    fn dispatch(&self, event: TransitionEvent) {
        if let Some(sink) = &self.sink {
            sink.deliver(event);
        }
    }

    fn dispatch_error(&self, error: GeofenceError) {
        if let Some(code) = error.status_code() {
            self.dispatch(TransitionEvent::error(code));
        }
    }

    /// Evaluate one fix and deliver at most one ENTER and one EXIT event,
    /// ENTER first.
    fn process_fix(&mut self, fix: &Fix) {
        let mut entered = Vec::new();
        let mut exited = Vec::new();

        for change in self.registry.evaluate(fix) {
            if !change.watched {
                continue;
            }
            match change.transition() {
                Transition::Enter => entered.push(change.region_id),
                _ => exited.push(change.region_id),
            }
        }

        for (transition, region_ids) in [(Transition::Enter, entered), (Transition::Exit, exited)] {
            if region_ids.is_empty() {
                continue;
            }
            self.dispatch(TransitionEvent::Transition {
                transition,
                region_ids,
                location: fix.clone(),
            });
        }
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ActiveSubscription {
    handle: SubscriptionHandle,
    request: SubscriptionRequest,
    /// Session generation this subscription's worker delivers under
    generation: u64,
    receiver: Arc<FixReceiver>,
    worker: JoinHandle<()>,
}

type Lifecycle = Arc<tokio::sync::Mutex<Option<ActiveSubscription>>>;

/// Drops fixes that arrive sooner or closer than the cadence allows,
/// measured against the last fix that was let through.
#[derive(Debug)]
struct FixThrottle {
    min_time: Duration,
    min_distance_m: f64,
    last: Option<Fix>,
}

impl FixThrottle {
    fn new(request: SubscriptionRequest) -> Self {
        Self {
            min_time: request.min_time,
            min_distance_m: request.min_distance_m,
            last: None,
        }
    }

    fn admit(&mut self, fix: &Fix) -> bool {
        if !fix.is_valid() {
            return false;
        }

        if let Some(last) = &self.last {
            // Negative elapsed time means an out-of-order fix
            match (fix.timestamp - last.timestamp).to_std() {
                Ok(elapsed) if elapsed >= self.min_time => {}
                _ => return false,
            }
            if geo::distance(last.coordinate(), fix.coordinate()) < self.min_distance_m {
                return false;
            }
        }

        self.last = Some(fix.clone());
        true
    }
}

/// Hands a subscription back to the source once expiry has emptied the
/// registry. Runs as its own task: teardown awaits the worker while holding
/// the lifecycle lock, so the worker itself must never wait for that lock.
struct IdleRelease<S: PositionSource> {
    source: Arc<S>,
    lifecycle: Lifecycle,
    timeout: Duration,
}

impl<S: PositionSource> IdleRelease<S> {
    async fn run(self, generation: u64) {
        let mut lifecycle = self.lifecycle.lock().await;

        // A lifecycle call got here first and already released it
        if lifecycle.as_ref().map_or(true, |active| active.generation != generation) {
            return;
        }

        if let Some(active) = lifecycle.take() {
            active.receiver.close();
            // Nobody to report to; a source that misses the unsubscribe
            // still sees the closed queue on its next push.
            let _ = tokio::time::timeout(self.timeout, self.source.unsubscribe(active.handle)).await;
        }
    }
}

async fn run_worker<S: PositionSource>(
    session: Arc<Mutex<Session>>,
    receiver: Arc<FixReceiver>,
    generation: u64,
    mut throttle: FixThrottle,
    release: IdleRelease<S>,
) {
    while let Some(item) = receiver.recv().await {
        let mut state = lock(&session);
        if state.generation != generation {
            break;
        }

        match item {
            SourceEvent::Fix(fix) => {
                if !throttle.admit(&fix) {
                    continue;
                }
                state.process_fix(&fix);

                if state.registry.is_empty() {
                    // Every region expired: idle from here on
                    state.generation += 1;
                    state.active = false;
                    drop(state);
                    tokio::spawn(release.run(generation));
                    break;
                }
            }
            SourceEvent::ProviderChanged { enabled: false } => {
                state.dispatch_error(GeofenceError::ProviderUnavailable);
            }
            SourceEvent::ProviderChanged { enabled: true } => {}
            SourceEvent::Overrun => {
                state.dispatch_error(GeofenceError::Overrun);
            }
        }
    }
}

/// Geofence monitor.
///
/// Idle while no regions are registered; Active, with a live subscription on
/// the position source, while at least one is.
pub struct GeofenceMonitor<S: PositionSource> {
    source: Arc<S>,
    config: MonitorConfig,
    foreground: Arc<dyn ForegroundStateProvider>,
    session: Arc<Mutex<Session>>,
    /// Serializes start/add/remove/stop; holds the live subscription.
    lifecycle: Lifecycle,
}

impl<S: PositionSource> GeofenceMonitor<S> {
    /// Create a monitor for a host that is always in the foreground
    pub fn new(source: Arc<S>, config: MonitorConfig) -> Self {
        Self::with_foreground(source, config, Arc::new(AlwaysForeground))
    }

    pub fn with_foreground(
        source: Arc<S>,
        config: MonitorConfig,
        foreground: Arc<dyn ForegroundStateProvider>,
    ) -> Self {
        let registry = GeofenceRegistry::with_capacity_limit(config.max_regions);
        Self {
            source,
            config,
            foreground,
            session: Arc::new(Mutex::new(Session {
                registry,
                sink: None,
                generation: 0,
                active: false,
            })),
            lifecycle: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Start monitoring `regions`, delivering events to `sink`.
    ///
    /// Fails with `NoProviderAvailable` when the source has no enabled
    /// provider. Calling it again while active replaces the sink and adds
    /// the regions. With no regions the sink is recorded and the monitor
    /// stays idle.
    pub async fn start(&self, regions: Vec<Region>, sink: Arc<dyn DispatchSink>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        if !self.source.is_provider_enabled() {
            return Err(GeofenceError::NoProviderAvailable);
        }

        let (previous_registry, previous_sink) = {
            let mut session = lock(&self.session);
            let staged = Self::stage(&session.registry, regions)?;
            let previous_registry = std::mem::replace(&mut session.registry, staged);
            let previous_sink = session.sink.replace(sink);
            (previous_registry, previous_sink)
        };

        if let Err(e) = self.reconcile(&mut lifecycle).await {
            let mut session = lock(&self.session);
            session.registry = previous_registry;
            session.sink = previous_sink;
            return Err(e);
        }

        Ok(())
    }

    /// Register more regions. An empty list is a no-op.
    ///
    /// Fails with `NotStarted` only if `start` has never supplied a sink;
    /// after `stop` the last sink is reused.
    pub async fn add_regions(&self, regions: Vec<Region>) -> Result<()> {
        if regions.is_empty() {
            return Ok(());
        }

        let mut lifecycle = self.lifecycle.lock().await;

        let (previous, was_active) = {
            let mut session = lock(&self.session);
            if session.sink.is_none() {
                return Err(GeofenceError::NotStarted);
            }
            let staged = Self::stage(&session.registry, regions)?;
            (std::mem::replace(&mut session.registry, staged), session.active)
        };

        if !was_active && !self.source.is_provider_enabled() {
            lock(&self.session).registry = previous;
            return Err(GeofenceError::NoProviderAvailable);
        }

        if let Err(e) = self.reconcile(&mut lifecycle).await {
            lock(&self.session).registry = previous;
            return Err(e);
        }

        Ok(())
    }

    /// Deregister regions by id; unknown ids are ignored. Going empty
    /// releases the subscription.
    pub async fn remove_regions<I: AsRef<str> + Sync>(&self, ids: &[I]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut lifecycle = self.lifecycle.lock().await;
        lock(&self.session).registry.remove(ids);
        self.reconcile(&mut lifecycle).await
    }

    /// Release the subscription and forget all regions. Idempotent. No
    /// event is delivered after this returns. The sink is kept, so
    /// `add_regions` can resume monitoring without another `start`.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let result = self.teardown(&mut lifecycle).await;

        let mut session = lock(&self.session);
        session.registry.clear();
        session.active = false;
        result
    }

    /// Re-subscribe if the foreground state now calls for a different
    /// cadence. Returns whether the subscription was replaced.
    ///
    /// The new subscription is made before the old one is released, so a
    /// failed re-subscribe leaves monitoring running at the old cadence.
    pub async fn refresh_cadence(&self) -> Result<bool> {
        let mut lifecycle = self.lifecycle.lock().await;
        let desired = self.desired_cadence();
        let current = lock(&self.session).generation;

        match lifecycle.as_ref() {
            Some(active) if active.generation == current && active.request != desired => {}
            _ => return Ok(false),
        }

        let fresh = self.subscribe().await?;
        if let Some(previous) = lifecycle.replace(fresh) {
            self.release(previous).await?;
        }

        // The old worker may have expired the last region meanwhile
        self.reconcile(&mut lifecycle).await?;
        Ok(true)
    }

    pub fn is_active(&self) -> bool {
        lock(&self.session).active
    }

    pub fn region_count(&self) -> usize {
        lock(&self.session).registry.len()
    }

    pub fn region_state(&self, id: &str) -> Option<RegionState> {
        lock(&self.session).registry.state(id)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    fn desired_cadence(&self) -> SubscriptionRequest {
        self.config.cadence(self.foreground.is_foreground())
    }

    /// Apply every region to a copy so a bad one leaves the live registry untouched.
    fn stage(registry: &GeofenceRegistry, regions: Vec<Region>) -> Result<GeofenceRegistry> {
        let mut staged = registry.clone();
        for region in regions {
            staged.upsert(region)?;
        }
        Ok(staged)
    }

    /// Bring the subscription in line with the registry: live iff non-empty.
    async fn reconcile(&self, lifecycle: &mut Option<ActiveSubscription>) -> Result<()> {
        let (wanted, current) = {
            let session = lock(&self.session);
            (!session.registry.is_empty(), session.generation)
        };

        // Left behind by a worker that went idle on expiry
        if lifecycle.as_ref().is_some_and(|active| active.generation != current) {
            self.teardown(lifecycle).await?;
        }

        match (wanted, lifecycle.is_some()) {
            (true, false) => {
                *lifecycle = Some(self.subscribe().await?);
                Ok(())
            }
            (false, true) => self.teardown(lifecycle).await,
            _ => Ok(()),
        }
    }

    async fn subscribe(&self) -> Result<ActiveSubscription> {
        let request = self.desired_cadence();
        let (fix_sink, receiver) = fix_channel(self.config.queue_depth, self.config.backpressure);

        // On timeout the receiver is dropped, which closes the sink the
        // source may still be holding.
        let handle = tokio::time::timeout(
            self.config.subscription_timeout(),
            self.source.subscribe(request, fix_sink),
        )
        .await
        .map_err(|_| GeofenceError::SubscriptionTimeout)??;

        // Any previous worker sees the new generation and stops delivering
        let generation = {
            let mut session = lock(&self.session);
            session.generation += 1;
            session.active = true;
            session.generation
        };

        let receiver = Arc::new(receiver);
        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.session),
            Arc::clone(&receiver),
            generation,
            FixThrottle::new(request),
            IdleRelease {
                source: Arc::clone(&self.source),
                lifecycle: Arc::clone(&self.lifecycle),
                timeout: self.config.subscription_timeout(),
            },
        ));

        Ok(ActiveSubscription {
            handle,
            request,
            generation,
            receiver,
            worker,
        })
    }

    /// Stop delivery, then release the subscription.
    async fn teardown(&self, lifecycle: &mut Option<ActiveSubscription>) -> Result<()> {
        let Some(active) = lifecycle.take() else {
            return Ok(());
        };

        // Waits for an in-flight evaluation to finish delivering
        {
            let mut session = lock(&self.session);
            session.generation += 1;
            session.active = false;
        }

        self.release(active).await
    }

    /// Close the fix queue, unsubscribe and wait for the worker to exit.
    /// The caller has already made the worker's generation stale.
    async fn release(&self, active: ActiveSubscription) -> Result<()> {
        active.receiver.close();

        let released = tokio::time::timeout(
            self.config.subscription_timeout(),
            self.source.unsubscribe(active.handle),
        )
        .await
        .map_err(|_| GeofenceError::SubscriptionTimeout)
        .and_then(|result| result);

        // The worker sees the closed queue or the stale generation and exits
        let _ = active.worker.await;

        released
    }
}

impl<S: PositionSource> Drop for GeofenceMonitor<S> {
    fn drop(&mut self) {
        // Best effort: the source cannot be unsubscribed without awaiting,
        // but closing the queue makes its next push fail and stop it.
        if let Ok(mut lifecycle) = self.lifecycle.try_lock() {
            if let Some(active) = lifecycle.take() {
                lock(&self.session).generation += 1;
                active.receiver.close();
                active.worker.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fix_at(lat: f64, lon: f64, second: u32) -> Fix {
        Fix::new(lat, lon, 5.0, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, second).unwrap())
    }

    fn request(secs: u64, meters: f64) -> SubscriptionRequest {
        SubscriptionRequest {
            min_time: Duration::from_secs(secs),
            min_distance_m: meters,
        }
    }

    #[test]
    fn test_throttle_time_and_distance() {
        let mut throttle = FixThrottle::new(request(5, 10.0));

        assert!(throttle.admit(&fix_at(38.8977, -77.0365, 0)));
        // Too soon
        assert!(!throttle.admit(&fix_at(38.9100, -77.0365, 2)));
        // Long enough but too close (~1 m)
        assert!(!throttle.admit(&fix_at(38.89771, -77.0365, 10)));
        // Both thresholds met
        assert!(throttle.admit(&fix_at(38.9100, -77.0365, 10)));
        // Out of order
        assert!(!throttle.admit(&fix_at(38.9500, -77.0365, 1)));
    }

    #[test]
    fn test_unthrottled_admits_repeats() {
        let mut throttle = FixThrottle::new(request(0, 0.0));
        assert!(throttle.admit(&fix_at(1.0, 1.0, 0)));
        assert!(throttle.admit(&fix_at(1.0, 1.0, 0)));
        assert!(!throttle.admit(&fix_at(f64::NAN, 1.0, 0)));
    }

    #[test]
    fn test_process_fix_groups_enter_before_exit() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |event: TransitionEvent| seen.lock().unwrap().push(event)
        };

        let mut registry = GeofenceRegistry::new();
        let a = Region::new("a", crate::geofence::Coordinate::new(0.0, 0.0), 1000.0).unwrap();
        let b = Region::new("b", crate::geofence::Coordinate::new(0.0, 0.1), 1000.0).unwrap();
        let c = Region::new("c", crate::geofence::Coordinate::new(0.0, 0.1), 500.0).unwrap();
        registry.upsert(a).unwrap();
        registry.upsert(b).unwrap();
        registry.upsert(c).unwrap();

        let mut session = Session {
            registry,
            sink: Some(Arc::new(sink)),
            generation: 0,
            active: true,
        };

        session.process_fix(&fix_at(0.0, 0.0, 0));
        session.process_fix(&fix_at(0.0, 0.1, 1));

        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].region_ids(), ["a".to_string()]);
        assert_eq!(events[0].transition_type(), Transition::Enter.code());
        assert_eq!(events[1].region_ids(), ["b".to_string(), "c".to_string()]);
        assert_eq!(events[1].transition_type(), Transition::Enter.code());
        assert_eq!(events[2].region_ids(), ["a".to_string()]);
        assert_eq!(events[2].transition_type(), Transition::Exit.code());
    }
}
