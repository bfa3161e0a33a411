// src/geofence/registry.rs
//! Registered regions and their containment state

use super::geo;
use super::region::{Region, Transition};
use crate::error::{GeofenceError, Result};
use crate::gps::Fix;
use chrono::{DateTime, Utc};

/// Platform geofencing services cap registrations at 100 per client.
pub const DEFAULT_MAX_REGIONS: usize = 100;

/// Per-region state, owned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RegionState {
    /// Currently considered inside
    pub inside: bool,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

/// A containment change produced by [`GeofenceRegistry::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub region_id: String,
    pub inside: bool,
    /// The resulting transition is in the region's watch mask
    pub watched: bool,
}

impl Evaluation {
    pub fn transition(&self) -> Transition {
        Transition::from_containment(self.inside)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    region: Region,
    state: RegionState,
}

/// Regions in insertion order. Lookups are linear; registries hold tens of
/// regions, not thousands.
#[derive(Debug, Clone)]
pub struct GeofenceRegistry {
    entries: Vec<Entry>,
    max_regions: usize,
}

impl GeofenceRegistry {
    pub fn new() -> Self {
        Self::with_capacity_limit(DEFAULT_MAX_REGIONS)
    }

    pub fn with_capacity_limit(max_regions: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_regions: max_regions.max(1),
        }
    }

    /// Insert or replace a region and reset its state to outside.
    ///
    /// A replaced region keeps its position in iteration order. On error the
    /// registry is untouched.
    pub fn upsert(&mut self, region: Region) -> Result<()> {
        region.validate()?;

        let entry = Entry {
            region,
            state: RegionState::default(),
        };

        match self.position(entry.region.id()) {
            Some(index) => self.entries[index] = entry,
            None => {
                if self.entries.len() >= self.max_regions {
                    return Err(GeofenceError::TooManyRegions {
                        limit: self.max_regions,
                    });
                }
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    /// Remove regions by id. Unknown ids are ignored. Returns how many were removed.
    pub fn remove<S: AsRef<str>>(&mut self, ids: &[S]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !ids.iter().any(|id| id.as_ref() == entry.region.id()));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn max_regions(&self) -> usize {
        self.max_regions
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn region(&self, id: &str) -> Option<&Region> {
        self.position(id).map(|index| &self.entries[index].region)
    }

    pub fn state(&self, id: &str) -> Option<RegionState> {
        self.position(id).map(|index| self.entries[index].state)
    }

    /// Registered ids in iteration order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.region.id())
    }

    /// Drop regions expired at `now`, returning their ids.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut evicted = Vec::new();
        self.entries.retain(|entry| {
            if entry.region.is_expired_at(now) {
                evicted.push(entry.region.id().to_string());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Evaluate a fix against every live region.
    ///
    /// Regions expired at the fix time are evicted first. State only changes
    /// for regions whose containment flipped, and only those are returned.
    pub fn evaluate(&mut self, fix: &Fix) -> Vec<Evaluation> {
        if !fix.is_valid() {
            return Vec::new();
        }

        self.evict_expired(fix.timestamp);

        let point = fix.coordinate();
        let mut changes = Vec::new();

        for entry in &mut self.entries {
            let inside = geo::contains(&entry.region, point);
            entry.state.last_evaluated_at = Some(fix.timestamp);

            if inside == entry.state.inside {
                continue;
            }

            entry.state.inside = inside;
            let transition = Transition::from_containment(inside);
            changes.push(Evaluation {
                region_id: entry.region.id().to_string(),
                inside,
                watched: entry.region.transitions().watches(transition),
            });
        }

        changes
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.region.id() == id)
    }
}

impl Default for GeofenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::{Coordinate, TransitionMask};
    use chrono::TimeZone;

    fn ts(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, second).unwrap()
    }

    fn home() -> Region {
        Region::new("home", Coordinate::new(38.8977, -77.0365), 1000.0).unwrap()
    }

    fn inside_fix(second: u32) -> Fix {
        Fix::new(38.8977, -77.0365, 5.0, ts(second))
    }

    fn outside_fix(second: u32) -> Fix {
        Fix::new(39.5, -78.0, 5.0, ts(second))
    }

    #[test]
    fn test_upsert_and_remove() {
        let mut registry = GeofenceRegistry::new();
        assert!(registry.is_empty());

        registry.upsert(home()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains_id("home"));

        assert_eq!(registry.remove(&["missing"]), 0);
        assert_eq!(registry.remove(&["home"]), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_upsert_replaces_and_resets_state() {
        let mut registry = GeofenceRegistry::new();
        let office = Region::new("office", Coordinate::new(48.117, 11.517), 100.0).unwrap();
        registry.upsert(home()).unwrap();
        registry.upsert(office).unwrap();
        registry.evaluate(&inside_fix(0));
        assert!(registry.state("home").unwrap().inside);

        let replacement = Region::new("home", Coordinate::new(38.8977, -77.0365), 2000.0).unwrap();
        registry.upsert(replacement).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.region("home").unwrap().radius_meters(), 2000.0);
        assert_eq!(registry.state("home").unwrap(), RegionState::default());
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["home", "office"]);
    }

    #[test]
    fn test_failed_upsert_keeps_prior_state() {
        let mut registry = GeofenceRegistry::new();
        registry.upsert(home()).unwrap();
        registry.evaluate(&inside_fix(0));

        let bad: Region = serde_json::from_str(
            r#"{"id":"home","latitude":38.8977,"longitude":-77.0365,"radius":-1}"#,
        )
        .unwrap();
        assert!(matches!(registry.upsert(bad), Err(GeofenceError::InvalidRegion(_))));
        assert!(registry.state("home").unwrap().inside);
        assert_eq!(registry.region("home").unwrap().radius_meters(), 1000.0);
    }

    #[test]
    fn test_capacity_limit() {
        let mut registry = GeofenceRegistry::with_capacity_limit(2);
        registry.upsert(home()).unwrap();
        registry
            .upsert(Region::new("b", Coordinate::new(1.0, 1.0), 10.0).unwrap())
            .unwrap();

        let err = registry
            .upsert(Region::new("c", Coordinate::new(2.0, 2.0), 10.0).unwrap())
            .unwrap_err();
        assert!(matches!(err, GeofenceError::TooManyRegions { limit: 2 }));

        // Replacing an existing id is still allowed at capacity
        registry.upsert(home()).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_evaluate_reports_changes_only() {
        let mut registry = GeofenceRegistry::new();
        registry.upsert(home()).unwrap();

        // Starting outside: an outside fix is not a change
        assert!(registry.evaluate(&outside_fix(0)).is_empty());
        assert_eq!(registry.state("home").unwrap().last_evaluated_at, Some(ts(0)));

        let changes = registry.evaluate(&inside_fix(1));
        assert_eq!(
            changes,
            vec![Evaluation {
                region_id: "home".to_string(),
                inside: true,
                watched: true,
            }]
        );
        assert!(registry.evaluate(&inside_fix(2)).is_empty());

        let changes = registry.evaluate(&outside_fix(3));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].transition(), Transition::Exit);
    }

    #[test]
    fn test_unwatched_transition_still_updates_state() {
        let mut registry = GeofenceRegistry::new();
        registry
            .upsert(home().with_transitions(TransitionMask::EXIT))
            .unwrap();

        let changes = registry.evaluate(&inside_fix(0));
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].watched);
        assert!(registry.state("home").unwrap().inside);

        let changes = registry.evaluate(&outside_fix(1));
        assert!(changes[0].watched);
    }

    #[test]
    fn test_transitions_alternate() {
        let mut registry = GeofenceRegistry::new();
        registry.upsert(home()).unwrap();

        let pattern = [true, true, false, true, false, false, true, true, false];
        let mut enters = 0i32;
        let mut exits = 0i32;
        let mut last = None;

        for (i, inside) in pattern.iter().enumerate() {
            let fix = if *inside { inside_fix(i as u32) } else { outside_fix(i as u32) };
            for change in registry.evaluate(&fix) {
                assert_ne!(last, Some(change.transition()), "same transition twice in a row");
                last = Some(change.transition());
                match change.transition() {
                    Transition::Enter => enters += 1,
                    _ => exits += 1,
                }
            }
        }

        assert!((enters - exits).abs() <= 1);
        assert_eq!(enters, 3);
        assert_eq!(exits, 3);
    }

    #[test]
    fn test_expired_regions_are_evicted() {
        let mut registry = GeofenceRegistry::new();
        registry.upsert(home().expires_at(ts(10))).unwrap();
        registry
            .upsert(Region::new("near", Coordinate::new(38.8977, -77.0365), 50.0).unwrap())
            .unwrap();

        let changes = registry.evaluate(&inside_fix(5));
        assert_eq!(changes.len(), 2);

        let changes = registry.evaluate(&outside_fix(10));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].region_id, "near");
        assert!(!registry.contains_id("home"));
    }

    #[test]
    fn test_invalid_fix_is_ignored() {
        let mut registry = GeofenceRegistry::new();
        registry.upsert(home()).unwrap();

        let bad = Fix::new(f64::NAN, -77.0365, 5.0, ts(0));
        assert!(registry.evaluate(&bad).is_empty());
        assert_eq!(registry.state("home").unwrap().last_evaluated_at, None);
    }
}
