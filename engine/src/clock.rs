//! Vector clocks for causal ordering of record versions.
//!
//! Each device keeps its own counter; comparing two clocks tells whether one
//! version causally dominates the other or whether they diverged.

use crate::DeviceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of comparing two vector clocks.
///
/// `Ahead` and `Behind` are mirror images: `a.compare(&b) == Ahead` exactly
/// when `b.compare(&a) == Behind`. Everything else, two equal clocks
/// included, is `Concurrent`, and callers fall through to a deterministic
/// merge policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockOrdering {
    /// Self dominates the other clock on every device.
    Ahead,
    /// The other clock dominates self on every device.
    Behind,
    /// Neither dominates: the versions genuinely diverged.
    Concurrent,
}

/// A per-device counter map.
///
/// Uses `BTreeMap` so serialization order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    counters: BTreeMap<DeviceId, u64>,
}

impl VectorClock {
    /// Create an empty clock (all counters implicitly zero).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock with a single device counter set.
    pub fn with_counter(device: impl Into<DeviceId>, counter: u64) -> Self {
        let mut counters = BTreeMap::new();
        counters.insert(device.into(), counter);
        Self { counters }
    }

    /// The counter for a device; missing devices count as zero.
    pub fn counter(&self, device: &str) -> u64 {
        self.counters.get(device).copied().unwrap_or(0)
    }

    /// Increment a device's counter and return the new value.
    ///
    /// Counters only ever grow; there is no decrement.
    pub fn increment(&mut self, device: impl Into<DeviceId>) -> u64 {
        let entry = self.counters.entry(device.into()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Update this clock to be at least as recent as another on every device.
    pub fn merge(&mut self, other: &VectorClock) {
        for (device, counter) in &other.counters {
            let entry = self.counters.entry(device.clone()).or_insert(0);
            *entry = (*entry).max(*counter);
        }
    }

    /// Pointwise maximum of two clocks.
    pub fn merged(a: &VectorClock, b: &VectorClock) -> VectorClock {
        let mut out = a.clone();
        out.merge(b);
        out
    }

    /// Compare this clock against another.
    ///
    /// `Ahead` iff self's counters are >= on every device and strictly
    /// greater on at least one; `Behind` is the mirror; otherwise
    /// `Concurrent`.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut any_greater = false;
        let mut any_less = false;

        for device in self.counters.keys().chain(other.counters.keys()) {
            let a = self.counter(device);
            let b = other.counter(device);
            if a > b {
                any_greater = true;
            } else if a < b {
                any_less = true;
            }
        }

        match (any_greater, any_less) {
            (true, false) => ClockOrdering::Ahead,
            (false, true) => ClockOrdering::Behind,
            _ => ClockOrdering::Concurrent,
        }
    }

    /// Devices that appear in this clock.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.counters.keys()
    }

    /// True when no device has ever ticked this clock.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clock_is_empty() {
        let clock = VectorClock::new();
        assert!(clock.is_empty());
        assert_eq!(clock.counter("device-a"), 0);
    }

    #[test]
    fn increment_grows_counter() {
        let mut clock = VectorClock::new();
        assert_eq!(clock.increment("device-a"), 1);
        assert_eq!(clock.increment("device-a"), 2);
        assert_eq!(clock.counter("device-a"), 2);
        assert_eq!(clock.counter("device-b"), 0);
    }

    #[test]
    fn ahead_when_dominating() {
        let a = VectorClock::with_counter("a", 3);
        let b = VectorClock::with_counter("a", 1);
        assert_eq!(a.compare(&b), ClockOrdering::Ahead);
        assert_eq!(b.compare(&a), ClockOrdering::Behind);
    }

    #[test]
    fn missing_device_counts_as_zero() {
        let mut a = VectorClock::with_counter("a", 2);
        a.increment("b");
        let b = VectorClock::with_counter("a", 2);
        assert_eq!(a.compare(&b), ClockOrdering::Ahead);
    }

    #[test]
    fn concurrent_when_diverged() {
        // {A:3, B:1} vs {A:2, B:2}: greater on one device, less on the
        // other.
        let mut a = VectorClock::with_counter("A", 3);
        a.merge(&VectorClock::with_counter("B", 1));
        let mut b = VectorClock::with_counter("A", 2);
        b.merge(&VectorClock::with_counter("B", 2));

        assert_eq!(a.compare(&b), ClockOrdering::Concurrent);
        assert_eq!(b.compare(&a), ClockOrdering::Concurrent);
    }

    #[test]
    fn equal_clocks_compare_concurrent() {
        let a = VectorClock::with_counter("a", 5);
        let b = VectorClock::with_counter("a", 5);
        assert_eq!(a.compare(&b), ClockOrdering::Concurrent);
    }

    #[test]
    fn merge_takes_pointwise_max() {
        let mut a = VectorClock::with_counter("a", 3);
        let mut b = VectorClock::with_counter("a", 1);
        b.increment("b");
        a.merge(&b);
        assert_eq!(a.counter("a"), 3);
        assert_eq!(a.counter("b"), 1);
    }

    #[test]
    fn merged_dominates_both_inputs() {
        let a = VectorClock::with_counter("a", 3);
        let b = VectorClock::with_counter("b", 2);
        let m = VectorClock::merged(&a, &b);
        assert_eq!(m.compare(&a), ClockOrdering::Ahead);
        assert_eq!(m.compare(&b), ClockOrdering::Ahead);
    }

    #[test]
    fn serialization_roundtrip() {
        let mut clock = VectorClock::with_counter("device-1", 42);
        clock.increment("device-2");
        let json = serde_json::to_string(&clock).unwrap();
        let parsed: VectorClock = serde_json::from_str(&json).unwrap();
        assert_eq!(clock, parsed);
    }

    #[test]
    fn serialization_is_a_plain_map() {
        let clock = VectorClock::with_counter("device-1", 10);
        let json = serde_json::to_string(&clock).unwrap();
        assert_eq!(json, r#"{"device-1":10}"#);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_clock() -> impl Strategy<Value = VectorClock> {
            proptest::collection::btree_map("[abc]", 1u64..20, 0..3).prop_map(|m| {
                let mut clock = VectorClock::new();
                for (device, counter) in m {
                    clock.merge(&VectorClock::with_counter(device, counter));
                }
                clock
            })
        }

        proptest! {
            #[test]
            fn compare_is_antisymmetric(a in arb_clock(), b in arb_clock()) {
                let forward = a.compare(&b);
                let backward = b.compare(&a);
                match forward {
                    ClockOrdering::Ahead => prop_assert_eq!(backward, ClockOrdering::Behind),
                    ClockOrdering::Behind => prop_assert_eq!(backward, ClockOrdering::Ahead),
                    ClockOrdering::Concurrent => prop_assert_eq!(backward, ClockOrdering::Concurrent),
                }
            }

            #[test]
            fn merged_is_never_behind(a in arb_clock(), b in arb_clock()) {
                let m = VectorClock::merged(&a, &b);
                prop_assert_ne!(m.compare(&a), ClockOrdering::Behind);
                prop_assert_ne!(m.compare(&b), ClockOrdering::Behind);
            }
        }
    }
}
