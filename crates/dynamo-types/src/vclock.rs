//! Vector clocks for causal versioning.
//!
//! A [`VectorClock`] maps each coordinator that has written a key to the
//! highest sequence number it used. Clocks form a partial order:
//! `a <= b` iff every entry in `a` is present in `b` with a counter no
//! smaller. Clocks where neither dominates the other are concurrent, which is
//! how the store detects conflicting writes.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::NodeId;

/// Raised when a clock update would move a counter backwards.
///
/// This is never a simulated failure. It means a coordinator reused a
/// sequence number, which breaks causality tracking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("clock for {node} went backwards: current {current}, attempted {attempted}")]
    WentBackwards {
        node: NodeId,
        current: u64,
        attempted: u64,
    },
}

/// Per-key version vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorClock {
    entries: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter recorded for `node`, if any.
    pub fn get(&self, node: &NodeId) -> Option<u64> {
        self.entries.get(node).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, u64)> {
        self.entries.iter().map(|(node, counter)| (node, *counter))
    }

    /// Records that `node` wrote at sequence number `ts`.
    ///
    /// # Errors
    ///
    /// [`ClockError::WentBackwards`] if `ts` is not strictly greater than the
    /// counter already recorded for `node`. The clock is left unchanged.
    pub fn update(&mut self, node: &NodeId, ts: u64) -> Result<&mut Self, ClockError> {
        if let Some(current) = self.get(node) {
            if ts <= current {
                return Err(ClockError::WentBackwards {
                    node: node.clone(),
                    current,
                    attempted: ts,
                });
            }
        }
        self.entries.insert(node.clone(), ts);
        Ok(self)
    }

    /// Returns `true` if every entry of `self` is covered by `other`.
    pub fn dominated_by(&self, other: &Self) -> bool {
        self.entries
            .iter()
            .all(|(node, counter)| other.get(node).is_some_and(|theirs| *counter <= theirs))
    }

    /// Returns `true` if neither clock dominates the other.
    pub fn is_concurrent_with(&self, other: &Self) -> bool {
        self.partial_cmp(other).is_none()
    }

    /// Folds `other` into `self`, keeping the larger counter per node.
    pub fn merge(&mut self, other: &Self) {
        for (node, counter) in &other.entries {
            let entry = self.entries.entry(node.clone()).or_insert(*counter);
            *entry = (*entry).max(*counter);
        }
    }
}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.dominated_by(other) {
            Some(Ordering::Less)
        } else if other.dominated_by(self) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (node, counter)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{node}:{counter}")?;
        }
        f.write_str("}")
    }
}

impl<'a> FromIterator<(&'a NodeId, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (&'a NodeId, u64)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(node, counter)| (node.clone(), counter))
                .collect(),
        }
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Reduces `(payload, clock)` observations to the causally maximal ones.
///
/// Each observation is folded into the result in order: it is skipped if an
/// accumulated clock already covers it; otherwise it takes the slot of the
/// first accumulated clock it dominates and evicts any others it dominates,
/// or is appended when it dominates nothing. The result is an antichain and
/// keeps first-seen order among survivors.
pub fn coalesce<T>(items: impl IntoIterator<Item = (T, VectorClock)>) -> Vec<(T, VectorClock)> {
    let mut result: Vec<(T, VectorClock)> = Vec::new();
    for (payload, clock) in items {
        if result.iter().any(|(_, kept)| clock.dominated_by(kept)) {
            continue;
        }
        match result.iter().position(|(_, kept)| kept.dominated_by(&clock)) {
            Some(slot) => {
                let mut index = 0;
                result.retain(|(_, kept)| {
                    let keep = index == slot || !kept.dominated_by(&clock);
                    index += 1;
                    keep
                });
                result[slot] = (payload, clock);
            }
            None => result.push((payload, clock)),
        }
    }
    result
}

/// [`coalesce`] without payloads.
pub fn combine(clocks: impl IntoIterator<Item = VectorClock>) -> Vec<VectorClock> {
    coalesce(clocks.into_iter().map(|clock| ((), clock)))
        .into_iter()
        .map(|((), clock)| clock)
        .collect()
}

/// Joins clocks into one that dominates all of them.
///
/// Callers holding optional metadata flatten the missing entries away first.
pub fn converge<'a>(clocks: impl IntoIterator<Item = &'a VectorClock>) -> VectorClock {
    let mut joined = VectorClock::new();
    for clock in clocks {
        joined.merge(clock);
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        let mut c = VectorClock::new();
        for (node, counter) in entries {
            c.update(&NodeId::from(*node), *counter).unwrap();
        }
        c
    }

    #[test]
    fn update_rejects_stale_counters() {
        let a = NodeId::from("A");
        let mut c = VectorClock::new();
        c.update(&a, 1).unwrap().update(&a, 2).unwrap();
        assert_eq!(
            c.update(&a, 2).unwrap_err(),
            ClockError::WentBackwards {
                node: a.clone(),
                current: 2,
                attempted: 2
            }
        );
        assert!(c.update(&a, 1).is_err());
        assert_eq!(c.get(&a), Some(2));
    }

    #[test]
    fn display_lists_entries_in_name_order() {
        assert_eq!(clock(&[("B", 2), ("A", 1)]).to_string(), "{A:1, B:2}");
        assert_eq!(VectorClock::new().to_string(), "{}");
    }

    #[test_case(&[("A", 1)], &[("A", 1)], Some(Ordering::Equal); "identical")]
    #[test_case(&[("A", 1)], &[("A", 2)], Some(Ordering::Less); "older counter")]
    #[test_case(&[("A", 1)], &[("A", 1), ("B", 1)], Some(Ordering::Less); "subset of entries")]
    #[test_case(&[("A", 2), ("B", 1)], &[("A", 1)], Some(Ordering::Greater); "newer")]
    #[test_case(&[("A", 1)], &[("B", 1)], None; "disjoint writers")]
    #[test_case(&[("A", 2), ("B", 1)], &[("A", 1), ("B", 2)], None; "crossed counters")]
    #[test_case(&[], &[("A", 1)], Some(Ordering::Less); "empty is oldest")]
    fn partial_order(a: &[(&str, u64)], b: &[(&str, u64)], expected: Option<Ordering>) {
        assert_eq!(clock(a).partial_cmp(&clock(b)), expected);
    }

    #[test]
    fn combine_keeps_concurrent_clocks() {
        let a = clock(&[("A", 1)]);
        let b = clock(&[("B", 1)]);
        let ab = clock(&[("A", 1), ("B", 1)]);
        assert_eq!(combine([a.clone(), b.clone()]), vec![a.clone(), b.clone()]);
        assert_eq!(combine([a.clone(), b, ab.clone()]), vec![ab.clone()]);
        assert_eq!(combine([ab.clone(), a]), vec![ab]);
    }

    #[test]
    fn coalesce_carries_payloads() {
        let old = clock(&[("A", 1)]);
        let new = clock(&[("A", 2)]);
        let other = clock(&[("B", 1)]);
        let result = coalesce([("v1", old), ("v3", other.clone()), ("v2", new.clone())]);
        assert_eq!(result, vec![("v2", new), ("v3", other)]);
    }

    #[test]
    fn converge_takes_pointwise_maximum() {
        let joined = converge([&clock(&[("A", 3), ("B", 1)]), &clock(&[("B", 4), ("C", 1)])]);
        assert_eq!(joined, clock(&[("A", 3), ("B", 4), ("C", 1)]));
        assert!(converge(std::iter::empty()).is_empty());
    }

    fn arb_clock() -> impl Strategy<Value = VectorClock> {
        prop::collection::btree_map(0u8..4, 1u64..5, 0..4).prop_map(|entries| {
            let mut c = VectorClock::new();
            for (node, counter) in entries {
                c.update(&NodeId::from(char::from(b'A' + node).to_string()), counter)
                    .unwrap();
            }
            c
        })
    }

    proptest! {
        #[test]
        fn update_is_strictly_monotonic(mut c in arb_clock(), t in 1u64..100) {
            let a = NodeId::from("A");
            let floor = c.get(&a).unwrap_or(0);
            let t = floor + t;
            let before = c.clone();
            c.update(&a, t).unwrap();
            prop_assert!(c > before);
            prop_assert!(c.clone().update(&a, t).is_err());
            prop_assert!(c.clone().update(&a, t - 1).is_err());
            prop_assert!(c.clone().update(&a, t + 1).is_ok());
        }

        #[test]
        fn combine_of_copies_is_single(c in arb_clock()) {
            prop_assert_eq!(combine([c.clone(), c.clone(), c.clone()]), vec![c]);
        }

        #[test]
        fn combine_yields_antichain(clocks in prop::collection::vec(arb_clock(), 0..8)) {
            let result = combine(clocks.clone());
            for (i, x) in result.iter().enumerate() {
                for (j, y) in result.iter().enumerate() {
                    if i != j {
                        prop_assert!(x.partial_cmp(y).is_none(), "{} and {} comparable", x, y);
                    }
                }
            }
            for input in &clocks {
                prop_assert!(result.iter().any(|kept| input.dominated_by(kept)));
            }
        }

        #[test]
        fn converge_dominates_inputs(a in arb_clock(), b in arb_clock()) {
            let joined = converge([&a, &b]);
            prop_assert!(a.dominated_by(&joined));
            prop_assert!(b.dominated_by(&joined));
        }
    }
}
