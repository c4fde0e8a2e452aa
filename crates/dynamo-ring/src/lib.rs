//! Consistent-hash ring.
//!
//! Each member is placed on a 128-bit ring at `repeats` synthetic points
//! (the digest of `"<member>:<i>"`). A key is owned by the members found by
//! walking clockwise from the key's own digest. Virtual points smooth load
//! across physical members; [`ConsistentHashRing::find_nodes`] also reports
//! which avoided members the walk passed over, so callers can compute
//! hinted-handoff targets.
//!
//! The ring is immutable. Membership changes build a new one.

use std::fmt::{self, Display};

use dynamo_types::digest128;

/// Default number of points per member.
pub const DEFAULT_REPEATS: usize = 10;

/// Sorted ring of `(digest, member)` points.
#[derive(Debug, Clone)]
pub struct ConsistentHashRing<T> {
    points: Vec<(u128, T)>,
    repeats: usize,
}

impl<T: Clone + Eq + Display> ConsistentHashRing<T> {
    /// Builds a ring placing `repeats` points for each member.
    pub fn new(members: impl IntoIterator<Item = T>, repeats: usize) -> Self {
        let mut points = Vec::new();
        for member in members {
            for i in 0..repeats {
                let digest = digest128(format!("{member}:{i}").as_bytes());
                points.push((digest, member.clone()));
            }
        }
        points.sort_by_key(|(digest, _)| *digest);
        Self { points, repeats }
    }

    /// Returns up to `count` distinct members responsible for `key`, in ring
    /// order, skipping members in `avoid`.
    ///
    /// The second list holds the avoided members the walk encountered, each
    /// once, in encounter order. The walk wraps at most once, so a ring with
    /// too few eligible members yields a short result rather than an error.
    pub fn find_nodes(&self, key: impl AsRef<[u8]>, count: usize, avoid: &[T]) -> (Vec<T>, Vec<T>) {
        let mut results: Vec<T> = Vec::new();
        let mut avoided: Vec<T> = Vec::new();
        let hash = digest128(key.as_ref());
        let start = self.points.partition_point(|(digest, _)| *digest <= hash);

        for index in (start..self.points.len()).chain(0..start) {
            if results.len() >= count {
                break;
            }
            let member = &self.points[index].1;
            if avoid.contains(member) {
                if !avoided.contains(member) {
                    avoided.push(member.clone());
                }
            } else if !results.contains(member) {
                results.push(member.clone());
            }
        }
        (results, avoided)
    }

    /// Sorted ring points.
    pub fn points(&self) -> &[(u128, T)] {
        &self.points
    }

    pub fn repeats(&self) -> usize {
        self.repeats
    }

    /// Number of distinct members.
    pub fn member_count(&self) -> usize {
        self.points.len().checked_div(self.repeats).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl<T: Display> Display for ConsistentHashRing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (digest, member)) in self.points.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "({digest:032x}, {member})")?;
        }
        Ok(())
    }
}
