//! Participant directory.
//!
//! Resolves names to participant records and tracks the per-participant
//! `failed`/`included` flags that the bus and the timers consult.

use dynamo_types::NodeId;

use crate::error::{Result, SimError};

/// Largest number of automatically assigned names (`A`..`Z`, `AA`..`ZZ`).
pub const MAX_AUTO_NAMES: usize = 26 + 26 * 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantKind {
    Node,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub id: NodeId,
    pub kind: ParticipantKind,
    /// Messages to a failed participant are dropped and its timers never fire.
    pub failed: bool,
    /// Whether a node is part of the ring.
    pub included: bool,
    /// Priority of reply timers armed on this participant's requests, or
    /// `None` if it does not handle request timeouts.
    pub timeout_priority: Option<u32>,
}

/// Registration-ordered participant table.
#[derive(Debug, Default)]
pub struct Registry {
    records: Vec<ParticipantRecord>,
    auto_named: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next automatic name: `A`..`Z`, then `AA`, `AB`, .. `ZZ`.
    ///
    /// Explicitly named participants do not advance the sequence.
    pub fn next_name(&mut self) -> Result<NodeId> {
        let name = auto_name(self.auto_named).ok_or(SimError::NameSpaceExhausted(MAX_AUTO_NAMES))?;
        self.auto_named += 1;
        Ok(NodeId::from(name))
    }

    pub fn register(
        &mut self,
        id: NodeId,
        kind: ParticipantKind,
        timeout_priority: Option<u32>,
    ) -> Result<()> {
        if self.get(&id).is_some() {
            return Err(SimError::DuplicateName(id));
        }
        self.records.push(ParticipantRecord {
            id,
            kind,
            failed: false,
            included: true,
            timeout_priority,
        });
        Ok(())
    }

    pub fn get(&self, id: &NodeId) -> Option<&ParticipantRecord> {
        self.records.iter().find(|r| r.id == *id)
    }

    fn get_mut(&mut self, id: &NodeId) -> Result<&mut ParticipantRecord> {
        self.records
            .iter_mut()
            .find(|r| r.id == *id)
            .ok_or_else(|| SimError::UnknownParticipant(id.clone()))
    }

    /// Resolves a name typed by an operator.
    pub fn lookup(&self, name: &str) -> Option<&ParticipantRecord> {
        self.records.iter().find(|r| r.id.as_str() == name)
    }

    /// Unknown participants count as failed: nothing can reach them.
    pub fn is_failed(&self, id: &NodeId) -> bool {
        self.get(id).is_none_or(|r| r.failed)
    }

    pub fn set_failed(&mut self, id: &NodeId, failed: bool) -> Result<()> {
        self.get_mut(id)?.failed = failed;
        Ok(())
    }

    pub fn set_included(&mut self, id: &NodeId, included: bool) -> Result<()> {
        self.get_mut(id)?.included = included;
        Ok(())
    }

    pub fn timeout_priority(&self, id: &NodeId) -> Option<u32> {
        self.get(id).and_then(|r| r.timeout_priority)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantRecord> {
        self.records.iter()
    }

    /// Nodes currently in the ring, in registration order.
    pub fn included_nodes(&self) -> Vec<NodeId> {
        self.records
            .iter()
            .filter(|r| r.kind == ParticipantKind::Node && r.included)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.auto_named = 0;
    }
}

fn auto_name(index: usize) -> Option<String> {
    let letter = |i: usize| char::from(b'A' + (i % 26) as u8);
    if index < 26 {
        Some(letter(index).to_string())
    } else if index < MAX_AUTO_NAMES {
        let rest = index - 26;
        Some([letter(rest / 26), letter(rest)].iter().collect())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, "A")]
    #[test_case(25, "Z")]
    #[test_case(26, "AA")]
    #[test_case(27, "AB")]
    #[test_case(52, "BA")]
    #[test_case(701, "ZZ")]
    fn auto_names(index: usize, expected: &str) {
        assert_eq!(auto_name(index).as_deref(), Some(expected));
    }

    #[test]
    fn name_space_runs_out() {
        assert_eq!(auto_name(MAX_AUTO_NAMES), None);
        let mut registry = Registry::new();
        for _ in 0..MAX_AUTO_NAMES {
            registry.next_name().unwrap();
        }
        assert!(matches!(
            registry.next_name(),
            Err(SimError::NameSpaceExhausted(_))
        ));
    }

    #[test]
    fn flags_and_lookup() {
        let mut registry = Registry::new();
        let a = registry.next_name().unwrap();
        registry.register(a.clone(), ParticipantKind::Node, Some(20)).unwrap();
        registry
            .register(NodeId::from("a"), ParticipantKind::Client, Some(17))
            .unwrap();
        let b = registry.next_name().unwrap();
        assert_eq!(b.as_str(), "B");
        registry.register(b.clone(), ParticipantKind::Node, Some(20)).unwrap();

        assert!(matches!(
            registry.register(a.clone(), ParticipantKind::Node, None),
            Err(SimError::DuplicateName(_))
        ));
        assert_eq!(registry.lookup("a").map(|r| r.kind), Some(ParticipantKind::Client));
        assert_eq!(registry.included_nodes(), vec![a.clone(), b.clone()]);

        registry.set_included(&a, false).unwrap();
        assert_eq!(registry.included_nodes(), vec![b]);

        registry.set_failed(&a, true).unwrap();
        assert!(registry.is_failed(&a));
        assert!(registry.is_failed(&NodeId::from("nobody")));
        assert!(registry.set_failed(&NodeId::from("nobody"), true).is_err());
    }
}
