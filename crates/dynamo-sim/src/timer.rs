//! Priority-ordered timers.
//!
//! Timers drive every retry and timeout in the simulation. There is no
//! clock: the run loop pops at most one timer each time the message queue
//! drains, and the head of the list is whichever pending timer has the
//! highest priority (first-armed wins among equals).

use std::fmt::{self, Display};

use dynamo_types::NodeId;
use serde::{Deserialize, Serialize};

use crate::event_log::{EventLog, SimEvent};
use crate::message::MessageId;
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId(u64);

impl Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Why a timer was armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerReason {
    /// No reply yet to this request.
    Response(MessageId),
    /// Recurring failed-peer probe.
    Probe,
}

impl Display for TimerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerReason::Response(id) => write!(f, "response {id}"),
            TimerReason::Probe => f.write_str("probe"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub id: TimerId,
    pub owner: NodeId,
    pub priority: u32,
    pub reason: TimerReason,
}

/// Outcome of [`TimerList::pop`].
#[derive(Debug, Default)]
pub struct Popped {
    pub timer: Option<Timer>,
    /// Requests whose reply timers were discarded because their owner is
    /// failed.
    pub abandoned: Vec<MessageId>,
}

/// Pending timers, highest priority first.
#[derive(Debug, Default)]
pub struct TimerList {
    pending: Vec<Timer>,
    next_id: u64,
}

impl TimerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a timer for `owner`.
    ///
    /// Returns `None` without arming anything when the owner is failed. The
    /// new timer goes in front of the first pending timer with a strictly
    /// lower priority, behind any of equal priority.
    pub fn start(
        &mut self,
        owner: &NodeId,
        priority: u32,
        reason: TimerReason,
        registry: &Registry,
        log: &mut EventLog,
    ) -> Option<TimerId> {
        if registry.is_failed(owner) {
            return None;
        }
        self.next_id += 1;
        let id = TimerId(self.next_id);
        tracing::trace!(%owner, timer = %id, priority, %reason, "start timer");
        log.log(SimEvent::TimerStart {
            timer: id,
            owner: owner.clone(),
            reason,
        });

        let slot = self
            .pending
            .iter()
            .position(|t| t.priority < priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(
            slot,
            Timer {
                id,
                owner: owner.clone(),
                priority,
                reason,
            },
        );
        Some(id)
    }

    /// Removes a pending timer. Returns `false` if it already fired or was
    /// discarded.
    pub fn cancel(&mut self, id: TimerId, log: &mut EventLog) -> bool {
        let Some(index) = self.pending.iter().position(|t| t.id == id) else {
            return false;
        };
        let timer = self.pending.remove(index);
        tracing::trace!(owner = %timer.owner, timer = %id, "cancel timer");
        log.log(SimEvent::TimerCancel {
            timer: id,
            owner: timer.owner,
            reason: timer.reason,
        });
        true
    }

    /// Removes and returns the first timer whose owner is not failed.
    ///
    /// Timers of failed owners ahead of it are discarded for good; the
    /// requests whose reply timers went that way are reported in
    /// [`Popped::abandoned`].
    pub fn pop(&mut self, registry: &Registry, log: &mut EventLog) -> Popped {
        let mut popped = Popped::default();
        while !self.pending.is_empty() {
            let timer = self.pending.remove(0);
            if registry.is_failed(&timer.owner) {
                tracing::trace!(owner = %timer.owner, timer = %timer.id, "discard timer of failed owner");
                if let TimerReason::Response(request) = timer.reason {
                    popped.abandoned.push(request);
                }
                continue;
            }
            tracing::trace!(owner = %timer.owner, timer = %timer.id, reason = %timer.reason, "pop timer");
            log.log(SimEvent::TimerPop {
                timer: timer.id,
                owner: timer.owner.clone(),
                reason: timer.reason,
            });
            popped.timer = Some(timer);
            break;
        }
        popped
    }

    /// Whether `owner` has a pending timer for `reason`.
    pub fn has_pending(&self, owner: &NodeId, reason: TimerReason) -> bool {
        self.pending
            .iter()
            .any(|t| t.owner == *owner && t.reason == reason)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Timer> {
        self.pending.iter()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
