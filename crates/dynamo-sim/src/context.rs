//! Shared simulation state handed to participant handlers.

use dynamo_config::DynamoConfig;
use dynamo_ring::ConsistentHashRing;
use dynamo_types::{Key, NodeId};

use crate::bus::MessageBus;
use crate::error::{Result, SimError};
use crate::event_log::EventLog;
use crate::message::{Message, MessageId};
use crate::registry::Registry;
use crate::rng::SimRng;
use crate::timer::{TimerId, TimerList, TimerReason};

/// Everything a handler may touch besides its own participant.
///
/// One context per simulation; there is no ambient global state. The ring
/// is rebuilt wholesale from the registry whenever ring membership changes,
/// which only happens between runs.
#[derive(Debug)]
pub struct SimContext {
    pub(crate) config: DynamoConfig,
    pub(crate) registry: Registry,
    pub(crate) ring: ConsistentHashRing<NodeId>,
    pub(crate) bus: MessageBus,
    pub(crate) timers: TimerList,
    pub(crate) log: EventLog,
    pub(crate) rng: SimRng,
}

impl SimContext {
    pub fn new(config: DynamoConfig) -> Self {
        let ring = ConsistentHashRing::new(Vec::new(), config.ring.repeats);
        let rng = SimRng::new(config.seed);
        Self {
            config,
            registry: Registry::new(),
            ring,
            bus: MessageBus::new(),
            timers: TimerList::new(),
            log: EventLog::new(),
            rng,
        }
    }

    pub fn config(&self) -> &DynamoConfig {
        &self.config
    }

    /// Sends a message, arming a reply timer if it is a request.
    pub fn send(&mut self, message: Message) -> MessageId {
        self.bus
            .send(message, true, &mut self.timers, &self.registry, &mut self.log)
    }

    pub fn forward(&mut self, message: &Message, to: NodeId) -> MessageId {
        self.bus.forward(message, to, &mut self.log)
    }

    pub fn start_timer(&mut self, owner: &NodeId, priority: u32, reason: TimerReason) -> Option<TimerId> {
        self.timers
            .start(owner, priority, reason, &self.registry, &mut self.log)
    }

    /// The first `N` ring members for `key`, skipping `avoid`, plus the
    /// avoided members the walk passed.
    pub fn preference_list(&self, key: &Key, avoid: &[NodeId]) -> (Vec<NodeId>, Vec<NodeId>) {
        self.ring
            .find_nodes(key, self.config.replication.n, avoid)
    }

    /// A uniformly chosen ring member, failed or not.
    pub fn random_node(&mut self) -> Result<NodeId> {
        let nodes = self.registry.included_nodes();
        self.rng.choose(&nodes).cloned().ok_or(SimError::NoNodes)
    }

    pub(crate) fn rebuild_ring(&mut self) {
        self.ring = ConsistentHashRing::new(self.registry.included_nodes(), self.config.ring.repeats);
        tracing::debug!(members = self.ring.member_count(), "ring rebuilt");
    }
}
