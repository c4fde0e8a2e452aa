//! # dynamo-sim: Deterministic Simulation of a Dynamo-style Store
//!
//! This crate simulates a replicated key-value store in the style of Amazon
//! Dynamo: consistent-hash placement, sloppy `N/R/W` quorums, vector-clock
//! versioning, hinted handoff and probe-based failure detection.
//!
//! There is no clock and no I/O. Messages wait in one FIFO queue, timers in
//! one priority list, and the run loop always drains the queue before it
//! fires the next timer. Given the same seed and the same script of
//! operations, two runs produce the same event log.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Simulation                            │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────┐  ┌──────────┐  │
//! │  │ MessageBus │  │ TimerList  │  │ Registry │  │ SimRng   │  │
//! │  │ (FIFO +    │  │ (priority) │  │ (names,  │  │ (seeded) │  │
//! │  │ partitions)│  │            │  │  flags)  │  │          │  │
//! │  └────────────┘  └────────────┘  └──────────┘  └──────────┘  │
//! │                                                                │
//! │  ┌──────────────────────────────────────────────────────────┐ │
//! │  │ Participants:  Node (coordinator + replica)   Client     │ │
//! │  └──────────────────────────────────────────────────────────┘ │
//! │                                                                │
//! │  EventLog: add, fail, send, deliver, drop, cut, timers ...    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use dynamo_config::DynamoConfig;
//! use dynamo_sim::Simulation;
//!
//! let mut sim = Simulation::new(DynamoConfig::default().with_seed(7))?;
//! for _ in 0..6 {
//!     sim.add_node()?;
//! }
//! let a = sim.add_client("a")?;
//! sim.put(&a, "K1".into(), 1u64.into(), &[], None)?;
//! let summary = sim.run(sim.limits().with_max_timers(0))?;
//! assert!(summary.messages_processed > 0);
//! println!("{}", sim.events());
//! ```

#![allow(clippy::match_same_arms)] // Handlers keep one arm per payload kind
#![cfg_attr(test, allow(clippy::similar_names))]

mod bus;
mod client;
mod context;
mod error;
mod event_log;
mod message;
mod node;
mod participant;
mod registry;
mod rng;
pub mod scenarios;
mod timer;

use std::collections::BTreeMap;

use dynamo_config::{DynamoConfig, RunConfig};
use dynamo_types::{Key, NodeId, Value, VectorClock};

pub use bus::{MessageBus, Partition, Route};
pub use client::Client;
pub use context::SimContext;
pub use error::{Result, SimError};
pub use event_log::{EventLog, LoggedEvent, SimEvent};
pub use message::{Forwarded, Message, MessageId, Payload, PayloadKind, ReplyTo, SeqNo};
pub use node::{InFlight, Node, Quorum};
pub use participant::{Participant, Retryable};
pub use registry::{MAX_AUTO_NAMES, ParticipantKind, ParticipantRecord, Registry};
pub use rng::SimRng;
pub use scenarios::{Scenario, ScenarioRun};
pub use timer::{Popped, Timer, TimerId, TimerList, TimerReason};

// ============================================================================
// Run Limits
// ============================================================================

/// Budgets for one [`Simulation::run`] call.
///
/// A message budget of zero never trips. A timer budget of zero lets the
/// queue drain and then stops before any timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub max_messages: usize,
    pub max_timers: usize,
}

impl RunLimits {
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_max_timers(mut self, max_timers: usize) -> Self {
        self.max_timers = max_timers;
        self
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

impl From<&RunConfig> for RunLimits {
    fn from(run: &RunConfig) -> Self {
        Self {
            max_messages: run.max_messages,
            max_timers: run.max_timers,
        }
    }
}

/// Why a run returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No queued messages and no pending timers.
    Idle,
    MessageBudget,
    TimerBudget,
}

/// Summary of one [`Simulation::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Messages dequeued, including dropped and cut ones.
    pub messages_processed: usize,
    pub timers_fired: usize,
    pub stop: StopReason,
}

impl RunSummary {
    pub fn is_idle(&self) -> bool {
        self.stop == StopReason::Idle
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// A simulated cluster and everything needed to drive it.
#[derive(Debug)]
pub struct Simulation {
    ctx: SimContext,
    participants: BTreeMap<NodeId, Participant>,
}

impl Simulation {
    pub fn new(config: DynamoConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ctx: SimContext::new(config),
            participants: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &DynamoConfig {
        self.ctx.config()
    }

    /// Budgets from the configuration's `[run]` section.
    pub fn limits(&self) -> RunLimits {
        RunLimits::from(&self.ctx.config.run)
    }

    // ------------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------------

    /// Adds a node under the next automatic name.
    pub fn add_node(&mut self) -> Result<NodeId> {
        let id = self.ctx.registry.next_name()?;
        self.add_named_node(id)
    }

    pub fn add_named_node(&mut self, id: impl Into<NodeId>) -> Result<NodeId> {
        let id = id.into();
        let node = Node::new(id.clone(), &self.ctx.config)?;
        let priority = <Node as Retryable>::timeout_priority(&self.ctx.config.timers);
        self.register(id.clone(), ParticipantKind::Node, priority)?;
        self.ctx.rebuild_ring();
        node.arm_probe(&mut self.ctx);
        self.participants.insert(id.clone(), Participant::Node(node));
        Ok(id)
    }

    /// Adds a client under the next automatic name.
    pub fn add_unnamed_client(&mut self) -> Result<NodeId> {
        let id = self.ctx.registry.next_name()?;
        self.add_client(id)
    }

    pub fn add_client(&mut self, id: impl Into<NodeId>) -> Result<NodeId> {
        let id = id.into();
        let priority = <Client as Retryable>::timeout_priority(&self.ctx.config.timers);
        self.register(id.clone(), ParticipantKind::Client, priority)?;
        self.participants
            .insert(id.clone(), Participant::Client(Client::new(id.clone())));
        Ok(id)
    }

    fn register(&mut self, id: NodeId, kind: ParticipantKind, priority: u32) -> Result<()> {
        self.ctx.registry.register(id.clone(), kind, Some(priority))?;
        tracing::debug!(participant = %id, ?kind, "add");
        self.ctx.log.log(SimEvent::Add { participant: id });
        Ok(())
    }

    /// Marks a participant failed: messages to it are dropped and its
    /// timers are discarded when they reach the head of the list.
    pub fn fail(&mut self, id: &NodeId) -> Result<()> {
        self.ctx.registry.set_failed(id, true)?;
        tracing::info!(node = %id, "fail");
        self.ctx.log.log(SimEvent::Fail { node: id.clone() });
        Ok(())
    }

    /// Clears the failed flag. A node whose probe timer was discarded while
    /// it was down gets a fresh one.
    pub fn recover(&mut self, id: &NodeId) -> Result<()> {
        self.ctx.registry.set_failed(id, false)?;
        tracing::info!(node = %id, "recover");
        self.ctx.log.log(SimEvent::Recover { node: id.clone() });
        if let Some(Participant::Node(node)) = self.participants.get(id) {
            if !self.ctx.timers.has_pending(id, TimerReason::Probe) {
                node.arm_probe(&mut self.ctx);
            }
        }
        Ok(())
    }

    /// Takes a node out of the ring and out of random destination choice.
    pub fn remove(&mut self, id: &NodeId) -> Result<()> {
        self.ctx.registry.set_included(id, false)?;
        tracing::info!(node = %id, "remove");
        self.ctx.log.log(SimEvent::Remove { node: id.clone() });
        self.ctx.rebuild_ring();
        Ok(())
    }

    pub fn restore(&mut self, id: &NodeId) -> Result<()> {
        self.ctx.registry.set_included(id, true)?;
        tracing::info!(node = %id, "restore");
        self.ctx.log.log(SimEvent::Restore { node: id.clone() });
        self.ctx.rebuild_ring();
        Ok(())
    }

    /// Blocks every message from a member of `from` to a member of `to`.
    pub fn disconnect(&mut self, from: &[NodeId], to: &[NodeId]) {
        self.ctx
            .bus
            .disconnect(from.iter().cloned(), to.iter().cloned(), &mut self.ctx.log);
    }

    pub fn heal_partitions(&mut self) {
        self.ctx.bus.heal_partitions(&mut self.ctx.log);
    }

    // ------------------------------------------------------------------------
    // Client Operations
    // ------------------------------------------------------------------------

    /// Has `client` write `value` under `key`, descending from `prior`.
    pub fn put(
        &mut self,
        client: &NodeId,
        key: Key,
        value: Value,
        prior: &[VectorClock],
        dest: Option<NodeId>,
    ) -> Result<MessageId> {
        match self.participants.get_mut(client) {
            Some(Participant::Client(c)) => c.put(key, value, prior, dest, &mut self.ctx),
            Some(Participant::Node(_)) => Err(SimError::NotAClient(client.clone())),
            None => Err(SimError::UnknownParticipant(client.clone())),
        }
    }

    pub fn get(&mut self, client: &NodeId, key: Key, dest: Option<NodeId>) -> Result<MessageId> {
        match self.participants.get_mut(client) {
            Some(Participant::Client(c)) => c.get(key, dest, &mut self.ctx),
            Some(Participant::Node(_)) => Err(SimError::NotAClient(client.clone())),
            None => Err(SimError::UnknownParticipant(client.clone())),
        }
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    /// Runs with the configured budgets.
    pub fn run_default(&mut self) -> Result<RunSummary> {
        self.run(self.limits())
    }

    /// Delivers queued messages, firing one timer each time the queue
    /// drains, until the simulation is idle or a budget runs out.
    pub fn run(&mut self, limits: RunLimits) -> Result<RunSummary> {
        let mut summary = RunSummary {
            messages_processed: 0,
            timers_fired: 0,
            stop: StopReason::Idle,
        };

        tracing::debug!(
            queued = self.ctx.bus.queued(),
            timers = self.ctx.timers.len(),
            ?limits,
            "run"
        );
        loop {
            if self.ctx.bus.is_empty() && self.ctx.timers.is_empty() {
                return Ok(summary);
            }

            while let Some(message) = self.ctx.bus.pop() {
                self.dispatch(message)?;
                summary.messages_processed += 1;
                if summary.messages_processed == limits.max_messages {
                    summary.stop = StopReason::MessageBudget;
                    return Ok(summary);
                }
            }

            if summary.timers_fired < limits.max_timers {
                let popped = self.ctx.timers.pop(&self.ctx.registry, &mut self.ctx.log);
                for request in popped.abandoned {
                    self.ctx.bus.abandon(request);
                }
                if let Some(timer) = popped.timer {
                    self.fire(timer)?;
                    summary.timers_fired += 1;
                }
            }
            if summary.timers_fired == limits.max_timers {
                summary.stop = StopReason::TimerBudget;
                return Ok(summary);
            }
        }
    }

    fn dispatch(&mut self, message: Message) -> Result<()> {
        match self.ctx.bus.route(&message, &self.ctx.registry) {
            Route::DestinationDown => {
                tracing::info!(from = %message.from, to = %message.to, %message, "drop, destination down");
                self.ctx.log.log(SimEvent::Drop { message });
            }
            Route::RouteDown => {
                tracing::info!(from = %message.from, to = %message.to, %message, "drop, route down");
                self.ctx.log.log(SimEvent::Cut { message });
            }
            Route::Deliver => {
                tracing::debug!(from = %message.from, to = %message.to, %message, "deliver");
                if message.is_response() {
                    self.ctx
                        .bus
                        .settle(&message, &mut self.ctx.timers, &mut self.ctx.log);
                }
                self.ctx.log.log(SimEvent::Deliver {
                    message: message.clone(),
                });
                let participant = self
                    .participants
                    .get_mut(&message.to)
                    .ok_or_else(|| SimError::UnknownParticipant(message.to.clone()))?;
                participant.handle(message, &mut self.ctx)?;
            }
        }
        Ok(())
    }

    fn fire(&mut self, timer: Timer) -> Result<()> {
        let participant = self
            .participants
            .get_mut(&timer.owner)
            .ok_or_else(|| SimError::UnknownParticipant(timer.owner.clone()))?;
        match timer.reason {
            TimerReason::Probe => {
                if let Participant::Node(node) = participant {
                    node.on_probe(&mut self.ctx);
                }
            }
            TimerReason::Response(request) => {
                let Some(request) = self.ctx.bus.take_timed_out(request) else {
                    return Ok(());
                };
                if let Some(retryable) = participant.as_retryable() {
                    retryable.on_request_timeout(request, &mut self.ctx)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn events(&self) -> &EventLog {
        &self.ctx.log
    }

    pub fn lookup(&self, name: &str) -> Option<&Participant> {
        let record = self.ctx.registry.lookup(name)?;
        self.participants.get(&record.id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        match self.participants.get(id) {
            Some(Participant::Node(node)) => Some(node),
            _ => None,
        }
    }

    pub fn client(&self, id: &NodeId) -> Option<&Client> {
        match self.participants.get(id) {
            Some(Participant::Client(client)) => Some(client),
            _ => None,
        }
    }

    /// Every node, in the order added.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.ctx
            .registry
            .iter()
            .filter(|r| r.kind == ParticipantKind::Node)
            .map(|r| r.id.clone())
            .collect()
    }

    /// A random ring member, as a client picks one.
    pub fn random_node(&mut self) -> Result<NodeId> {
        self.ctx.random_node()
    }

    pub fn is_failed(&self, id: &NodeId) -> bool {
        self.ctx.registry.is_failed(id)
    }

    /// The first `count` ring members for `key`, ignoring failures.
    pub fn preference_list(&self, key: &Key, count: usize) -> Vec<NodeId> {
        self.ctx.ring.find_nodes(key, count, &[]).0
    }

    /// Each participant's store contents, in the order added.
    pub fn contents(&self) -> Vec<(NodeId, Vec<String>)> {
        self.ctx
            .registry
            .iter()
            .filter_map(|r| self.participants.get(&r.id))
            .map(|p| (p.id().clone(), p.content()))
            .collect()
    }

    pub fn bus(&self) -> &MessageBus {
        &self.ctx.bus
    }

    pub fn timers(&self) -> &TimerList {
        &self.ctx.timers
    }

    /// Drops every participant, timer, queued message, partition rule and
    /// event, and restarts automatic naming. The configuration is kept.
    pub fn reset(&mut self) {
        tracing::debug!("reset");
        self.ctx = SimContext::new(self.ctx.config.clone());
        self.participants.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
