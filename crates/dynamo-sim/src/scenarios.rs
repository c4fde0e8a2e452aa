//! Scripted demonstration scenarios.
//!
//! Each scenario builds a small cluster, drives it through a fixed script
//! of client operations, failures and partitions, and hands back the
//! finished simulation. Scripts only make random choices through the
//! simulation's seeded RNG, so a scenario and a seed pin down the whole
//! event log.

use std::fmt::{self, Display};
use std::str::FromStr;

use dynamo_config::DynamoConfig;
use dynamo_types::{Key, NodeId, Value, VectorClock};

use crate::error::{Result, SimError};
use crate::{Client, Simulation};

/// Upper bound on single-timer steps spent waiting for a reply that a
/// partition may be holding up.
const MAX_WAIT_STEPS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    /// One put against six healthy nodes.
    SimplePut,
    /// A put, then a get of the same key.
    SimpleGet,
    /// Two clients writing different keys, interleaved.
    DoublePut,
    /// The node a client contacts fails before it can forward.
    FailInitialNode,
    /// The node a client contacts fails right after forwarding.
    FailForwardingNode,
    /// The second preference-list member fails during a put.
    FailNode2,
    /// The second and third preference-list members fail during a put.
    FailNodes23,
    /// A second put after nodes 2 and 3 failed, skipping them via handoff.
    FailNodes23SecondPut,
    /// Hinted handoff delivered once the failed owners recover.
    HandoffRecovery,
    /// Two read-modify-write cycles, each descending from the last.
    GetPutGetPut,
    /// A read followed by two chained writes.
    GetPutPut,
    /// The coordinator fails and another owner takes over writes.
    MetadataSimpleFail,
    /// Writes on both sides of a network partition.
    Partition,
    /// The partition heals and a read sees both sides' versions.
    PartitionRepair,
    /// A write after the repair reconciles the divergent versions.
    PartitionRestore,
}

/// A finished scenario.
#[derive(Debug)]
pub struct ScenarioRun {
    pub sim: Simulation,
    /// Sequence number of the first event in the part of the script the
    /// scenario is about.
    pub focus_seq: u64,
}

impl Scenario {
    /// Returns the command-line name of the scenario.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SimplePut => "simple-put",
            Self::SimpleGet => "simple-get",
            Self::DoublePut => "double-put",
            Self::FailInitialNode => "fail-initial-node",
            Self::FailForwardingNode => "fail-forwarding-node",
            Self::FailNode2 => "fail-node2",
            Self::FailNodes23 => "fail-nodes23",
            Self::FailNodes23SecondPut => "fail-nodes23-second-put",
            Self::HandoffRecovery => "handoff-recovery",
            Self::GetPutGetPut => "get-put-get-put",
            Self::GetPutPut => "get-put-put",
            Self::MetadataSimpleFail => "metadata-simple-fail",
            Self::Partition => "partition",
            Self::PartitionRepair => "partition-repair",
            Self::PartitionRestore => "partition-restore",
        }
    }

    /// Returns a description of what this scenario shows.
    pub fn description(&self) -> &'static str {
        match self {
            Self::SimplePut => "Single put to a random node, forwarded to the coordinator",
            Self::SimpleGet => "Put then get of the same key",
            Self::DoublePut => "Two clients writing different keys concurrently",
            Self::FailInitialNode => "Contacted node fails before forwarding; the client retries",
            Self::FailForwardingNode => "Contacted node fails after forwarding",
            Self::FailNode2 => "Second replica fails mid-put; the coordinator retries elsewhere",
            Self::FailNodes23 => "Second and third replicas fail mid-put",
            Self::FailNodes23SecondPut => "Later put skips the failed replicas with handoff hints",
            Self::HandoffRecovery => "Failed replicas recover and receive their handed-off keys",
            Self::GetPutGetPut => "Two read-then-write cycles with causal metadata",
            Self::GetPutPut => "Read then two chained writes",
            Self::MetadataSimpleFail => "Coordinator fails; the next owner coordinates writes",
            Self::Partition => "Both sides of a partition accept writes to the same key",
            Self::PartitionRepair => "Partition heals; a read returns the concurrent versions",
            Self::PartitionRestore => "A write descending from both versions reconciles them",
        }
    }

    /// Returns all scenarios.
    pub fn all() -> &'static [Scenario] {
        &[
            Self::SimplePut,
            Self::SimpleGet,
            Self::DoublePut,
            Self::FailInitialNode,
            Self::FailForwardingNode,
            Self::FailNode2,
            Self::FailNodes23,
            Self::FailNodes23SecondPut,
            Self::HandoffRecovery,
            Self::GetPutGetPut,
            Self::GetPutPut,
            Self::MetadataSimpleFail,
            Self::Partition,
            Self::PartitionRepair,
            Self::PartitionRestore,
        ]
    }

    /// Runs the scenario's script on a fresh simulation.
    pub fn run(self, config: DynamoConfig) -> Result<ScenarioRun> {
        tracing::info!(scenario = self.name(), seed = config.seed, "running scenario");
        let mut script = Script::new(config)?;
        match self {
            Self::SimplePut => script.simple_put()?,
            Self::SimpleGet => script.simple_get()?,
            Self::DoublePut => script.double_put()?,
            Self::FailInitialNode => script.fail_initial_node(false)?,
            Self::FailForwardingNode => script.fail_initial_node(true)?,
            Self::FailNode2 => script.fail_node2()?,
            Self::FailNodes23 => {
                script.fail_nodes23()?;
            }
            Self::FailNodes23SecondPut => {
                let coordinator = script.fail_nodes23()?;
                script.mark();
                script.put(Some(&coordinator), 2, &[])?;
                script.settle()?;
            }
            Self::HandoffRecovery => script.handoff_recovery()?,
            Self::GetPutGetPut => {
                script.get_put_get_put()?;
            }
            Self::GetPutPut => {
                let coordinator = script.get_put_get_put()?;
                script.mark();
                script.get_put_put(&coordinator)?;
            }
            Self::MetadataSimpleFail => script.metadata_simple_fail()?,
            Self::Partition => script.partition()?,
            Self::PartitionRepair => {
                script.partition()?;
                script.mark();
                script.partition_repair()?;
            }
            Self::PartitionRestore => {
                script.partition()?;
                script.partition_repair()?;
                script.mark();
                let prior = script.last_metadata(&script.a.clone());
                script.put(None, 101, &prior)?;
                script.run_timers(0)?;
            }
        }
        Ok(ScenarioRun {
            sim: script.sim,
            focus_seq: script.focus_seq,
        })
    }
}

impl Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| SimError::UnknownScenario(s.to_string()))
    }
}

// ============================================================================
// Scripts
// ============================================================================

/// Six nodes `A`..`F` and client `a`, all writing key `K1`.
struct Script {
    sim: Simulation,
    a: NodeId,
    key: Key,
    focus_seq: u64,
}

impl Script {
    fn new(config: DynamoConfig) -> Result<Self> {
        let mut sim = Simulation::new(config)?;
        for _ in 0..6 {
            sim.add_node()?;
        }
        let a = sim.add_client("a")?;
        Ok(Self {
            sim,
            a,
            key: Key::from("K1"),
            focus_seq: 0,
        })
    }

    fn mark(&mut self) {
        self.focus_seq = self.sim.events().next_seq();
    }

    fn put(&mut self, dest: Option<&NodeId>, value: u64, prior: &[VectorClock]) -> Result<()> {
        let a = self.a.clone();
        self.put_as(&a, dest, value, prior)
    }

    fn put_as(
        &mut self,
        client: &NodeId,
        dest: Option<&NodeId>,
        value: u64,
        prior: &[VectorClock],
    ) -> Result<()> {
        self.sim.put(
            client,
            self.key.clone(),
            Value::from(value),
            prior,
            dest.cloned(),
        )?;
        Ok(())
    }

    fn get(&mut self, dest: Option<&NodeId>) -> Result<()> {
        let a = self.a.clone();
        self.get_as(&a, dest)
    }

    fn get_as(&mut self, client: &NodeId, dest: Option<&NodeId>) -> Result<()> {
        self.sim.get(client, self.key.clone(), dest.cloned())?;
        Ok(())
    }

    /// Runs with the configured budgets.
    fn settle(&mut self) -> Result<()> {
        self.sim.run_default()?;
        Ok(())
    }

    fn run_messages(&mut self, max_messages: usize) -> Result<()> {
        let limits = self.sim.limits().with_max_messages(max_messages);
        self.sim.run(limits)?;
        Ok(())
    }

    fn run_timers(&mut self, max_timers: usize) -> Result<()> {
        let limits = self.sim.limits().with_max_timers(max_timers);
        self.sim.run(limits)?;
        Ok(())
    }

    fn preference_list(&self, count: usize) -> Vec<NodeId> {
        self.sim.preference_list(&self.key, count)
    }

    fn last_metadata(&self, client: &NodeId) -> Vec<VectorClock> {
        self.sim
            .client(client)
            .map(Client::last_metadata)
            .unwrap_or_default()
    }

    fn member(list: &[NodeId], index: usize) -> Result<NodeId> {
        list.get(index).cloned().ok_or(SimError::NoNodes)
    }

    // ------------------------------------------------------------------------

    fn simple_put(&mut self) -> Result<()> {
        self.put(None, 1, &[])?;
        self.settle()
    }

    fn simple_get(&mut self) -> Result<()> {
        self.put(None, 1, &[])?;
        self.settle()?;
        self.mark();
        self.get(None)?;
        self.settle()
    }

    fn double_put(&mut self) -> Result<()> {
        let b = self.sim.add_client("b")?;
        self.put(None, 1, &[])?;
        self.run_messages(1)?;
        self.sim
            .put(&b, Key::from("K2"), Value::from(17u64), &[], None)?;
        self.settle()
    }

    fn fail_initial_node(&mut self, after_forward: bool) -> Result<()> {
        let dest = self.sim.random_node()?;
        self.put(Some(&dest), 1, &[])?;
        if after_forward {
            self.run_messages(1)?;
        }
        self.sim.fail(&dest)?;
        self.settle()
    }

    fn fail_node2(&mut self) -> Result<()> {
        self.put(None, 1, &[])?;
        let preference = self.preference_list(3);
        self.run_messages(1)?;
        self.sim.fail(&Self::member(&preference, 1)?)?;
        self.settle()?;
        self.get(None)?;
        self.settle()
    }

    /// Returns the key's coordinator.
    fn fail_nodes23(&mut self) -> Result<NodeId> {
        let preference = self.preference_list(5);
        let coordinator = Self::member(&preference, 0)?;
        self.put(Some(&coordinator), 1, &[])?;
        self.run_messages(1)?;
        self.sim.fail(&Self::member(&preference, 1)?)?;
        self.sim.fail(&Self::member(&preference, 2)?)?;
        self.run_timers(2)?;
        Ok(coordinator)
    }

    fn handoff_recovery(&mut self) -> Result<()> {
        let coordinator = self.fail_nodes23()?;
        let preference = self.preference_list(5);
        self.put(Some(&coordinator), 2, &[])?;
        self.run_timers(10)?;
        self.mark();
        self.sim.recover(&Self::member(&preference, 1)?)?;
        self.sim.recover(&Self::member(&preference, 2)?)?;
        self.run_timers(15)
    }

    /// Returns the key's coordinator.
    fn get_put_get_put(&mut self) -> Result<NodeId> {
        let coordinator = Self::member(&self.preference_list(5), 0)?;
        let a = self.a.clone();
        for value in [1, 2] {
            self.get(Some(&coordinator))?;
            self.run_timers(0)?;
            let prior = self.last_metadata(&a);
            self.put(Some(&coordinator), value, &prior)?;
            self.run_timers(0)?;
        }
        Ok(coordinator)
    }

    fn get_put_put(&mut self, coordinator: &NodeId) -> Result<()> {
        let a = self.a.clone();
        self.get(Some(coordinator))?;
        self.run_timers(0)?;
        let prior = self.last_metadata(&a);
        self.put(Some(coordinator), 3, &prior)?;
        self.run_timers(0)?;
        let prior = self.last_metadata(&a);
        self.put(Some(coordinator), 4, &prior)?;
        self.run_timers(0)
    }

    fn metadata_simple_fail(&mut self) -> Result<()> {
        let coordinator = self.get_put_get_put()?;
        self.get_put_put(&coordinator)?;
        self.mark();
        let preference = self.preference_list(5);
        let successor = Self::member(&preference, 1)?;
        let prior = self.last_metadata(&self.a.clone());
        self.sim.fail(&coordinator)?;
        self.put(Some(&successor), 11, &prior)?;
        self.run_timers(0)?;
        self.get(Some(&successor))?;
        self.run_timers(0)
    }

    /// Cuts `(b A B C)` off from `(D E F a)` in both directions, then has
    /// `a` and `b` write on opposite sides.
    fn partition(&mut self) -> Result<()> {
        let b = self.sim.add_client("b")?;
        let a = self.a.clone();
        let nodes = self.sim.nodes();
        let coordinator = Self::member(&self.preference_list(5), 0)?;
        let first = Self::member(&nodes, 0)?;

        self.get(Some(&coordinator))?;
        self.run_timers(0)?;
        let prior = self.last_metadata(&a);
        self.put(Some(&coordinator), 1, &prior)?;
        self.run_timers(0)?;
        let a_prior = self.last_metadata(&a);

        let mut left = vec![b.clone()];
        left.extend(nodes.iter().take(3).cloned());
        let mut right: Vec<NodeId> = nodes.iter().skip(3).cloned().collect();
        right.push(a.clone());
        self.sim.disconnect(&left, &right);
        self.sim.disconnect(&right, &left);

        self.put(Some(&coordinator), 11, &a_prior)?;
        self.run_timers(2)?;

        self.get_as(&b, Some(&coordinator))?;
        let mut steps = 0;
        while self
            .sim
            .client(&b)
            .is_some_and(|client| client.last_response().is_none())
        {
            if steps == MAX_WAIT_STEPS {
                tracing::warn!(client = %b, steps, "no reply across the partition");
                break;
            }
            self.run_timers(1)?;
            steps += 1;
        }
        let b_prior = self.last_metadata(&b);
        self.put_as(&b, Some(&first), 21, &b_prior)?;
        self.run_timers(3)
    }

    fn partition_repair(&mut self) -> Result<()> {
        self.sim.heal_partitions();
        self.run_timers(12)?;
        self.get(None)?;
        self.run_timers(0)
    }
}
