//! Replica and coordinator state machine.
//!
//! Every node can play both roles. A client request that reaches a node
//! outside the key's preference list is forwarded to the list's head; the
//! coordinator then fans out one replica request per preference-list member
//! and answers the client once `W` acks (or `R` replies) are in. A replica
//! that stays silent past its reply timer is treated as failed, and every
//! request the coordinator still has outstanding to it is retried against
//! the next live members of the ring.
//!
//! Writes that land on a stand-in replica carry a handoff hint naming the
//! owners they replace. The stand-in keeps probing those owners and
//! re-delivers the hinted keys once one of them answers.

use std::collections::{BTreeMap, BTreeSet};

use dynamo_config::{DynamoConfig, TimerConfig};
use dynamo_store::{Geometry, MerkleStore};
use dynamo_types::{Key, NodeId, Value, VectorClock, Versioned, coalesce};

use crate::context::SimContext;
use crate::error::{Result, SimError};
use crate::message::{Message, Payload, PayloadKind, SeqNo};
use crate::participant::Retryable;
use crate::timer::TimerReason;

/// Replies collected for one coordinated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quorum {
    /// Replicas that acknowledged a write.
    Write { acks: BTreeSet<NodeId> },
    /// What each replica returned for a read, one entry per replica.
    Read {
        replies: BTreeMap<NodeId, Option<Versioned>>,
    },
}

impl Quorum {
    /// Whether a replica request of `kind` belongs to this quorum.
    fn covers(&self, kind: PayloadKind) -> bool {
        matches!(
            (self, kind),
            (Quorum::Write { .. }, PayloadKind::PutRequest)
                | (Quorum::Read { .. }, PayloadKind::GetRequest)
        )
    }

    fn len(&self) -> usize {
        match self {
            Quorum::Write { acks } => acks.len(),
            Quorum::Read { replies } => replies.len(),
        }
    }
}

/// A client request this node is coordinating.
#[derive(Debug, Clone)]
pub struct InFlight {
    /// The client request as it reached this node.
    pub client_request: Message,
    /// Replicas already sent a request under this sequence number.
    pub tried: Vec<NodeId>,
    pub quorum: Quorum,
}

#[derive(Debug)]
pub struct Node {
    id: NodeId,
    next_seqno: SeqNo,
    store: MerkleStore<Versioned>,
    pending: BTreeMap<SeqNo, InFlight>,
    /// Peers believed down, oldest suspicion first. May repeat.
    failed_nodes: Vec<NodeId>,
    /// Keys held on behalf of each down owner.
    pending_handoffs: BTreeMap<NodeId, BTreeSet<Key>>,
}

impl Node {
    pub fn new(id: NodeId, config: &DynamoConfig) -> Result<Self> {
        let geometry = Geometry::with_depth(config.store.depth)?;
        Ok(Self {
            id,
            next_seqno: 0,
            store: MerkleStore::new(geometry),
            pending: BTreeMap::new(),
            failed_nodes: Vec::new(),
            pending_handoffs: BTreeMap::new(),
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    fn next_seqno(&mut self) -> SeqNo {
        self.next_seqno += 1;
        self.next_seqno
    }

    // ========================================================================
    // Local Store
    // ========================================================================

    pub fn put(&mut self, key: Key, value: Value, clock: VectorClock) -> Result<()> {
        self.store.put(key, value, clock)?;
        Ok(())
    }

    pub fn get(&self, key: &Key) -> Result<Option<&Versioned>> {
        Ok(self.store.get(key)?)
    }

    pub fn store(&self) -> &MerkleStore<Versioned> {
        &self.store
    }

    /// Stored entries as `key:value`, in store order.
    pub fn content(&self) -> Vec<String> {
        self.store
            .iter()
            .map(|(key, versioned)| format!("{key}:{}", versioned.value))
            .collect()
    }

    pub fn failed_peers(&self) -> &[NodeId] {
        &self.failed_nodes
    }

    pub fn pending_handoffs(&self) -> &BTreeMap<NodeId, BTreeSet<Key>> {
        &self.pending_handoffs
    }

    /// Requests this node is coordinating, by sequence number.
    pub fn in_flight(&self) -> &BTreeMap<SeqNo, InFlight> {
        &self.pending
    }

    // ========================================================================
    // Message Handling
    // ========================================================================

    pub(crate) fn handle(&mut self, message: Message, ctx: &mut SimContext) -> Result<()> {
        match &message.payload {
            Payload::ClientPutRequest {
                key,
                value,
                metadata,
            } => {
                let (key, value, metadata) = (key.clone(), value.clone(), metadata.clone());
                self.on_client_put(message, key, value, metadata, ctx)
            }
            Payload::ClientGetRequest { key } => {
                let key = key.clone();
                self.on_client_get(message, key, ctx)
            }
            Payload::PutRequest {
                key,
                value,
                metadata,
                handoff,
            } => {
                tracing::info!(node = %self.id, %key, %value, "store");
                self.store.put(key.clone(), value.clone(), metadata.clone())?;
                if let Some(owners) = handoff {
                    for owner in owners {
                        self.failed_nodes.push(owner.clone());
                        self.pending_handoffs
                            .entry(owner.clone())
                            .or_default()
                            .insert(key.clone());
                    }
                }
                ctx.send(message.reply(Payload::PutResponse {
                    key: key.clone(),
                    value: value.clone(),
                    metadata: metadata.clone(),
                }));
                Ok(())
            }
            Payload::PutResponse { .. } => {
                self.on_put_response(&message, ctx);
                Ok(())
            }
            Payload::GetRequest { key } => {
                tracing::info!(node = %self.id, %key, "retrieve");
                let found = self.store.get(key)?.cloned();
                ctx.send(message.reply(Payload::GetResponse {
                    key: key.clone(),
                    found,
                }));
                Ok(())
            }
            Payload::GetResponse { .. } => {
                self.on_get_response(&message, ctx);
                Ok(())
            }
            Payload::PingRequest => {
                ctx.send(message.reply(Payload::PingResponse));
                Ok(())
            }
            Payload::PingResponse => self.on_ping_response(&message, ctx),
            Payload::ClientPutResponse { .. } | Payload::ClientGetResponse { .. } => {
                Err(SimError::UnexpectedMessage {
                    node: self.id.clone(),
                    message: message.payload.name(),
                })
            }
        }
    }

    /// Forwards `message` to the coordinator unless this node is in the
    /// key's preference list. Returns the list and the avoided members when
    /// this node should coordinate.
    fn coordinate(
        &self,
        message: &Message,
        key: &Key,
        ctx: &mut SimContext,
    ) -> Option<(Vec<NodeId>, Vec<NodeId>)> {
        let (preference, avoided) = ctx.preference_list(key, &self.failed_nodes);
        if preference.contains(&self.id) {
            return Some((preference, avoided));
        }
        match preference.first() {
            Some(coordinator) => {
                tracing::info!(node = %self.id, %key, %coordinator, "forward to coordinator");
                ctx.forward(message, coordinator.clone());
            }
            None => {
                tracing::warn!(node = %self.id, %key, "no live node owns key, dropping request");
            }
        }
        None
    }

    fn on_client_put(
        &mut self,
        message: Message,
        key: Key,
        value: Value,
        mut metadata: VectorClock,
        ctx: &mut SimContext,
    ) -> Result<()> {
        let Some((preference, mut avoided)) = self.coordinate(&message, &key, ctx) else {
            return Ok(());
        };
        let n = ctx.config.replication.n;
        avoided.truncate(n);
        let owners_reached = n.saturating_sub(avoided.len());

        let seqno = self.next_seqno();
        metadata.update(&self.id, seqno)?;
        tracing::info!(node = %self.id, seqno, %key, %value, "coordinate put");

        let mut tried = Vec::with_capacity(n);
        for (index, replica) in preference.into_iter().take(n).enumerate() {
            let handoff = (index >= owners_reached).then(|| avoided.clone());
            let request = Message::new(
                self.id.clone(),
                replica.clone(),
                Payload::PutRequest {
                    key: key.clone(),
                    value: value.clone(),
                    metadata: metadata.clone(),
                    handoff,
                },
            )
            .with_msg_id(seqno);
            tried.push(replica);
            ctx.send(request);
        }

        self.pending.insert(
            seqno,
            InFlight {
                client_request: message,
                tried,
                quorum: Quorum::Write {
                    acks: BTreeSet::new(),
                },
            },
        );
        Ok(())
    }

    fn on_client_get(&mut self, message: Message, key: Key, ctx: &mut SimContext) -> Result<()> {
        let Some((preference, _)) = self.coordinate(&message, &key, ctx) else {
            return Ok(());
        };
        let n = ctx.config.replication.n;
        let seqno = self.next_seqno();
        tracing::info!(node = %self.id, seqno, %key, "coordinate get");

        let mut tried = Vec::with_capacity(n);
        for replica in preference.into_iter().take(n) {
            let request = Message::new(
                self.id.clone(),
                replica.clone(),
                Payload::GetRequest { key: key.clone() },
            )
            .with_msg_id(seqno);
            tried.push(replica);
            ctx.send(request);
        }

        self.pending.insert(
            seqno,
            InFlight {
                client_request: message,
                tried,
                quorum: Quorum::Read {
                    replies: BTreeMap::new(),
                },
            },
        );
        Ok(())
    }

    fn on_put_response(&mut self, response: &Message, ctx: &mut SimContext) {
        let Payload::PutResponse {
            key,
            value,
            metadata,
        } = &response.payload
        else {
            return;
        };
        let Some(seqno) = response.msg_id else {
            return;
        };
        let Some(in_flight) = self.pending.get_mut(&seqno) else {
            tracing::trace!(node = %self.id, seqno, "late put ack");
            return;
        };
        let Quorum::Write { acks } = &mut in_flight.quorum else {
            return;
        };
        acks.insert(response.from.clone());
        if acks.len() < ctx.config.replication.w {
            return;
        }

        let Some(done) = self.pending.remove(&seqno) else {
            return;
        };
        tracing::info!(node = %self.id, seqno, %key, copies = done.quorum.len(), "write quorum met");
        ctx.send(done.client_request.reply(Payload::ClientPutResponse {
            key: key.clone(),
            value: value.clone(),
            metadata: metadata.clone(),
        }));
    }

    fn on_get_response(&mut self, response: &Message, ctx: &mut SimContext) {
        let Payload::GetResponse { key, found } = &response.payload else {
            return;
        };
        let Some(seqno) = response.msg_id else {
            return;
        };
        let Some(in_flight) = self.pending.get_mut(&seqno) else {
            tracing::trace!(node = %self.id, seqno, "late read reply");
            return;
        };
        let Quorum::Read { replies } = &mut in_flight.quorum else {
            return;
        };
        replies.insert(response.from.clone(), found.clone());
        if replies.len() < ctx.config.replication.r {
            return;
        }

        let Some(InFlight {
            client_request,
            quorum: Quorum::Read { replies },
            ..
        }) = self.pending.remove(&seqno)
        else {
            return;
        };
        tracing::info!(node = %self.id, seqno, %key, copies = replies.len(), "read quorum met");

        let observations = replies.into_values().map(|found| match found {
            Some(Versioned { value, clock }) => (Some(value), clock),
            None => (None, VectorClock::new()),
        });
        let versions = coalesce(observations)
            .into_iter()
            .filter_map(|(value, clock)| value.map(|value| Versioned::new(value, clock)))
            .collect();
        ctx.send(client_request.reply(Payload::ClientGetResponse {
            key: key.clone(),
            versions,
        }));
    }

    fn on_ping_response(&mut self, response: &Message, ctx: &mut SimContext) -> Result<()> {
        let recovered = &response.from;
        self.failed_nodes.retain(|peer| peer != recovered);
        let Some(keys) = self.pending_handoffs.remove(recovered) else {
            return Ok(());
        };
        tracing::info!(node = %self.id, peer = %recovered, keys = keys.len(), "handing off to recovered peer");
        for key in keys {
            let Some(held) = self.store.get(&key)?.cloned() else {
                continue;
            };
            ctx.send(Message::new(
                self.id.clone(),
                recovered.clone(),
                Payload::PutRequest {
                    key,
                    value: held.value,
                    metadata: held.clock,
                    handoff: None,
                },
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Failure Detection
    // ========================================================================

    /// Arms the recurring probe timer.
    pub(crate) fn arm_probe(&self, ctx: &mut SimContext) {
        let priority = ctx.config.timers.probe_priority;
        ctx.start_timer(&self.id, priority, TimerReason::Probe);
    }

    /// Pings the longest-suspected peer, then re-arms the probe.
    pub(crate) fn on_probe(&mut self, ctx: &mut SimContext) {
        if !self.failed_nodes.is_empty() {
            let suspect = self.failed_nodes.remove(0);
            tracing::debug!(node = %self.id, peer = %suspect, "probe");
            ctx.send(Message::new(
                self.id.clone(),
                suspect,
                Payload::PingRequest,
            ));
        }
        self.arm_probe(ctx);
    }

    /// Re-sends a timed-out replica request to preference-list members not
    /// yet tried under the same sequence number.
    fn retry(&mut self, request: &Message, ctx: &mut SimContext) {
        let (Some(seqno), Some(key)) = (request.msg_id, request.payload.key()) else {
            return;
        };
        let Some(in_flight) = self.pending.get_mut(&seqno) else {
            return;
        };
        if !in_flight.quorum.covers(request.payload.kind()) {
            return;
        }
        let (preference, _) = ctx.preference_list(key, &self.failed_nodes);
        for replica in preference {
            if in_flight.tried.contains(&replica) {
                continue;
            }
            tracing::debug!(node = %self.id, seqno, %replica, "retry");
            in_flight.tried.push(replica.clone());
            ctx.send(request.redirect(replica));
        }
    }
}

impl Retryable for Node {
    fn timeout_priority(timers: &TimerConfig) -> u32 {
        timers.node_priority
    }

    fn on_request_timeout(&mut self, request: Message, ctx: &mut SimContext) -> Result<()> {
        let peer = request.to.clone();
        tracing::info!(node = %self.id, %peer, "treating peer as failed");
        self.failed_nodes.push(peer.clone());

        let mut orphaned = ctx
            .bus
            .cancel_timers_to(&self.id, &peer, &mut ctx.timers, &mut ctx.log);
        orphaned.push(request);
        for request in &orphaned {
            self.retry(request, ctx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(node: &str, counter: u64) -> VectorClock {
        let mut clock = VectorClock::new();
        clock.update(&NodeId::from(node), counter).unwrap();
        clock
    }

    #[test]
    fn quorum_kinds_cover_their_requests() {
        let write = Quorum::Write {
            acks: BTreeSet::new(),
        };
        let read = Quorum::Read {
            replies: BTreeMap::new(),
        };
        assert!(write.covers(PayloadKind::PutRequest));
        assert!(!write.covers(PayloadKind::GetRequest));
        assert!(read.covers(PayloadKind::GetRequest));
        assert!(!read.covers(PayloadKind::PingRequest));
    }

    #[test]
    fn local_store_accessors() {
        let mut node = Node::new(NodeId::from("A"), &DynamoConfig::default()).unwrap();
        assert!(node.content().is_empty());

        node.put(Key::from("K1"), Value::from(1u64), clock("A", 1))
            .unwrap();
        node.put(Key::from("K1"), Value::from(2u64), clock("A", 2))
            .unwrap();

        let held = node.get(&Key::from("K1")).unwrap().unwrap();
        assert_eq!(held.value, Value::from(2u64));
        assert_eq!(node.content(), vec!["K1:2".to_string()]);
        assert_eq!(node.get(&Key::from("K2")).unwrap(), None);
    }

    #[test]
    fn sequence_numbers_start_at_one() {
        let mut node = Node::new(NodeId::from("A"), &DynamoConfig::default()).unwrap();
        assert_eq!(node.next_seqno(), 1);
        assert_eq!(node.next_seqno(), 2);
    }
}
