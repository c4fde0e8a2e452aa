//! Deterministic message bus.
//!
//! A single global FIFO queue plus directional partition rules. The bus is
//! also where message delivery meets the timers: sending a request that
//! expects a reply arms a timer on the sender, and delivering the matching
//! response cancels it. When the timer wins instead, the run loop asks the
//! bus for the timed-out request and hands it to the sender's
//! [`Retryable`](crate::Retryable) handler.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use dynamo_types::NodeId;

use crate::event_log::{EventLog, SimEvent};
use crate::message::{Message, MessageId};
use crate::registry::Registry;
use crate::timer::{TimerId, TimerList, TimerReason};

/// Directional reachability rule: nothing in `from` reaches anything in `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub from: BTreeSet<NodeId>,
    pub to: BTreeSet<NodeId>,
}

impl Partition {
    fn blocks(&self, from: &NodeId, to: &NodeId) -> bool {
        self.from.contains(from) && self.to.contains(to)
    }
}

/// What happens to a message at the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Deliver,
    /// The destination is failed.
    DestinationDown,
    /// A partition rule blocks sender to destination.
    RouteDown,
}

#[derive(Debug)]
struct AwaitingReply {
    timer: TimerId,
    request: Message,
}

#[derive(Debug, Default)]
pub struct MessageBus {
    queue: VecDeque<Message>,
    partitions: Vec<Partition>,
    /// Requests with an armed reply timer, in send order.
    awaiting: BTreeMap<MessageId, AwaitingReply>,
    next_id: u64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn assign_id(&mut self, message: &mut Message) -> MessageId {
        self.next_id += 1;
        message.id = MessageId::new(self.next_id);
        message.id
    }

    /// Enqueues `message`.
    ///
    /// A reply timer is armed when `expect_reply` is set, the message is a
    /// request, and the sender handles request timeouts. The timer is not
    /// armed if the sender is failed.
    pub fn send(
        &mut self,
        mut message: Message,
        expect_reply: bool,
        timers: &mut TimerList,
        registry: &Registry,
        log: &mut EventLog,
    ) -> MessageId {
        let id = self.assign_id(&mut message);
        tracing::debug!(from = %message.from, to = %message.to, %message, "enqueue");
        log.log(SimEvent::Send {
            message: message.clone(),
        });

        if expect_reply && !message.is_response() {
            if let Some(priority) = registry.timeout_priority(&message.from) {
                let owner = message.from.clone();
                if let Some(timer) =
                    timers.start(&owner, priority, TimerReason::Response(id), registry, log)
                {
                    self.awaiting.insert(
                        id,
                        AwaitingReply {
                            timer,
                            request: message.clone(),
                        },
                    );
                }
            }
        }

        self.queue.push_back(message);
        id
    }

    /// Redirects a client request to its coordinator. No timer is armed;
    /// the client's own timer still covers the request.
    pub fn forward(&mut self, message: &Message, to: NodeId, log: &mut EventLog) -> MessageId {
        let mut forwarded = message.forward_to(to);
        let id = self.assign_id(&mut forwarded);
        tracing::debug!(via = %message.to, to = %forwarded.to, %forwarded, "enqueue forwarded");
        log.log(SimEvent::Forward {
            message: forwarded.clone(),
        });
        self.queue.push_back(forwarded);
        id
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    /// Decides the fate of a dequeued message.
    pub fn route(&self, message: &Message, registry: &Registry) -> Route {
        if registry.is_failed(&message.to) {
            Route::DestinationDown
        } else if !self.is_reachable(&message.from, &message.to) {
            Route::RouteDown
        } else {
            Route::Deliver
        }
    }

    /// Settles the reply timer of the request `response` answers, if any.
    pub fn settle(&mut self, response: &Message, timers: &mut TimerList, log: &mut EventLog) {
        let Some(reply_to) = response.in_reply_to else {
            return;
        };
        if let Some(awaiting) = self.awaiting.remove(&reply_to.timer_key()) {
            timers.cancel(awaiting.timer, log);
        }
    }

    /// Takes the request whose reply timer just fired.
    pub fn take_timed_out(&mut self, request: MessageId) -> Option<Message> {
        self.awaiting.remove(&request).map(|a| a.request)
    }

    /// Forgets a request whose reply timer was discarded without firing.
    pub fn abandon(&mut self, request: MessageId) -> bool {
        self.awaiting.remove(&request).is_some()
    }

    /// Cancels every reply timer `owner` holds on requests sent to `dest`,
    /// returning those requests in send order.
    pub fn cancel_timers_to(
        &mut self,
        owner: &NodeId,
        dest: &NodeId,
        timers: &mut TimerList,
        log: &mut EventLog,
    ) -> Vec<Message> {
        let orphaned: Vec<MessageId> = self
            .awaiting
            .iter()
            .filter(|(_, a)| a.request.from == *owner && a.request.to == *dest)
            .map(|(id, _)| *id)
            .collect();
        orphaned
            .into_iter()
            .filter_map(|id| self.awaiting.remove(&id))
            .map(|awaiting| {
                timers.cancel(awaiting.timer, log);
                awaiting.request
            })
            .collect()
    }

    /// Installs a one-way partition from every member of `from` to every
    /// member of `to`.
    pub fn disconnect(
        &mut self,
        from: impl IntoIterator<Item = NodeId>,
        to: impl IntoIterator<Item = NodeId>,
        log: &mut EventLog,
    ) {
        let partition = Partition {
            from: from.into_iter().collect(),
            to: to.into_iter().collect(),
        };
        let text = format!(
            "Cut {} -> {}",
            name_list(&partition.from),
            name_list(&partition.to)
        );
        tracing::info!(%text, "partition installed");
        log.log(SimEvent::Announce { text });
        self.partitions.push(partition);
    }

    /// Removes every partition rule.
    pub fn heal_partitions(&mut self, log: &mut EventLog) {
        if self.partitions.is_empty() {
            return;
        }
        self.partitions.clear();
        tracing::info!("partitions healed");
        log.log(SimEvent::Announce {
            text: "Heal all partitions".to_string(),
        });
    }

    pub fn is_reachable(&self, from: &NodeId, to: &NodeId) -> bool {
        !self.partitions.iter().any(|p| p.blocks(from, to))
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Requests still waiting on a reply timer.
    pub fn awaiting_reply(&self) -> usize {
        self.awaiting.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.partitions.clear();
        self.awaiting.clear();
    }
}

fn name_list(names: &BTreeSet<NodeId>) -> String {
    let names: Vec<&str> = names.iter().map(NodeId::as_str).collect();
    format!("[{}]", names.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use crate::registry::ParticipantKind;
    use dynamo_types::Key;

    struct Harness {
        bus: MessageBus,
        timers: TimerList,
        registry: Registry,
        log: EventLog,
    }

    impl Harness {
        fn new() -> Self {
            let mut registry = Registry::new();
            for name in ["A", "B", "C"] {
                registry
                    .register(NodeId::from(name), ParticipantKind::Node, Some(20))
                    .unwrap();
            }
            registry
                .register(NodeId::from("x"), ParticipantKind::Node, None)
                .unwrap();
            Self {
                bus: MessageBus::new(),
                timers: TimerList::new(),
                registry,
                log: EventLog::new(),
            }
        }

        fn send(&mut self, message: Message) -> MessageId {
            self.bus
                .send(message, true, &mut self.timers, &self.registry, &mut self.log)
        }
    }

    fn get(from: &str, to: &str) -> Message {
        Message::new(
            NodeId::from(from),
            NodeId::from(to),
            Payload::GetRequest { key: Key::from("K1") },
        )
        .with_msg_id(1)
    }

    #[test]
    fn requests_arm_timers_and_responses_settle_them() {
        let mut h = Harness::new();
        h.send(get("A", "B"));
        assert_eq!(h.timers.len(), 1);
        assert_eq!(h.bus.awaiting_reply(), 1);

        let request = h.bus.pop().unwrap();
        let response = request.reply(Payload::GetResponse {
            key: Key::from("K1"),
            found: None,
        });
        h.send(response);
        assert_eq!(h.timers.len(), 1, "responses never arm timers");

        let response = h.bus.pop().unwrap();
        h.bus.settle(&response, &mut h.timers, &mut h.log);
        assert!(h.timers.is_empty());
        assert_eq!(h.bus.awaiting_reply(), 0);
    }

    #[test]
    fn senders_without_timeout_handling_arm_nothing() {
        let mut h = Harness::new();
        h.send(get("x", "A"));
        assert!(h.timers.is_empty());
        h.bus
            .send(get("A", "B"), false, &mut h.timers, &h.registry, &mut h.log);
        assert!(h.timers.is_empty());
        assert_eq!(h.bus.queued(), 2);
    }

    #[test]
    fn forwarded_responses_settle_the_original_timer() {
        let mut h = Harness::new();
        let original = Message::new(
            NodeId::from("A"),
            NodeId::from("B"),
            Payload::ClientGetRequest { key: Key::from("K1") },
        );
        h.send(original);
        let at_b = h.bus.pop().unwrap();
        h.bus.forward(&at_b, NodeId::from("C"), &mut h.log);
        let at_c = h.bus.pop().unwrap();
        assert_eq!(at_c.from, NodeId::from("A"));

        let response = at_c.reply(Payload::ClientGetResponse {
            key: Key::from("K1"),
            versions: vec![],
        });
        h.bus.settle(&response, &mut h.timers, &mut h.log);
        assert!(h.timers.is_empty());
    }

    #[test]
    fn cancel_timers_to_is_scoped_to_owner_and_destination() {
        let mut h = Harness::new();
        h.send(get("A", "B"));
        h.send(get("A", "C"));
        h.send(get("C", "B"));
        h.send(get("A", "B").with_msg_id(2));

        let orphaned = h
            .bus
            .cancel_timers_to(&NodeId::from("A"), &NodeId::from("B"), &mut h.timers, &mut h.log);
        assert_eq!(
            orphaned.iter().map(|m| m.msg_id).collect::<Vec<_>>(),
            vec![Some(1), Some(2)]
        );
        assert_eq!(h.timers.len(), 2);
        assert_eq!(h.bus.awaiting_reply(), 2);
    }

    #[test]
    fn routing_checks_failure_then_partition() {
        let mut h = Harness::new();
        let a = NodeId::from("A");
        let b = NodeId::from("B");
        h.bus.disconnect([a.clone()], [b.clone()], &mut h.log);
        assert!(!h.bus.is_reachable(&a, &b));
        assert!(h.bus.is_reachable(&b, &a));
        assert_eq!(h.bus.route(&get("A", "B"), &h.registry), Route::RouteDown);
        assert_eq!(h.bus.route(&get("B", "A"), &h.registry), Route::Deliver);

        h.registry.set_failed(&b, true).unwrap();
        assert_eq!(h.bus.route(&get("A", "B"), &h.registry), Route::DestinationDown);

        h.bus.heal_partitions(&mut h.log);
        assert!(h.bus.is_reachable(&a, &b));
        let announcements: Vec<_> = h
            .log
            .iter()
            .filter_map(|e| match &e.event {
                SimEvent::Announce { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(announcements, vec!["Cut [A] -> [B]", "Heal all partitions"]);
    }
}
