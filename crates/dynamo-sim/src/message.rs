//! Protocol messages.
//!
//! Every message is a [`Message`] envelope carrying routing and correlation
//! fields around a closed [`Payload`] enum:
//!
//! ## Client traffic
//! - [`Payload::ClientPutRequest`] / [`Payload::ClientPutResponse`] - Client ↔ coordinator
//! - [`Payload::ClientGetRequest`] / [`Payload::ClientGetResponse`] - Client ↔ coordinator
//!
//! ## Replica traffic
//! - [`Payload::PutRequest`] / [`Payload::PutResponse`] - Coordinator ↔ replica
//! - [`Payload::GetRequest`] / [`Payload::GetResponse`] - Coordinator ↔ replica
//!
//! ## Failure detection
//! - [`Payload::PingRequest`] / [`Payload::PingResponse`] - Node ↔ suspected peer
//!
//! Messages are values: forwarding, retrying and replying all build a new
//! message that names what it correlates with, never patch a shared one.

use std::fmt::{self, Display};

use dynamo_types::{Key, NodeId, Value, VectorClock, Versioned};
use serde::{Deserialize, Serialize};

/// Coordinator-assigned sequence number, shared by a request's fan-out.
pub type SeqNo = u64;

/// Identity of one enqueued message.
///
/// Assigned by the bus when the message is sent; `MessageId::UNSENT` until
/// then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    pub const UNSENT: Self = Self(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Message Envelope
// ============================================================================

/// A routed protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: NodeId,
    pub to: NodeId,
    /// Correlates a coordinator's fan-out requests and their responses.
    pub msg_id: Option<SeqNo>,
    pub payload: Payload,
    /// Present when a non-coordinator redirected a client request.
    pub forwarded: Option<Forwarded>,
    /// Present on every response.
    pub in_reply_to: Option<ReplyTo>,
}

/// Back-references carried by a forwarded client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forwarded {
    /// The node that redirected the request.
    pub via: NodeId,
    /// The request the client actually sent.
    pub original: MessageId,
}

/// Back-references carried by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTo {
    /// The request being answered.
    pub request: MessageId,
    /// The client's original request, if `request` was a forwarded copy.
    pub original: Option<MessageId>,
}

impl ReplyTo {
    /// The request whose reply timer this response settles.
    pub fn timer_key(&self) -> MessageId {
        self.original.unwrap_or(self.request)
    }
}

impl Message {
    pub fn new(from: NodeId, to: NodeId, payload: Payload) -> Self {
        Self {
            id: MessageId::UNSENT,
            from,
            to,
            msg_id: None,
            payload,
            forwarded: None,
            in_reply_to: None,
        }
    }

    pub fn with_msg_id(mut self, msg_id: SeqNo) -> Self {
        self.msg_id = Some(msg_id);
        self
    }

    /// Builds the response to this request.
    ///
    /// Endpoints are swapped and `msg_id` is echoed. If this request was
    /// forwarded, the response also names the client's original request.
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            id: MessageId::UNSENT,
            from: self.to.clone(),
            to: self.from.clone(),
            msg_id: self.msg_id,
            payload,
            forwarded: None,
            in_reply_to: Some(ReplyTo {
                request: self.id,
                original: self.forwarded.as_ref().map(|f| f.original),
            }),
        }
    }

    /// Copy of this request bound for a different destination.
    pub fn redirect(&self, to: NodeId) -> Self {
        Self {
            id: MessageId::UNSENT,
            to,
            ..self.clone()
        }
    }

    /// Copy of this client request bound for its coordinator.
    ///
    /// Forwarding a request that was itself forwarded keeps pointing at the
    /// client's original, so the client's timer can still be found.
    pub fn forward_to(&self, to: NodeId) -> Self {
        let original = self
            .forwarded
            .as_ref()
            .map_or(self.id, |f| f.original);
        Self {
            id: MessageId::UNSENT,
            to,
            forwarded: Some(Forwarded {
                via: self.to.clone(),
                original,
            }),
            ..self.clone()
        }
    }

    pub fn is_response(&self) -> bool {
        self.payload.is_response()
    }
}

impl Display for Message {
    /// `{}` shows the payload summary; `{:#}` adds clocks to values.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.payload, f)
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    ClientPutRequest {
        key: Key,
        value: Value,
        metadata: VectorClock,
    },
    ClientPutResponse {
        key: Key,
        value: Value,
        metadata: VectorClock,
    },
    PutRequest {
        key: Key,
        value: Value,
        metadata: VectorClock,
        /// Owners this replica is standing in for.
        handoff: Option<Vec<NodeId>>,
    },
    PutResponse {
        key: Key,
        value: Value,
        metadata: VectorClock,
    },
    ClientGetRequest {
        key: Key,
    },
    /// Surviving concurrent versions; empty when no replica had the key.
    ClientGetResponse {
        key: Key,
        versions: Vec<Versioned>,
    },
    GetRequest {
        key: Key,
    },
    GetResponse {
        key: Key,
        found: Option<Versioned>,
    },
    PingRequest,
    PingResponse,
}

/// Payload discriminant, used to pair responses with requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    ClientPutRequest,
    ClientPutResponse,
    PutRequest,
    PutResponse,
    ClientGetRequest,
    ClientGetResponse,
    GetRequest,
    GetResponse,
    PingRequest,
    PingResponse,
}

impl PayloadKind {
    pub fn is_response(self) -> bool {
        self.request_kind().is_some()
    }

    /// The request kind a response kind answers.
    pub fn request_kind(self) -> Option<PayloadKind> {
        match self {
            PayloadKind::ClientPutResponse => Some(PayloadKind::ClientPutRequest),
            PayloadKind::PutResponse => Some(PayloadKind::PutRequest),
            PayloadKind::ClientGetResponse => Some(PayloadKind::ClientGetRequest),
            PayloadKind::GetResponse => Some(PayloadKind::GetRequest),
            PayloadKind::PingResponse => Some(PayloadKind::PingRequest),
            PayloadKind::ClientPutRequest
            | PayloadKind::PutRequest
            | PayloadKind::ClientGetRequest
            | PayloadKind::GetRequest
            | PayloadKind::PingRequest => None,
        }
    }
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::ClientPutRequest { .. } => PayloadKind::ClientPutRequest,
            Payload::ClientPutResponse { .. } => PayloadKind::ClientPutResponse,
            Payload::PutRequest { .. } => PayloadKind::PutRequest,
            Payload::PutResponse { .. } => PayloadKind::PutResponse,
            Payload::ClientGetRequest { .. } => PayloadKind::ClientGetRequest,
            Payload::ClientGetResponse { .. } => PayloadKind::ClientGetResponse,
            Payload::GetRequest { .. } => PayloadKind::GetRequest,
            Payload::GetResponse { .. } => PayloadKind::GetResponse,
            Payload::PingRequest => PayloadKind::PingRequest,
            Payload::PingResponse => PayloadKind::PingResponse,
        }
    }

    pub fn is_response(&self) -> bool {
        self.kind().is_response()
    }

    /// Short name, as shown in event logs.
    pub fn name(&self) -> &'static str {
        match self.kind() {
            PayloadKind::ClientPutRequest => "ClientPut",
            PayloadKind::ClientPutResponse => "ClientPutRsp",
            PayloadKind::PutRequest => "PutReq",
            PayloadKind::PutResponse => "PutRsp",
            PayloadKind::ClientGetRequest => "ClientGet",
            PayloadKind::ClientGetResponse => "ClientGetRsp",
            PayloadKind::GetRequest => "GetReq",
            PayloadKind::GetResponse => "GetRsp",
            PayloadKind::PingRequest => "PingReq",
            PayloadKind::PingResponse => "PingRsp",
        }
    }

    pub fn key(&self) -> Option<&Key> {
        match self {
            Payload::ClientPutRequest { key, .. }
            | Payload::ClientPutResponse { key, .. }
            | Payload::PutRequest { key, .. }
            | Payload::PutResponse { key, .. }
            | Payload::ClientGetRequest { key }
            | Payload::ClientGetResponse { key, .. }
            | Payload::GetRequest { key }
            | Payload::GetResponse { key, .. } => Some(key),
            Payload::PingRequest | Payload::PingResponse => None,
        }
    }
}

struct Shown<'a> {
    value: &'a Value,
    clock: &'a VectorClock,
    with_clock: bool,
}

impl<'a> Shown<'a> {
    fn new(value: &'a Value, clock: &'a VectorClock, with_clock: bool) -> Self {
        Self {
            value,
            clock,
            with_clock,
        }
    }
}

impl Display for Shown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.with_clock {
            write!(f, "{}@{}", self.value, self.clock)
        } else {
            write!(f, "{}", self.value)
        }
    }
}

impl Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let with_clock = f.alternate();
        let name = self.name();
        match self {
            Payload::ClientPutRequest {
                key,
                value,
                metadata,
            }
            | Payload::ClientPutResponse {
                key,
                value,
                metadata,
            }
            | Payload::PutResponse {
                key,
                value,
                metadata,
            }
            | Payload::PutRequest {
                key,
                value,
                metadata,
                handoff: None,
            } => write!(f, "{name}({key}={})", Shown::new(value, metadata, with_clock)),
            Payload::PutRequest {
                key,
                value,
                metadata,
                handoff: Some(handoff),
            } => {
                let names: Vec<&str> = handoff.iter().map(NodeId::as_str).collect();
                write!(
                    f,
                    "{name}({key}={}, handoff=({}))",
                    Shown::new(value, metadata, with_clock),
                    names.join(",")
                )
            }
            Payload::ClientGetRequest { key } | Payload::GetRequest { key } => {
                write!(f, "{name}({key}=?)")
            }
            Payload::ClientGetResponse { key, versions } => {
                let rendered: Vec<String> = versions
                    .iter()
                    .map(|v| Shown::new(&v.value, &v.clock, with_clock).to_string())
                    .collect();
                write!(f, "{name}({key}=[{}])", rendered.join(","))
            }
            Payload::GetResponse { key, found } => match found {
                Some(v) => write!(f, "{name}({key}={})", Shown::new(&v.value, &v.clock, with_clock)),
                None => write!(f, "{name}({key}=None)"),
            },
            Payload::PingRequest | Payload::PingResponse => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn clock_a1() -> VectorClock {
        let mut c = VectorClock::new();
        c.update(&node("A"), 1).unwrap();
        c
    }

    #[test]
    fn display_matches_log_format() {
        let put = Payload::ClientPutRequest {
            key: Key::from("K1"),
            value: Value::from(1),
            metadata: clock_a1(),
        };
        assert_eq!(put.to_string(), "ClientPut(K1=1)");
        assert_eq!(format!("{put:#}"), "ClientPut(K1=1@{A:1})");

        let handoff = Payload::PutRequest {
            key: Key::from("K1"),
            value: Value::from(1),
            metadata: clock_a1(),
            handoff: Some(vec![node("B"), node("C")]),
        };
        assert_eq!(handoff.to_string(), "PutReq(K1=1, handoff=(B,C))");

        let get = Payload::GetRequest { key: Key::from("K1") };
        assert_eq!(get.to_string(), "GetReq(K1=?)");
        assert_eq!(Payload::PingRequest.to_string(), "PingReq");
    }

    #[test]
    fn every_response_answers_one_request() {
        let kinds = [
            PayloadKind::ClientPutResponse,
            PayloadKind::PutResponse,
            PayloadKind::ClientGetResponse,
            PayloadKind::GetResponse,
            PayloadKind::PingResponse,
        ];
        for kind in kinds {
            let request = kind.request_kind().unwrap();
            assert!(!request.is_response());
        }
        assert!(!PayloadKind::PutRequest.is_response());
    }

    #[test]
    fn reply_swaps_endpoints_and_echoes_msg_id() {
        let mut request = Message::new(node("A"), node("B"), Payload::GetRequest { key: Key::from("K") })
            .with_msg_id(4);
        request.id = MessageId::new(9);
        let reply = request.reply(Payload::GetResponse {
            key: Key::from("K"),
            found: None,
        });
        assert_eq!(reply.from, node("B"));
        assert_eq!(reply.to, node("A"));
        assert_eq!(reply.msg_id, Some(4));
        assert_eq!(reply.in_reply_to.unwrap().timer_key(), MessageId::new(9));
        assert!(reply.is_response());
    }

    #[test]
    fn forwarding_keeps_the_original_request() {
        let mut request = Message::new(
            node("a"),
            node("A"),
            Payload::ClientGetRequest { key: Key::from("K") },
        );
        request.id = MessageId::new(3);
        let mut hop1 = request.forward_to(node("B"));
        hop1.id = MessageId::new(4);
        let mut hop2 = hop1.forward_to(node("C"));
        hop2.id = MessageId::new(5);

        assert_eq!(hop2.from, node("a"));
        assert_eq!(hop2.forwarded.as_ref().unwrap().via, node("B"));
        let reply = hop2.reply(Payload::ClientGetResponse {
            key: Key::from("K"),
            versions: vec![],
        });
        assert_eq!(reply.to, node("a"));
        assert_eq!(reply.in_reply_to.unwrap().timer_key(), MessageId::new(3));
    }

    #[test]
    fn redirect_is_a_fresh_message() {
        let mut request = Message::new(node("A"), node("B"), Payload::PingRequest).with_msg_id(2);
        request.id = MessageId::new(8);
        let retry = request.redirect(node("C"));
        assert_eq!(retry.id, MessageId::UNSENT);
        assert_eq!(retry.to, node("C"));
        assert_eq!(retry.msg_id, Some(2));
        assert_eq!(request.to, node("B"));
    }
}
