//! Participants and the request-timeout capability.

use dynamo_config::TimerConfig;
use dynamo_types::NodeId;

use crate::client::Client;
use crate::context::SimContext;
use crate::error::Result;
use crate::message::Message;
use crate::node::Node;
use crate::registry::ParticipantKind;

/// Participants that react when a request they sent goes unanswered.
///
/// The bus only arms reply timers on requests from participants that
/// implement this.
pub trait Retryable {
    /// Priority of the reply timers armed on this participant's requests.
    fn timeout_priority(timers: &TimerConfig) -> u32
    where
        Self: Sized,
    {
        timers.default_priority
    }

    /// Called with the request whose reply timer fired.
    fn on_request_timeout(&mut self, request: Message, ctx: &mut SimContext) -> Result<()>;
}

#[derive(Debug)]
pub enum Participant {
    Node(Node),
    Client(Client),
}

impl Participant {
    pub fn id(&self) -> &NodeId {
        match self {
            Participant::Node(node) => node.id(),
            Participant::Client(client) => client.id(),
        }
    }

    pub fn kind(&self) -> ParticipantKind {
        match self {
            Participant::Node(_) => ParticipantKind::Node,
            Participant::Client(_) => ParticipantKind::Client,
        }
    }

    pub(crate) fn handle(&mut self, message: Message, ctx: &mut SimContext) -> Result<()> {
        match self {
            Participant::Node(node) => node.handle(message, ctx),
            Participant::Client(client) => {
                client.handle(message);
                Ok(())
            }
        }
    }

    pub fn as_retryable(&mut self) -> Option<&mut dyn Retryable> {
        match self {
            Participant::Node(node) => Some(node),
            Participant::Client(client) => Some(client),
        }
    }

    /// Local store contents as `key:value` strings; empty for clients.
    pub fn content(&self) -> Vec<String> {
        match self {
            Participant::Node(node) => node.content(),
            Participant::Client(_) => Vec::new(),
        }
    }
}
