//! External clients issuing puts and gets.

use dynamo_config::TimerConfig;
use dynamo_types::{Key, NodeId, Value, VectorClock, converge};

use crate::context::SimContext;
use crate::error::Result;
use crate::message::{Message, MessageId, Payload};
use crate::participant::Retryable;

#[derive(Debug)]
pub struct Client {
    id: NodeId,
    last_response: Option<Message>,
}

impl Client {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            last_response: None,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Writes `value` under `key`, descending from every clock in `prior`.
    ///
    /// With no `dest` the request goes to a random ring member.
    pub fn put(
        &mut self,
        key: Key,
        value: Value,
        prior: &[VectorClock],
        dest: Option<NodeId>,
        ctx: &mut SimContext,
    ) -> Result<MessageId> {
        let dest = match dest {
            Some(dest) => dest,
            None => ctx.random_node()?,
        };
        let metadata = converge(prior);
        tracing::debug!(client = %self.id, %dest, %key, %value, %metadata, "put");
        Ok(ctx.send(Message::new(
            self.id.clone(),
            dest,
            Payload::ClientPutRequest {
                key,
                value,
                metadata,
            },
        )))
    }

    pub fn get(&mut self, key: Key, dest: Option<NodeId>, ctx: &mut SimContext) -> Result<MessageId> {
        let dest = match dest {
            Some(dest) => dest,
            None => ctx.random_node()?,
        };
        tracing::debug!(client = %self.id, %dest, %key, "get");
        Ok(ctx.send(Message::new(
            self.id.clone(),
            dest,
            Payload::ClientGetRequest { key },
        )))
    }

    pub(crate) fn handle(&mut self, message: Message) {
        self.last_response = Some(message);
    }

    /// The most recent message delivered to this client.
    pub fn last_response(&self) -> Option<&Message> {
        self.last_response.as_ref()
    }

    /// Clocks carried by the last response, ready to pass as `prior` to the
    /// next put.
    pub fn last_metadata(&self) -> Vec<VectorClock> {
        match self.last_response.as_ref().map(|m| &m.payload) {
            Some(Payload::ClientGetResponse { versions, .. }) => {
                versions.iter().map(|v| v.clock.clone()).collect()
            }
            Some(Payload::ClientPutResponse { metadata, .. }) => vec![metadata.clone()],
            _ => Vec::new(),
        }
    }
}

impl Retryable for Client {
    fn timeout_priority(timers: &TimerConfig) -> u32 {
        timers.client_priority
    }

    /// Resubmits the same operation to a random node, with no retry cap.
    fn on_request_timeout(&mut self, request: Message, ctx: &mut SimContext) -> Result<()> {
        match request.payload {
            Payload::ClientPutRequest {
                key,
                value,
                metadata,
            } => {
                tracing::info!(client = %self.id, %key, "put timed out, retrying");
                self.put(key, value, &[metadata], None, ctx)?;
            }
            Payload::ClientGetRequest { key } => {
                tracing::info!(client = %self.id, %key, "get timed out, retrying");
                self.get(key, None, ctx)?;
            }
            _ => {}
        }
        Ok(())
    }
}
