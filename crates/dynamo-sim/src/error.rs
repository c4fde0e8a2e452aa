//! Simulation error types.

use dynamo_config::ConfigError;
use dynamo_store::StoreError;
use dynamo_types::{ClockError, NodeId};
use thiserror::Error;

/// Errors that abort a simulation step.
///
/// Dropped or partitioned messages are not errors; they are recorded in the
/// event log and handled by the retry machinery. Everything here indicates a
/// modelling mistake or misuse of the API.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("{node} cannot handle {message}")]
    UnexpectedMessage { node: NodeId, message: &'static str },

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown participant {0}")]
    UnknownParticipant(NodeId),

    #[error("participant name {0} is already taken")]
    DuplicateName(NodeId),

    #[error("automatic names exhausted after {0} participants")]
    NameSpaceExhausted(usize),

    #[error("{0} is not a client")]
    NotAClient(NodeId),

    #[error("{0} is not a node")]
    NotANode(NodeId),

    #[error("no nodes to choose a destination from")]
    NoNodes,

    #[error("unknown scenario {0:?}")]
    UnknownScenario(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SimError>;
