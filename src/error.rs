//! Error types for the harness.

use crate::types::{FixtureId, LightState, NodeId};
use thiserror::Error;

/// Road-graph lookups and loading.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {0} not found in road graph")]
    UnknownNode(NodeId),

    #[error("node {0} defined more than once")]
    DuplicateNode(NodeId),

    #[error("invalid road graph JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Controller configuration problems. Any of these is fatal at start-up and
/// the activation barrier is never released.
#[derive(Debug, Error, PartialEq)]
pub enum ControllerError {
    #[error("controller has no fixtures configured")]
    NoFixtures,

    #[error("fixture {0} configured more than once")]
    DuplicateFixture(FixtureId),

    #[error("fixture {fixture} has no duration for {state}")]
    MissingPhase { fixture: FixtureId, state: LightState },

    #[error("fixture {fixture} has an out-of-range duration for {state}: {secs}s (allowed 0.001..=86400)")]
    InvalidDuration {
        fixture: FixtureId,
        state: LightState,
        secs: f64,
    },

    #[error("manual mode requires a command channel")]
    MissingCommandChannel,

    #[error("light controller task panicked: {0}")]
    Panicked(String),
}

/// Failure of a single `spawn_on_node` call. Never affects the controller or
/// other agents.
#[derive(Debug, Error, PartialEq)]
pub enum SpawnError {
    #[error("node {0} not found in road graph")]
    UnknownNode(NodeId),

    #[error("node {0} already has an agent")]
    NodeOccupied(NodeId),

    #[error("agent construction at node {node} failed: {reason}")]
    Construction { node: NodeId, reason: String },

    #[error("activation barrier not released within {secs:.1}s while spawning at {node}")]
    BarrierTimeout { node: NodeId, secs: f64 },
}

impl SpawnError {
    pub fn node(&self) -> &NodeId {
        match self {
            SpawnError::UnknownNode(n) | SpawnError::NodeOccupied(n) => n,
            SpawnError::Construction { node, .. } | SpawnError::BarrierTimeout { node, .. } => node,
        }
    }
}

/// Top-level error for loading and starting a harness run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
