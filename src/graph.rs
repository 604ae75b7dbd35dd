//! Road-graph adapter: the `RoadGraph` lookup trait and an in-memory
//! implementation loaded from the map generator's node export.

use crate::error::GraphError;
use crate::types::{FixtureId, NodeId, Pose};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A spawn point on the road graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub pose: Pose,
    /// The light that governs traffic leaving this node, if any.
    #[serde(default)]
    pub fixture: Option<FixtureId>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, pose: Pose) -> Self {
        Self {
            id: id.into(),
            pose,
            fixture: None,
        }
    }

    pub fn governed_by(mut self, fixture: impl Into<FixtureId>) -> Self {
        self.fixture = Some(fixture.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Anything that can resolve node identifiers to spawn poses.
///
/// Map generation lives outside the harness; it only has to hand over
/// something implementing this.
pub trait RoadGraph: Send + Sync {
    fn lookup(&self, id: &NodeId) -> Result<&Node, GraphError>;

    fn node_ids(&self) -> Vec<NodeId>;

    fn contains(&self, id: &NodeId) -> bool {
        self.lookup(id).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Static graph
// ---------------------------------------------------------------------------

/// Immutable node table, built once at map-generation time.
#[derive(Debug, Default)]
pub struct StaticRoadGraph {
    nodes: HashMap<NodeId, Node>,
}

impl StaticRoadGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in nodes {
            graph.insert(node)?;
        }
        Ok(graph)
    }

    /// Parse a JSON array of nodes:
    ///
    /// ```json
    /// [{ "id": "N7", "pose": { "position": { "x": 16.6, "y": 2.0 }, "heading": 1.5708 }, "fixture": "fixture_1" }]
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, GraphError> {
        let nodes: Vec<Node> = serde_json::from_str(json)?;
        Self::from_nodes(nodes)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl RoadGraph for StaticRoadGraph {
    fn lookup(&self, id: &NodeId) -> Result<&Node, GraphError> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::UnknownNode(id.clone()))
    }

    fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }
}
