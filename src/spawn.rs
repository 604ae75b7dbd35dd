//! SpawnCoordinator – turns a node identifier into a running agent bound to
//! that node's pose, gated on the [`ActivationBarrier`].
//!
//! ## Order of checks in `spawn_on_node`
//!
//! | Step | Check                           | Failure                        |
//! |------|---------------------------------|--------------------------------|
//! | 1    | node exists in the road graph   | `SpawnError::UnknownNode`      |
//! | 2    | node is free (reserve it)       | `SpawnError::NodeOccupied`     |
//! | 3    | barrier released                | blocks (or `BarrierTimeout`)   |
//! | 4    | launcher starts the agent       | `SpawnError::Construction`     |
//!
//! A failure after step 2 releases the reservation, so a failed spawn leaves
//! no trace. The barrier is checked once; a spawn past step 3 never waits
//! again.

use crate::agent::{AgentLauncher, AgentSpec, AgentStatus, DriveCommand, RunningAgent};
use crate::barrier::ActivationBarrier;
use crate::error::SpawnError;
use crate::graph::{Node, RoadGraph};
use crate::protocol::LightSnapshot;
use crate::types::{AgentId, NodeId, Pose};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Node reservations
// ---------------------------------------------------------------------------

type OccupiedSet = Arc<Mutex<HashSet<NodeId>>>;

/// Exclusive claim on one node; released on drop.
struct NodeReservation {
    node: NodeId,
    occupied: OccupiedSet,
}

impl Drop for NodeReservation {
    fn drop(&mut self) {
        self.occupied.lock().remove(&self.node);
        debug!("Released node {}", self.node);
    }
}

// ---------------------------------------------------------------------------
// Agent handle
// ---------------------------------------------------------------------------

/// A live agent. Holds its node until shut down or dropped; dropping the
/// handle aborts the agent task.
pub struct AgentHandle {
    id: AgentId,
    node: Node,
    agent: Option<RunningAgent>,
    _reservation: NodeReservation,
}

impl AgentHandle {
    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    pub fn pose(&self) -> Pose {
        self.node.pose
    }

    pub fn status(&self) -> AgentStatus {
        self.agent
            .as_ref()
            .map(RunningAgent::status)
            .unwrap_or_default()
    }

    /// Most recent command the agent's control loop issued.
    pub fn last_command(&self) -> DriveCommand {
        self.status().last_command
    }

    pub fn status_receiver(&self) -> Option<watch::Receiver<AgentStatus>> {
        self.agent.as_ref().map(RunningAgent::status_receiver)
    }

    pub fn is_running(&self) -> bool {
        self.agent.as_ref().is_some_and(|a| !a.is_finished())
    }

    /// Halt the vehicle, wait for its loop to end and free the node.
    pub async fn shutdown(mut self) -> AgentStatus {
        let Some(agent) = self.agent.take() else {
            return AgentStatus::default();
        };
        let status = agent.status_receiver();
        agent.stop().await;
        info!("{} at node {} shut down", self.id, self.node.id);
        let last = status.borrow().clone();
        last
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        if let Some(agent) = self.agent.take() {
            agent.abort();
        }
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.id)
            .field("node", &self.node.id)
            .field("pose", &self.node.pose)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct SpawnCoordinator {
    graph: Arc<dyn RoadGraph>,
    barrier: Arc<ActivationBarrier>,
    launcher: Arc<dyn AgentLauncher>,
    lights: watch::Receiver<LightSnapshot>,
    occupied: OccupiedSet,
    next_id: AtomicU32,
}

impl SpawnCoordinator {
    pub fn new(
        graph: Arc<dyn RoadGraph>,
        barrier: Arc<ActivationBarrier>,
        launcher: Arc<dyn AgentLauncher>,
        lights: watch::Receiver<LightSnapshot>,
    ) -> Self {
        Self {
            graph,
            barrier,
            launcher,
            lights,
            occupied: Arc::new(Mutex::new(HashSet::new())),
            next_id: AtomicU32::new(0),
        }
    }

    /// Spawn an agent at `node_id`, waiting as long as it takes for the
    /// barrier.
    pub async fn spawn_on_node(&self, node_id: &NodeId) -> Result<AgentHandle, SpawnError> {
        self.spawn_inner(node_id, None).await
    }

    /// Like [`spawn_on_node`](Self::spawn_on_node), but give up with
    /// `BarrierTimeout` if the barrier is not released within `timeout`.
    pub async fn spawn_on_node_within(
        &self,
        node_id: &NodeId,
        timeout: Duration,
    ) -> Result<AgentHandle, SpawnError> {
        self.spawn_inner(node_id, Some(timeout)).await
    }

    /// Nodes that currently have an agent or a pending spawn.
    pub fn occupied_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.occupied.lock().iter().cloned().collect();
        nodes.sort();
        nodes
    }

    pub fn is_occupied(&self, node_id: &NodeId) -> bool {
        self.occupied.lock().contains(node_id)
    }

    async fn spawn_inner(
        &self,
        node_id: &NodeId,
        timeout: Option<Duration>,
    ) -> Result<AgentHandle, SpawnError> {
        let node = self
            .graph
            .lookup(node_id)
            .map_err(|_| SpawnError::UnknownNode(node_id.clone()))?
            .clone();

        let reservation = self.reserve(&node.id)?;

        if !self.barrier.is_set() {
            debug!("Spawn at {} waiting for activation barrier", node.id);
        }
        match timeout {
            None => self.barrier.wait_async().await,
            Some(limit) => {
                if tokio::time::timeout(limit, self.barrier.wait_async())
                    .await
                    .is_err()
                {
                    return Err(SpawnError::BarrierTimeout {
                        node: node.id.clone(),
                        secs: limit.as_secs_f64(),
                    });
                }
            }
        }

        let id = AgentId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let spec = AgentSpec {
            id,
            node: node.clone(),
            lights: self.lights.clone(),
        };
        let agent = self
            .launcher
            .launch(spec)
            .map_err(|reason| SpawnError::Construction {
                node: node.id.clone(),
                reason,
            })?;

        info!("Spawned {} at node {} {}", id, node.id, node.pose);
        Ok(AgentHandle {
            id,
            node,
            agent: Some(agent),
            _reservation: reservation,
        })
    }

    fn reserve(&self, node_id: &NodeId) -> Result<NodeReservation, SpawnError> {
        let mut occupied = self.occupied.lock();
        if !occupied.insert(node_id.clone()) {
            return Err(SpawnError::NodeOccupied(node_id.clone()));
        }
        Ok(NodeReservation {
            node: node_id.clone(),
            occupied: self.occupied.clone(),
        })
    }
}
