//! Orchestrator – starts the light controller, waits out the grace period and
//! spawns one agent per configured node.
//!
//! The grace period is an extra margin only. What orders agents after the
//! controller is the [`ActivationBarrier`]; every spawn waits on it, bounded
//! by `barrier_timeout_secs` so a controller that never initialises is
//! reported instead of hanging the run.

use crate::agent::AgentLauncher;
use crate::barrier::ActivationBarrier;
use crate::controller::{ControllerStats, LightPublisher, TrafficLightController};
use crate::error::{ControllerError, SpawnError};
use crate::graph::RoadGraph;
use crate::protocol::{LightCommand, LightEvent, LightSnapshot};
use crate::spawn::{AgentHandle, SpawnCoordinator};
use crate::types::{AgentId, HarnessConfig, NodeId};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

// ---------------------------------------------------------------------------
// Spawn outcome
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SpawnOutcome {
    pub node: NodeId,
    pub result: Result<AgentHandle, SpawnError>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: HarnessConfig,
    graph: Arc<dyn RoadGraph>,
    launcher: Arc<dyn AgentLauncher>,
    barrier: Arc<ActivationBarrier>,
}

impl Orchestrator {
    pub fn new(
        config: HarnessConfig,
        graph: Arc<dyn RoadGraph>,
        launcher: Arc<dyn AgentLauncher>,
    ) -> Self {
        Self {
            config,
            graph,
            launcher,
            barrier: Arc::new(ActivationBarrier::new()),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn barrier(&self) -> Arc<ActivationBarrier> {
        self.barrier.clone()
    }

    pub fn grace_period(&self) -> Duration {
        crate::secs(self.config.grace_period_secs)
    }

    pub fn barrier_timeout(&self) -> Duration {
        crate::secs(self.config.barrier_timeout_secs)
    }

    /// Start a run: controller task, grace period, then every configured
    /// spawn in parallel.
    ///
    /// `commands` feeds a manual-mode controller and is ignored in auto mode.
    pub async fn start(&self, commands: Option<mpsc::Receiver<LightCommand>>) -> Run {
        self.barrier.clear();

        let publisher = LightPublisher::new(self.config.controller.event_capacity);
        let events = publisher.subscribe();
        let controller = TrafficLightController::spawn(
            self.config.controller.clone(),
            publisher.clone(),
            commands,
            self.barrier.clone(),
        );
        info!(
            "Light controller started ({} mode); grace period {:.1}s",
            self.config.controller.mode,
            self.grace_period().as_secs_f64()
        );

        tokio::time::sleep(self.grace_period()).await;

        let coordinator = Arc::new(SpawnCoordinator::new(
            self.graph.clone(),
            self.barrier.clone(),
            self.launcher.clone(),
            publisher.snapshot(),
        ));

        let run = Run {
            controller,
            publisher,
            events,
            coordinator,
            barrier_timeout: self.barrier_timeout(),
            spawns: Vec::new(),
        };
        run.spawn_all(&self.config.spawn).await
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// One harness run: the controller task, its published state, and every
/// agent spawned so far.
pub struct Run {
    controller: JoinHandle<Result<(), ControllerError>>,
    publisher: LightPublisher,
    events: broadcast::Receiver<LightEvent>,
    coordinator: Arc<SpawnCoordinator>,
    barrier_timeout: Duration,
    spawns: Vec<SpawnOutcome>,
}

impl Run {
    async fn spawn_all(mut self, nodes: &[NodeId]) -> Self {
        let mut set = JoinSet::new();
        for (i, node) in nodes.iter().cloned().enumerate() {
            let coordinator = self.coordinator.clone();
            let timeout = self.barrier_timeout;
            let span = tracing::info_span!("spawn", node = %node);
            set.spawn(
                async move {
                    let result = coordinator.spawn_on_node_within(&node, timeout).await;
                    (i, SpawnOutcome { node, result })
                }
                .instrument(span),
            );
        }

        let mut outcomes = Vec::with_capacity(nodes.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Spawn task failed: {}", e),
            }
        }
        outcomes.sort_by_key(|(i, _)| *i);

        for (_, outcome) in &outcomes {
            if let Err(e) = &outcome.result {
                warn!("Spawn at {} failed: {}", outcome.node, e);
            }
        }
        if self.controller.is_finished() {
            error!("Light controller exited before any agent could start");
        }

        self.spawns.extend(outcomes.into_iter().map(|(_, o)| o));
        self
    }

    /// Spawn one more agent during the run.
    pub async fn spawn(&mut self, node: &NodeId) -> Result<AgentId, SpawnError> {
        let handle = self
            .coordinator
            .spawn_on_node_within(node, self.barrier_timeout)
            .await?;
        let id = handle.id();
        self.spawns.push(SpawnOutcome {
            node: node.clone(),
            result: Ok(handle),
        });
        Ok(id)
    }

    pub fn spawns(&self) -> &[SpawnOutcome] {
        &self.spawns
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentHandle> {
        self.spawns.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&NodeId, &SpawnError)> {
        self.spawns
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.node, e)))
    }

    pub fn coordinator(&self) -> &SpawnCoordinator {
        &self.coordinator
    }

    /// Transition events, buffered from before the controller started.
    pub fn events(&mut self) -> &mut broadcast::Receiver<LightEvent> {
        &mut self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LightEvent> {
        self.publisher.subscribe()
    }

    pub fn lights(&self) -> watch::Receiver<LightSnapshot> {
        self.publisher.snapshot()
    }

    pub fn controller_stats(&self) -> ControllerStats {
        self.publisher.stats()
    }

    pub fn controller_finished(&self) -> bool {
        self.controller.is_finished()
    }

    /// Stop every agent, then the controller. Returns the controller's
    /// start-up error if it never came up, or `Panicked` if its task died.
    pub async fn shutdown(self) -> Option<ControllerError> {
        let Run {
            controller,
            spawns,
            ..
        } = self;

        for outcome in spawns {
            if let Ok(handle) = outcome.result {
                handle.shutdown().await;
            }
        }

        if controller.is_finished() {
            return match controller.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) if e.is_panic() => {
                    let e = ControllerError::Panicked(panic_message(e.into_panic()));
                    error!("{}", e);
                    Some(e)
                }
                Err(_) => None,
            };
        }
        controller.abort();
        let _ = controller.await;
        info!("Run shut down");
        None
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}
