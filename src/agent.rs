//! Vehicle agents: the pluggable per-vehicle control loop and the launcher
//! that runs one Tokio task per spawned agent.
//!
//! A control loop samples the published light snapshot at a fixed rate, asks
//! its [`VehicleController`] for a drive command and records the result in an
//! [`AgentStatus`]. Stopping an agent halts the vehicle (zero throttle)
//! before the task ends.

use crate::graph::Node;
use crate::protocol::LightSnapshot;
use crate::types::{AgentConfig, AgentId, LightState, Pose};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const MIN_SAMPLE_PERIOD: Duration = Duration::from_millis(1);

// ---------------------------------------------------------------------------
// Commands & status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub throttle: f32,
    pub steering: f32,
}

impl DriveCommand {
    pub fn new(throttle: f32, steering: f32) -> Self {
        Self { throttle, steering }
    }

    /// Zero throttle, wheels straight.
    pub fn halt() -> Self {
        Self::default()
    }
}

/// What an agent's control loop has done so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentStatus {
    pub steps: u64,
    pub last_command: DriveCommand,
    /// The first light snapshot the loop read.
    pub first_snapshot: Option<LightSnapshot>,
    pub halted: bool,
}

// ---------------------------------------------------------------------------
// Controller trait
// ---------------------------------------------------------------------------

/// Decision logic of one vehicle.
pub trait VehicleController: Send + 'static {
    fn on_start(&mut self, _pose: &Pose) {}

    /// `watched` is the colour of the light governing the agent's start node,
    /// if it has one.
    fn step(&mut self, lights: &LightSnapshot, watched: Option<LightState>) -> DriveCommand;

    fn halt(&mut self) -> DriveCommand {
        DriveCommand::halt()
    }
}

/// Drives at a fixed throttle while its light is GREEN (or when it has no
/// light) and holds still otherwise.
#[derive(Debug, Clone)]
pub struct StopLineController {
    cruise_throttle: f32,
}

impl StopLineController {
    pub fn new(cruise_throttle: f32) -> Self {
        Self { cruise_throttle }
    }
}

impl VehicleController for StopLineController {
    fn step(&mut self, _lights: &LightSnapshot, watched: Option<LightState>) -> DriveCommand {
        match watched {
            None | Some(LightState::Green) => DriveCommand::new(self.cruise_throttle, 0.0),
            Some(LightState::Yellow) | Some(LightState::Red) => DriveCommand::halt(),
        }
    }
}

// ---------------------------------------------------------------------------
// Launching
// ---------------------------------------------------------------------------

/// Everything needed to start one agent.
pub struct AgentSpec {
    pub id: AgentId,
    pub node: Node,
    pub lights: watch::Receiver<LightSnapshot>,
}

/// A started agent's task and its control handles.
pub struct RunningAgent {
    task: JoinHandle<()>,
    stop: Option<oneshot::Sender<()>>,
    status: watch::Receiver<AgentStatus>,
}

impl RunningAgent {
    pub fn new(
        task: JoinHandle<()>,
        stop: oneshot::Sender<()>,
        status: watch::Receiver<AgentStatus>,
    ) -> Self {
        Self {
            task,
            stop: Some(stop),
            status,
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<AgentStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the loop to halt the vehicle and wait for the task to end.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Starts agents. A launch error is reported as a construction failure for
/// that one spawn.
pub trait AgentLauncher: Send + Sync {
    fn launch(&self, spec: AgentSpec) -> Result<RunningAgent, String>;
}

type ControllerFactory = dyn Fn(&Node) -> Box<dyn VehicleController> + Send + Sync;

/// Runs each agent's control loop as its own Tokio task.
pub struct TaskLauncher {
    sample_period: Duration,
    factory: Arc<ControllerFactory>,
    max_agents: Option<usize>,
    live: Arc<AtomicUsize>,
}

impl TaskLauncher {
    /// Launcher of [`StopLineController`] agents configured from `config`.
    pub fn new(config: &AgentConfig) -> Self {
        let period = if config.sample_hz > 0.0 {
            crate::secs(1.0 / config.sample_hz)
        } else {
            MIN_SAMPLE_PERIOD
        };
        let cruise = config.cruise_throttle;
        Self {
            sample_period: period.max(MIN_SAMPLE_PERIOD),
            factory: Arc::new(move |_node: &Node| {
                Box::new(StopLineController::new(cruise)) as Box<dyn VehicleController>
            }),
            max_agents: config.max_agents,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the per-agent decision logic.
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Node) -> Box<dyn VehicleController> + Send + Sync + 'static,
    {
        self.factory = Arc::new(factory);
        self
    }

    pub fn sample_period(&self) -> Duration {
        self.sample_period
    }

    /// Agents whose control loop is still running.
    pub fn live_agents(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn claim_slot(&self) -> Result<LiveSlot, String> {
        match self.max_agents {
            Some(max) => self
                .live
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .map_err(|n| format!("agent capacity exhausted ({n}/{max} running)"))?,
            None => self.live.fetch_add(1, Ordering::SeqCst),
        };
        Ok(LiveSlot(self.live.clone()))
    }
}

impl AgentLauncher for TaskLauncher {
    fn launch(&self, spec: AgentSpec) -> Result<RunningAgent, String> {
        let slot = self.claim_slot()?;
        let controller = (self.factory)(&spec.node);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (status_tx, status_rx) = watch::channel(AgentStatus::default());
        let task = tokio::spawn(control_loop(
            spec,
            controller,
            self.sample_period,
            stop_rx,
            status_tx,
            slot,
        ));
        Ok(RunningAgent::new(task, stop_tx, status_rx))
    }
}

/// Frees a capacity slot when the agent task ends, however it ends.
struct LiveSlot(Arc<AtomicUsize>);

impl Drop for LiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn control_loop(
    spec: AgentSpec,
    mut controller: Box<dyn VehicleController>,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
    status: watch::Sender<AgentStatus>,
    _slot: LiveSlot,
) {
    let AgentSpec {
        id,
        node,
        mut lights,
    } = spec;

    controller.on_start(&node.pose);
    debug!("{} control loop started at node {} {}", id, node.id, node.pose);

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let snapshot = lights.borrow_and_update().clone();
                let watched = node.fixture.as_ref().and_then(|f| snapshot.state_of(f));
                let cmd = controller.step(&snapshot, watched);
                status.send_modify(|s| {
                    s.steps += 1;
                    s.last_command = cmd;
                    if s.first_snapshot.is_none() {
                        s.first_snapshot = Some(snapshot);
                    }
                });
            }
        }
    }

    let cmd = controller.halt();
    status.send_modify(|s| {
        s.last_command = cmd;
        s.halted = true;
    });
    debug!("{} halted", id);
}
