//! Traffic Harness
//!
//! Start-up synchronisation between a traffic-light controller and the
//! vehicle spawner of a simulated-driving competition harness.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator  (orchestrator.rs)
//!   ├── TrafficLightController  (controller.rs)  ← own task, releases the barrier
//!   │     └── LightBank / WakeQueue  (light.rs)  ← deterministic state machines
//!   ├── ActivationBarrier  (barrier.rs)          ← one-shot readiness gate
//!   └── SpawnCoordinator  (spawn.rs)
//!         ├── RoadGraph  (graph.rs)              ← node → pose lookups
//!         └── AgentLauncher  (agent.rs)          ← per-agent control loop task
//! ```
//!
//! No agent is constructed before the controller has published its initial
//! snapshot and released the [`ActivationBarrier`], so agents never observe
//! uninitialised light state.

use std::time::Duration;

// Data types are always available (no runtime feature needed).
pub mod config;
pub mod error;
pub mod graph;
pub mod light;
pub mod protocol;
pub mod types;

// Task-based modules require the `runtime` feature.
#[cfg(feature = "runtime")]
pub mod agent;
#[cfg(feature = "runtime")]
pub mod barrier;
#[cfg(feature = "runtime")]
pub mod controller;
#[cfg(feature = "runtime")]
pub mod orchestrator;
#[cfg(feature = "runtime")]
pub mod spawn;

/// Extra delay the orchestrator waits after starting the controller, on top
/// of waiting for the barrier itself.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

// Convenience re-exports (runtime only)
#[cfg(feature = "runtime")]
pub use agent::{AgentLauncher, DriveCommand, StopLineController, TaskLauncher, VehicleController};
#[cfg(feature = "runtime")]
pub use barrier::ActivationBarrier;
#[cfg(feature = "runtime")]
pub use controller::{LightPublisher, TrafficLightController};
#[cfg(feature = "runtime")]
pub use orchestrator::{Orchestrator, Run};
#[cfg(feature = "runtime")]
pub use spawn::{AgentHandle, SpawnCoordinator};
pub use error::{ControllerError, GraphError, HarnessError, SpawnError};
pub use graph::{Node, RoadGraph, StaticRoadGraph};
pub use light::{LightBank, PhaseDurations};
pub use protocol::{LightCommand, LightEvent, LightSnapshot};
pub use types::{
    AgentId, ControllerConfig, ControllerMode, FixtureConfig, FixtureId, HarnessConfig, LightState,
    NodeId, Pose, Vec3,
};

/// Seconds from config → `Duration`. Negative and NaN become zero, values too
/// large to represent saturate.
#[cfg_attr(not(feature = "runtime"), allow(dead_code))]
pub(crate) fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}
