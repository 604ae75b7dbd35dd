//! Core harness types shared across all modules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Position plus yaw heading (radians) of a spawn point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    #[serde(default)]
    pub heading: f32,
}

impl Pose {
    pub fn new(position: Vec3, heading: f32) -> Self {
        Self { position, heading }
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {:.3} rad", self.position, self.heading)
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Name of a spawn point on the road graph.
    NodeId
);
string_id!(
    /// Name of a single traffic light.
    FixtureId
);

/// Sequential identifier handed out to spawned agents.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Lights
// ---------------------------------------------------------------------------

/// Colour of a traffic light.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LightState {
    #[serde(alias = "red")]
    Red,
    #[serde(alias = "yellow")]
    Yellow,
    #[serde(alias = "green")]
    Green,
}

impl LightState {
    pub const ALL: [LightState; 3] = [LightState::Green, LightState::Yellow, LightState::Red];

    /// The state that follows `self` in the fixed GREEN → YELLOW → RED cycle.
    pub fn next(self) -> Self {
        match self {
            LightState::Green => LightState::Yellow,
            LightState::Yellow => LightState::Red,
            LightState::Red => LightState::Green,
        }
    }
}

impl std::fmt::Display for LightState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LightState::Red => "RED",
            LightState::Yellow => "YELLOW",
            LightState::Green => "GREEN",
        })
    }
}

/// How the controller advances its fixtures.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControllerMode {
    /// Each fixture advances when its current phase duration elapses.
    #[default]
    Auto,
    /// Fixtures advance only on received commands.
    Manual,
}

impl std::str::FromStr for ControllerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ControllerMode::Auto),
            "manual" => Ok(ControllerMode::Manual),
            other => Err(format!("unknown controller mode '{other}' (expected auto|manual)")),
        }
    }
}

impl std::fmt::Display for ControllerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ControllerMode::Auto => "auto",
            ControllerMode::Manual => "manual",
        })
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Per-fixture configuration as read from the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureConfig {
    pub id: FixtureId,
    /// Starting colour. Defaults to GREEN for the first fixture and RED for
    /// every other one.
    #[serde(default)]
    pub initial: Option<LightState>,
    /// Phase durations in seconds. Falls back to `base_interval_secs` for
    /// every state when absent.
    #[serde(default)]
    pub durations: Option<BTreeMap<LightState, f64>>,
}

impl FixtureConfig {
    pub fn new(id: impl Into<FixtureId>) -> Self {
        Self {
            id: id.into(),
            initial: None,
            durations: None,
        }
    }

    pub fn with_initial(mut self, state: LightState) -> Self {
        self.initial = Some(state);
        self
    }

    pub fn with_durations(mut self, green: f64, yellow: f64, red: f64) -> Self {
        self.durations = Some(BTreeMap::from([
            (LightState::Green, green),
            (LightState::Yellow, yellow),
            (LightState::Red, red),
        ]));
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub mode: ControllerMode,
    /// Phase duration (seconds) for fixtures without their own table.
    pub base_interval_secs: f64,
    pub fixtures: Vec<FixtureConfig>,
    /// Capacity of the transition broadcast buffer. Slow subscribers lose
    /// the oldest events once it fills.
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mode: ControllerMode::Auto,
            base_interval_secs: 5.0,
            fixtures: vec![FixtureConfig::new("fixture_1")],
            event_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Control loop rate in Hz.
    pub sample_hz: f64,
    /// Throttle applied while the watched light allows driving.
    pub cruise_throttle: f32,
    /// Upper bound on concurrently running agents (None = unbounded).
    #[serde(default)]
    pub max_agents: Option<usize>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sample_hz: 20.0,
            cruise_throttle: 0.1,
            max_agents: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    pub controller: ControllerConfig,
    /// Extra delay after starting the controller before any spawn is attempted.
    pub grace_period_secs: f64,
    /// Upper bound on how long a spawn waits for the activation barrier.
    pub barrier_timeout_secs: f64,
    pub agent: AgentConfig,
    /// Nodes to spawn agents on once the run starts.
    #[serde(default)]
    pub spawn: Vec<NodeId>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            grace_period_secs: crate::DEFAULT_GRACE_PERIOD.as_secs_f64(),
            barrier_timeout_secs: 30.0,
            agent: AgentConfig::default(),
            spawn: Vec::new(),
        }
    }
}
