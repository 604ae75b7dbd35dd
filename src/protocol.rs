//! Messages that leave or enter the light controller.
//!
//! ## Channels
//!
//! | Message          | Direction               | Carried by                   |
//! |------------------|-------------------------|------------------------------|
//! | [`LightEvent`]   | controller → consumers  | `tokio::sync::broadcast`     |
//! | [`LightSnapshot`]| controller → agents     | `tokio::sync::watch`         |
//! | [`LightCommand`] | operator → controller   | `tokio::sync::mpsc` (manual) |
//! | [`HarnessEvent`] | harness → stdout        | JSON lines (`--json-events`) |
//!
//! ## Design rules
//!
//! 1. Every struct is `Serialize + Deserialize` with snake_case JSON.
//! 2. Timestamps are offsets from controller start, never wall-clock time.
//! 3. A `LightEvent` is emitted only when a fixture actually changes colour.
//! 4. `seq` increases by one per transition across all fixtures of a run.

use crate::types::{AgentId, FixtureId, LightState, NodeId, Pose};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Transition events
// ---------------------------------------------------------------------------

/// One fixture changed colour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightEvent {
    pub seq: u64,
    pub fixture_id: FixtureId,
    pub state: LightState,
    /// Scheduled transition time, relative to controller start.
    #[serde(with = "duration_secs")]
    pub at: Duration,
}

impl LightEvent {
    pub fn new(seq: u64, fixture_id: FixtureId, state: LightState, at: Duration) -> Self {
        Self {
            seq,
            fixture_id,
            state,
            at,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Read-only view of every fixture at one instant.
///
/// The controller replaces its published snapshot after each transition.
/// The default value (no fixtures) is what a receiver sees before the
/// controller has initialised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightSnapshot {
    /// `seq` of the last transition folded into this snapshot (0 = initial).
    pub seq: u64,
    #[serde(with = "duration_secs")]
    pub at: Duration,
    pub fixtures: BTreeMap<FixtureId, LightState>,
}

impl LightSnapshot {
    pub fn state_of(&self, fixture: &FixtureId) -> Option<LightState> {
        self.fixtures.get(fixture).copied()
    }

    pub fn is_initialized(&self) -> bool {
        !self.fixtures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Manual commands
// ---------------------------------------------------------------------------

/// Operator command for a controller running in manual mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LightCommand {
    /// Move one fixture to the next colour of its cycle.
    Advance { fixture: FixtureId },
    /// Move every fixture to the next colour of its cycle.
    AdvanceAll,
}

impl std::str::FromStr for LightCommand {
    type Err = String;

    /// Parses the operator console syntax: `advance` or `advance <fixture>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("advance"), None, None) => Ok(LightCommand::AdvanceAll),
            (Some("advance"), Some(id), None) => Ok(LightCommand::Advance {
                fixture: FixtureId::new(id),
            }),
            _ => Err(format!("unrecognised command '{}'", s.trim())),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness event stream  (stdout, JSON lines)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HarnessEvent {
    /// The controller finished initialisation and released the barrier.
    Activated,
    Light(LightEvent),
    AgentSpawned {
        agent: AgentId,
        node: NodeId,
        pose: Pose,
    },
    SpawnFailed {
        node: NodeId,
        error: String,
    },
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
