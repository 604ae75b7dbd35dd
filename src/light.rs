//! Light state machines: per-fixture phase tables, the wake queue that
//! orders timed transitions, and the `LightBank` that owns every fixture.
//!
//! Nothing here reads a clock. Callers pass "now" as an offset from
//! controller start, and timed transitions are stamped with their
//! *scheduled* offset, so a late wake-up replays exactly the transitions an
//! on-time one would have produced.

use crate::error::ControllerError;
use crate::protocol::{LightEvent, LightSnapshot};
use crate::types::{ControllerConfig, FixtureId, LightState};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Phase durations
// ---------------------------------------------------------------------------

/// Shortest accepted phase. Bounds the catch-up work after a late wake-up.
pub const MIN_PHASE_DURATION: Duration = Duration::from_millis(1);

/// Longest accepted phase (one day). Keeps every wake time representable as
/// an `Instant` offset from controller start.
pub const MAX_PHASE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Validated time spent in each colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDurations {
    green: Duration,
    yellow: Duration,
    red: Duration,
}

impl PhaseDurations {
    /// Every colour lasts `interval`.
    pub fn uniform(interval: Duration) -> Self {
        Self {
            green: interval,
            yellow: interval,
            red: interval,
        }
    }

    /// Build from a seconds table. All three colours are required and each
    /// must lie within [`MIN_PHASE_DURATION`]..=[`MAX_PHASE_DURATION`].
    pub fn from_secs(
        fixture: &FixtureId,
        table: &BTreeMap<LightState, f64>,
    ) -> Result<Self, ControllerError> {
        let get = |state: LightState| -> Result<Duration, ControllerError> {
            let secs = *table.get(&state).ok_or_else(|| ControllerError::MissingPhase {
                fixture: fixture.clone(),
                state,
            })?;
            positive_duration(fixture, state, secs)
        };
        Ok(Self {
            green: get(LightState::Green)?,
            yellow: get(LightState::Yellow)?,
            red: get(LightState::Red)?,
        })
    }

    pub fn get(&self, state: LightState) -> Duration {
        match state {
            LightState::Green => self.green,
            LightState::Yellow => self.yellow,
            LightState::Red => self.red,
        }
    }

    /// Length of one full GREEN → YELLOW → RED cycle.
    pub fn cycle(&self) -> Duration {
        self.green + self.yellow + self.red
    }
}

fn positive_duration(
    fixture: &FixtureId,
    state: LightState,
    secs: f64,
) -> Result<Duration, ControllerError> {
    let invalid = || ControllerError::InvalidDuration {
        fixture: fixture.clone(),
        state,
        secs,
    };
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid());
    }
    let d = Duration::try_from_secs_f64(secs).map_err(|_| invalid())?;
    if !(MIN_PHASE_DURATION..=MAX_PHASE_DURATION).contains(&d) {
        return Err(invalid());
    }
    Ok(d)
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// A single traffic light.
#[derive(Debug, Clone)]
pub struct LightFixture {
    id: FixtureId,
    state: LightState,
    /// Offset from controller start of the last transition.
    since: Duration,
    durations: PhaseDurations,
}

impl LightFixture {
    pub fn new(id: FixtureId, initial: LightState, durations: PhaseDurations) -> Self {
        Self {
            id,
            state: initial,
            since: Duration::ZERO,
            durations,
        }
    }

    pub fn id(&self) -> &FixtureId {
        &self.id
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    pub fn since(&self) -> Duration {
        self.since
    }

    pub fn durations(&self) -> &PhaseDurations {
        &self.durations
    }

    /// When the current colour runs out.
    pub fn next_wake(&self) -> Duration {
        self.since + self.durations.get(self.state)
    }

    fn advance(&mut self, at: Duration) -> LightState {
        self.state = self.state.next();
        self.since = at;
        self.state
    }
}

// ---------------------------------------------------------------------------
// Wake queue
// ---------------------------------------------------------------------------

/// Offsets at which fixtures (by index) must transition next.
///
/// Fixtures due at the same offset drain in index order, which keeps the
/// event sequence independent of insertion timing.
#[derive(Debug, Default)]
pub struct WakeQueue {
    inner: BTreeMap<Duration, Vec<usize>>,
    total: usize,
}

impl WakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, at: Duration, fixture: usize) {
        let slot = self.inner.entry(at).or_default();
        let pos = slot.partition_point(|&i| i < fixture);
        slot.insert(pos, fixture);
        self.total += 1;
    }

    /// Remove and return the earliest offset and its fixtures if it is at or
    /// before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(Duration, Vec<usize>)> {
        let (&at, _) = self.inner.first_key_value()?;
        if at > now {
            return None;
        }
        let fixtures = self.inner.remove(&at)?;
        self.total -= fixtures.len();
        Some((at, fixtures))
    }

    pub fn next_wake(&self) -> Option<Duration> {
        self.inner.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.total = 0;
    }
}

// ---------------------------------------------------------------------------
// Light bank
// ---------------------------------------------------------------------------

/// Every fixture of one controller plus the transition sequence counter.
#[derive(Debug)]
pub struct LightBank {
    fixtures: Vec<LightFixture>,
    index: HashMap<FixtureId, usize>,
    queue: WakeQueue,
    seq: u64,
    last_at: Duration,
}

impl LightBank {
    /// Validate the config and place every fixture in its initial colour.
    ///
    /// Without an explicit `initial`, the first (lead) fixture starts GREEN
    /// and the rest start RED.
    pub fn from_config(config: &ControllerConfig) -> Result<Self, ControllerError> {
        if config.fixtures.is_empty() {
            return Err(ControllerError::NoFixtures);
        }

        let mut fixtures = Vec::with_capacity(config.fixtures.len());
        let mut index = HashMap::with_capacity(config.fixtures.len());

        for (i, fc) in config.fixtures.iter().enumerate() {
            if index.insert(fc.id.clone(), i).is_some() {
                return Err(ControllerError::DuplicateFixture(fc.id.clone()));
            }
            let durations = match &fc.durations {
                Some(table) => PhaseDurations::from_secs(&fc.id, table)?,
                None => PhaseDurations::uniform(positive_duration(
                    &fc.id,
                    LightState::Green,
                    config.base_interval_secs,
                )?),
            };
            let initial = fc.initial.unwrap_or(if i == 0 {
                LightState::Green
            } else {
                LightState::Red
            });
            fixtures.push(LightFixture::new(fc.id.clone(), initial, durations));
        }

        Ok(Self {
            fixtures,
            index,
            queue: WakeQueue::new(),
            seq: 0,
            last_at: Duration::ZERO,
        })
    }

    /// Schedule the first timed transition of every fixture.
    pub fn arm(&mut self) {
        self.queue.clear();
        for (i, f) in self.fixtures.iter().enumerate() {
            self.queue.push(f.next_wake(), i);
        }
    }

    pub fn is_armed(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Earliest scheduled transition, if armed.
    pub fn next_wake(&self) -> Option<Duration> {
        self.queue.next_wake()
    }

    /// Apply every timed transition scheduled at or before `now`, in order.
    ///
    /// A fixture that fell several phases behind produces one event per
    /// phase, each stamped with its scheduled offset.
    pub fn advance_due(&mut self, now: Duration) -> Vec<LightEvent> {
        let mut events = Vec::new();
        while let Some((at, due)) = self.queue.pop_due(now) {
            for i in due {
                events.push(self.transition(i, at));
                let wake = self.fixtures[i].next_wake();
                self.queue.push(wake, i);
            }
        }
        events
    }

    /// Advance one fixture immediately (manual mode).
    pub fn advance(&mut self, id: &FixtureId, at: Duration) -> Option<LightEvent> {
        let i = *self.index.get(id)?;
        Some(self.transition(i, at))
    }

    /// Advance every fixture immediately (manual mode).
    pub fn advance_all(&mut self, at: Duration) -> Vec<LightEvent> {
        (0..self.fixtures.len())
            .map(|i| self.transition(i, at))
            .collect()
    }

    fn transition(&mut self, i: usize, at: Duration) -> LightEvent {
        let fixture = &mut self.fixtures[i];
        let from = fixture.state();
        let to = fixture.advance(at);
        self.seq += 1;
        self.last_at = at;
        debug!(
            "Fixture {} {} -> {} at {:.3}s (seq {})",
            fixture.id(),
            from,
            to,
            at.as_secs_f64(),
            self.seq
        );
        LightEvent::new(self.seq, fixture.id().clone(), to, at)
    }

    pub fn snapshot(&self) -> LightSnapshot {
        LightSnapshot {
            seq: self.seq,
            at: self.last_at,
            fixtures: self
                .fixtures
                .iter()
                .map(|f| (f.id().clone(), f.state()))
                .collect(),
        }
    }

    pub fn fixture(&self, id: &FixtureId) -> Option<&LightFixture> {
        self.index.get(id).map(|&i| &self.fixtures[i])
    }

    pub fn fixtures(&self) -> &[LightFixture] {
        &self.fixtures
    }

    /// Number of transitions applied so far.
    pub fn transitions(&self) -> u64 {
        self.seq
    }
}
