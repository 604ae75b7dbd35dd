//! TrafficLightController – drives a [`LightBank`] forward in time (auto) or
//! on operator commands (manual) and publishes every transition.
//!
//! ## Start-up order
//!
//! 1. validate config, place fixtures in their initial colours
//! 2. publish the initial snapshot
//! 3. arm the first tick (auto) or attach the command receiver (manual)
//! 4. release the [`ActivationBarrier`]
//!
//! A config error stops at step 1, so the barrier is never released.

use crate::barrier::ActivationBarrier;
use crate::error::ControllerError;
use crate::light::LightBank;
use crate::protocol::{LightCommand, LightEvent, LightSnapshot};
use crate::types::{ControllerConfig, ControllerMode};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ControllerStats {
    pub mode: ControllerMode,
    pub transitions: u64,
    pub commands_handled: u64,
    pub commands_ignored: u64,
    /// Set once a manual-mode command channel has closed.
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Outbound side of the controller, created before the controller itself so
/// consumers can subscribe ahead of start-up.
#[derive(Clone)]
pub struct LightPublisher {
    events: broadcast::Sender<LightEvent>,
    snapshot: Arc<watch::Sender<LightSnapshot>>,
    stats: Arc<Mutex<ControllerStats>>,
}

impl LightPublisher {
    /// `capacity` bounds the transition buffer; a lagging subscriber loses
    /// the oldest events rather than stalling the controller.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (snapshot, _) = watch::channel(LightSnapshot::default());
        Self {
            events,
            snapshot: Arc::new(snapshot),
            stats: Arc::new(Mutex::new(ControllerStats::default())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LightEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> watch::Receiver<LightSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn current(&self) -> LightSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn stats(&self) -> ControllerStats {
        self.stats.lock().clone()
    }

    fn publish(&self, events: Vec<LightEvent>, snapshot: LightSnapshot) {
        if events.is_empty() {
            return;
        }
        self.stats.lock().transitions += events.len() as u64;
        // Snapshot first: a subscriber woken by an event must already see it.
        self.snapshot.send_replace(snapshot);
        for event in events {
            // No subscribers is fine; the snapshot still carries the state.
            let _ = self.events.send(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct TrafficLightController {
    mode: ControllerMode,
    bank: LightBank,
    commands: Option<mpsc::Receiver<LightCommand>>,
    publisher: LightPublisher,
}

impl TrafficLightController {
    /// Validate `config` and put every fixture in its initial state.
    ///
    /// Manual mode needs `commands`; in auto mode a supplied receiver is
    /// dropped.
    pub fn new(
        config: &ControllerConfig,
        publisher: LightPublisher,
        commands: Option<mpsc::Receiver<LightCommand>>,
    ) -> Result<Self, ControllerError> {
        let bank = LightBank::from_config(config)?;
        let commands = match (config.mode, commands) {
            (ControllerMode::Manual, None) => return Err(ControllerError::MissingCommandChannel),
            (ControllerMode::Manual, Some(rx)) => Some(rx),
            (ControllerMode::Auto, Some(_)) => {
                warn!("Command channel supplied in auto mode; commands will be ignored");
                None
            }
            (ControllerMode::Auto, None) => None,
        };
        publisher.stats.lock().mode = config.mode;
        Ok(Self {
            mode: config.mode,
            bank,
            commands,
            publisher,
        })
    }

    pub fn mode(&self) -> ControllerMode {
        self.mode
    }

    pub fn bank(&self) -> &LightBank {
        &self.bank
    }

    /// Run until the task is cancelled.
    pub async fn run(mut self, barrier: Arc<ActivationBarrier>) {
        let epoch = Instant::now();
        self.publisher
            .snapshot
            .send_replace(self.bank.snapshot());

        match self.mode {
            ControllerMode::Auto => {
                self.bank.arm();
                barrier.set();
                info!(
                    "Light controller active (auto, {} fixtures)",
                    self.bank.fixtures().len()
                );
                self.run_auto(epoch).await;
            }
            ControllerMode::Manual => {
                let Some(rx) = self.commands.take() else {
                    // Rejected in `new`.
                    return;
                };
                barrier.set();
                info!(
                    "Light controller active (manual, {} fixtures)",
                    self.bank.fixtures().len()
                );
                self.run_manual(epoch, rx).await;
            }
        }
    }

    async fn run_auto(&mut self, epoch: Instant) {
        loop {
            let Some(wake) = self.bank.next_wake() else {
                std::future::pending::<()>().await;
                return;
            };
            let Some(deadline) = epoch.checked_add(wake) else {
                warn!(
                    "Next transition at {:.3}s is beyond the clock range; holding lights",
                    wake.as_secs_f64()
                );
                std::future::pending::<()>().await;
                return;
            };
            tokio::time::sleep_until(deadline).await;
            let now = epoch.elapsed().max(wake);
            let events = self.bank.advance_due(now);
            self.publisher.publish(events, self.bank.snapshot());
        }
    }

    async fn run_manual(&mut self, epoch: Instant, mut rx: mpsc::Receiver<LightCommand>) {
        while let Some(cmd) = rx.recv().await {
            let at = epoch.elapsed();
            let events = match &cmd {
                LightCommand::Advance { fixture } => match self.bank.advance(fixture, at) {
                    Some(event) => vec![event],
                    None => {
                        warn!("Ignoring command for unknown fixture {}", fixture);
                        self.publisher.stats.lock().commands_ignored += 1;
                        continue;
                    }
                },
                LightCommand::AdvanceAll => self.bank.advance_all(at),
            };
            self.publisher.stats.lock().commands_handled += 1;
            self.publisher.publish(events, self.bank.snapshot());
        }

        warn!(
            "Light command channel closed; holding {} fixtures in their current state",
            self.bank.fixtures().len()
        );
        self.publisher.stats.lock().degraded = true;
        std::future::pending::<()>().await;
    }

    /// Build and run a controller on its own task.
    ///
    /// Construction happens inside the task. If it fails the error is logged,
    /// the task ends with that error, and `barrier` stays unset.
    pub fn spawn(
        config: ControllerConfig,
        publisher: LightPublisher,
        commands: Option<mpsc::Receiver<LightCommand>>,
        barrier: Arc<ActivationBarrier>,
    ) -> JoinHandle<Result<(), ControllerError>> {
        tokio::spawn(async move {
            let controller = match TrafficLightController::new(&config, publisher, commands) {
                Ok(c) => c,
                Err(e) => {
                    error!("Light controller failed to initialise: {}", e);
                    return Err(e);
                }
            };
            controller.run(barrier).await;
            Ok(())
        })
    }
}
