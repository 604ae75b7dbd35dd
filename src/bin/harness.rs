//! traffic-harness binary
//!
//! Starts the light controller, waits for it to come up, and spawns one
//! agent per requested node.
//!
//! ## Configuration (TOML via `config` crate, env, flags)
//!
//! | Flag / env                          | Default | Description                         |
//! |-------------------------------------|---------|-------------------------------------|
//! | `--config` / `HARNESS_CONFIG`       | –       | TOML config file                    |
//! | `--graph` / `HARNESS_GRAPH`         | –       | JSON node export of the road graph  |
//! | `--mode` / `HARNESS_MODE`           | `auto`  | `auto` or `manual`                  |
//! | `--base-interval`                   | `5`     | Phase length without a table (s)    |
//! | `--grace-period`                    | `3`     | Delay before spawning (s)           |
//! | `--barrier-timeout`                 | `30`    | Max wait for the controller (s)     |
//! | `--spawn <node>` (repeatable)       | –       | Nodes to spawn agents on            |
//! | `--run-for <secs>`                  | forever | Stop after this long                |
//! | `--json-events`                     | off     | Print events as JSON lines          |
//!
//! In manual mode, stdin lines `advance` / `advance <fixture>` drive the
//! lights.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use traffic_harness::{
    config, protocol::HarnessEvent, ControllerMode, HarnessConfig, HarnessError, LightCommand,
    NodeId, Orchestrator, TaskLauncher,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "traffic-harness", about = "Traffic light controller + gated vehicle spawner", version)]
struct Args {
    /// TOML config file
    #[arg(long, env = "HARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// JSON node export of the road graph
    #[arg(long, env = "HARNESS_GRAPH")]
    graph: PathBuf,

    /// Controller mode (auto|manual)
    #[arg(long, env = "HARNESS_MODE")]
    mode: Option<ControllerMode>,

    /// Phase length for fixtures without their own table (seconds)
    #[arg(long)]
    base_interval: Option<f64>,

    /// Delay between starting the controller and spawning (seconds)
    #[arg(long)]
    grace_period: Option<f64>,

    /// Max wait for the activation barrier per spawn (seconds)
    #[arg(long)]
    barrier_timeout: Option<f64>,

    /// Node to spawn an agent on (repeatable; replaces the config list)
    #[arg(long = "spawn")]
    spawn: Vec<String>,

    /// Stop after this many seconds
    #[arg(long)]
    run_for: Option<f64>,

    /// Print events to stdout as JSON lines
    #[arg(long)]
    json_events: bool,
}

impl Args {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(mode) = self.mode {
            config.controller.mode = mode;
        }
        if let Some(v) = self.base_interval {
            config.controller.base_interval_secs = v;
        }
        if let Some(v) = self.grace_period {
            config.grace_period_secs = v;
        }
        if let Some(v) = self.barrier_timeout {
            config.barrier_timeout_secs = v;
        }
        if !self.spawn.is_empty() {
            config.spawn = self.spawn.iter().map(NodeId::new).collect();
        }
    }
}

// ---------------------------------------------------------------------------
// Event output
// ---------------------------------------------------------------------------

fn emit(json: bool, event: &HarnessEvent) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => log::warn!("Failed to serialise event: {}", e),
        }
        return;
    }
    match event {
        HarnessEvent::Activated => log::info!("Activation barrier released"),
        HarnessEvent::Light(e) => log::info!(
            "[{:>8.3}s] {} -> {}",
            e.at.as_secs_f64(),
            e.fixture_id,
            e.state
        ),
        HarnessEvent::AgentSpawned { agent, node, pose } => {
            log::info!("{} running at {} {}", agent, node, pose)
        }
        HarnessEvent::SpawnFailed { node, error } => {
            log::error!("Spawn at {} failed: {}", node, error)
        }
    }
}

/// Forward operator console lines to the controller.
fn spawn_stdin_commands(tx: mpsc::Sender<LightCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match line.parse::<LightCommand>() {
                    Ok(cmd) => {
                        if tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("{}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    log::warn!("stdin read error: {}", e);
                    break;
                }
            }
        }
        // Dropping `tx` closes the channel; the controller holds its lights.
    });
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("traffic_harness=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let (mut config, graph) = config::load_inputs(args.config.as_deref(), &args.graph)
        .with_context(|| format!("Failed to load inputs (graph {})", args.graph.display()))?;
    args.apply(&mut config);

    log::info!(
        "Starting traffic-harness (mode={}, fixtures={}, nodes={}, spawns={})",
        config.controller.mode,
        config.controller.fixtures.len(),
        graph.len(),
        config.spawn.len(),
    );

    let commands = match config.controller.mode {
        ControllerMode::Manual => {
            let (tx, rx) = mpsc::channel(32);
            spawn_stdin_commands(tx);
            Some(rx)
        }
        ControllerMode::Auto => None,
    };

    let json = args.json_events;
    let launcher = Arc::new(TaskLauncher::new(&config.agent));
    let orchestrator = Orchestrator::new(config, Arc::new(graph), launcher);

    let barrier = orchestrator.barrier();
    tokio::spawn(async move {
        barrier.wait_async().await;
        emit(json, &HarnessEvent::Activated);
    });

    let mut run = orchestrator.start(commands).await;

    for outcome in run.spawns() {
        let event = match &outcome.result {
            Ok(agent) => HarnessEvent::AgentSpawned {
                agent: agent.id(),
                node: agent.node_id().clone(),
                pose: agent.pose(),
            },
            Err(e) => HarnessEvent::SpawnFailed {
                node: outcome.node.clone(),
                error: e.to_string(),
            },
        };
        emit(json, &event);
    }

    let deadline = async {
        match args
            .run_for
            .and_then(|secs| std::time::Duration::try_from_secs_f64(secs.max(0.0)).ok())
        {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            received = run.events().recv() => match received {
                Ok(event) => emit(json, &HarnessEvent::Light(event)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Event output fell behind; skipped {} transitions", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut deadline => {
                log::info!("Run time elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("traffic-harness shutting down (SIGINT)");
                break;
            }
        }
    }

    if let Some(e) = run.shutdown().await {
        return Err(HarnessError::from(e)).context("Light controller never initialised");
    }
    Ok(())
}
