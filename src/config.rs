//! Layered configuration: built-in defaults, an optional TOML/JSON file, then
//! `HARNESS__*` environment variables.
//!
//! ```toml
//! grace_period_secs = 3.0
//! spawn = ["N1", "N7"]
//!
//! [controller]
//! mode = "auto"
//! base_interval_secs = 5.0
//!
//! [[controller.fixtures]]
//! id = "fixture_1"
//! initial = "GREEN"
//! durations = { GREEN = 5.0, YELLOW = 1.0, RED = 4.0 }
//! ```

use crate::error::HarnessResult;
use crate::graph::StaticRoadGraph;
use crate::types::HarnessConfig;
use config::{Config, ConfigError, Environment, File};
use std::path::Path;

/// Everything a run needs from disk: the layered configuration and the road
/// graph export.
pub fn load_inputs(
    config: Option<&Path>,
    graph: &Path,
) -> HarnessResult<(HarnessConfig, StaticRoadGraph)> {
    let config = HarnessConfig::load_from(config)?;
    let graph = StaticRoadGraph::load_json(graph)?;
    Ok((config, graph))
}

impl HarnessConfig {
    /// Load from defaults and environment only.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None::<&Path>)
    }

    /// Load, layering `path` (if given) between defaults and environment.
    ///
    /// Environment keys use a double underscore between levels, e.g.
    /// `HARNESS__CONTROLLER__MODE=manual`.
    pub fn load_from<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.as_ref()).required(true));
        }
        builder
            .add_source(
                Environment::with_prefix("HARNESS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parse a TOML document on top of the built-in defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
