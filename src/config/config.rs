use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::arch::gemmini::params::{Dataflow, HardwareCapacity};
use crate::error::{GemtileError, Result};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Environment variables `GEMTILE__<SECTION>__<KEY>` override file values.
const ENV_PREFIX: &str = "GEMTILE";
const ENV_SEPARATOR: &str = "__";

/// How workloads are run from the command line
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunSection {
  #[serde(default = "default_dataflow")]
  pub dataflow: Dataflow,
  /// Seed of the random workload generator
  #[serde(default)]
  pub seed: u64,
  /// Compare simulator output against the CPU oracle
  #[serde(default = "default_check")]
  pub check: bool,
  /// Record the instruction stream instead of simulating it
  #[serde(default)]
  pub dry_run: bool,
}

fn default_dataflow() -> Dataflow {
  Dataflow::WS
}

fn default_check() -> bool {
  true
}

impl Default for RunSection {
  fn default() -> Self {
    Self {
      dataflow: default_dataflow(),
      seed: 0,
      check: default_check(),
      dry_run: false,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GemtileConfig {
  #[serde(default)]
  pub hardware: HardwareCapacity,
  #[serde(default)]
  pub run: RunSection,
}

impl GemtileConfig {
  /// Parse a standalone TOML document, without layering.
  pub fn from_toml(content: &str) -> Result<Self> {
    Ok(toml::from_str(content)?)
  }
}

/// Built-in defaults, then `path` if given, then `GEMTILE__*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<GemtileConfig> {
  let mut builder =
    config::Config::builder().add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml));

  if let Some(path) = path {
    if !path.exists() {
      return Err(GemtileError::Io {
        source: std::io::Error::new(
          std::io::ErrorKind::NotFound,
          format!("cannot read configuration file {:?}", path),
        ),
      });
    }
    builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
  }

  let settings = builder
    .add_source(
      config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true),
    )
    .build()?;

  let config: GemtileConfig = settings.try_deserialize()?;
  log::debug!("loaded configuration {:?}", config);
  Ok(config)
}

/// Command-line values that win over every configuration layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub dim: Option<usize>,
  pub dataflow: Option<Dataflow>,
  pub seed: Option<u64>,
  pub no_check: bool,
  pub dry_run: bool,
}

pub fn apply_cli_overrides(config: &mut GemtileConfig, overrides: &CliOverrides) {
  if let Some(dim) = overrides.dim {
    config.hardware.dim = dim;
  }
  if let Some(dataflow) = overrides.dataflow {
    config.run.dataflow = dataflow;
  }
  if let Some(seed) = overrides.seed {
    config.run.seed = seed;
  }
  if overrides.no_check {
    config.run.check = false;
  }
  if overrides.dry_run {
    config.run.dry_run = true;
  }
}

pub fn validate_config(config: &GemtileConfig) -> Result<()> {
  config.hardware.validate()?;
  if config.run.dry_run && config.run.check {
    log::warn!("dry runs never touch memory; the oracle check is skipped");
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_layer_matches_default_capacity() {
    let config = GemtileConfig::from_toml(DEFAULT_CONFIG).unwrap();
    assert_eq!(config.hardware, HardwareCapacity::default());
    assert_eq!(config.run.dataflow, Dataflow::WS);
    assert!(config.run.check);
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = GemtileConfig::from_toml("[hardware]\ndim = 8\n").unwrap();
    assert_eq!(config.hardware.dim, 8);
    assert_eq!(config.hardware.acc_rows, 1024);
    assert_eq!(config.run.dataflow, Dataflow::WS);
  }

  #[test]
  fn test_cli_overrides_win() {
    let mut config = GemtileConfig::default();
    apply_cli_overrides(
      &mut config,
      &CliOverrides {
        dataflow: Some(Dataflow::OS),
        seed: Some(7),
        no_check: true,
        ..CliOverrides::default()
      },
    );
    assert_eq!(config.run.dataflow, Dataflow::OS);
    assert_eq!(config.run.seed, 7);
    assert!(!config.run.check);
  }

  #[test]
  fn test_validate_rejects_bad_hardware() {
    let mut config = GemtileConfig::default();
    config.hardware.max_bytes = 24;
    assert!(validate_config(&config).unwrap_err().is_configuration());
  }

  #[test]
  fn test_missing_file_is_io_error() {
    let err = load_config(Some(Path::new("/nonexistent/gemtile.toml"))).unwrap_err();
    assert!(matches!(err, GemtileError::Io { .. }));
  }
}
