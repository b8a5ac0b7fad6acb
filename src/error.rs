//! Error types for tiling and instruction issue

use thiserror::Error;

/// Result type alias for gemtile operations
pub type Result<T> = std::result::Result<T, GemtileError>;

/// Everything that can stop an operation before an instruction is issued.
///
/// There is no runtime-recoverable class: the accelerator reports no faults, so every
/// check runs in software before the first instruction goes out.
#[derive(Debug, Error)]
pub enum GemtileError {
  /// Tile size, dataflow or transpose combination the hardware cannot be programmed with
  #[error("configuration error: {reason}")]
  Configuration {
    /// What was rejected
    reason: String,
  },

  /// A caller-supplied dimension disagrees with the shape it implies
  #[error("dimension error: {what} is {actual}, expected {expected}")]
  Dimension {
    /// Name of the mismatched dimension
    what: &'static str,
    /// Value implied by the other parameters
    expected: usize,
    /// Value the caller passed
    actual: usize,
  },

  /// I/O error while reading configuration
  #[error("I/O error: {source}")]
  Io {
    #[from]
    source: std::io::Error,
  },

  /// Malformed TOML
  #[error("failed to parse TOML: {source}")]
  Toml {
    #[from]
    source: toml::de::Error,
  },

  /// Layered configuration could not be built
  #[error("failed to load configuration: {source}")]
  Config {
    #[from]
    source: config::ConfigError,
  },
}

impl GemtileError {
  /// Create a configuration error
  pub fn configuration(reason: impl Into<String>) -> Self {
    Self::Configuration { reason: reason.into() }
  }

  /// Create a dimension error
  pub fn dimension(what: &'static str, expected: usize, actual: usize) -> Self {
    Self::Dimension { what, expected, actual }
  }

  /// Whether this error came from capacity or mode validation
  pub fn is_configuration(&self) -> bool {
    matches!(self, Self::Configuration { .. })
  }

  /// Whether this error came from shape validation
  pub fn is_dimension(&self) -> bool {
    matches!(self, Self::Dimension { .. })
  }
}

/// Fail with a configuration error unless `cond` holds.
pub(crate) fn ensure(cond: bool, reason: impl FnOnce() -> String) -> Result<()> {
  if cond {
    Ok(())
  } else {
    Err(GemtileError::configuration(reason()))
  }
}
