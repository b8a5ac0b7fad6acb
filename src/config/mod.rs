pub mod config;

pub use self::config::{apply_cli_overrides, load_config, validate_config, CliOverrides, GemtileConfig, RunSection};
