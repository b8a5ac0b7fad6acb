/// Install the `env_logger` backend. `RUST_LOG` overrides the default `warn` filter.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_log() {
  init_log_with("warn");
}

/// [`init_log`] with another default filter, for the CLI's `--verbose`.
pub fn init_log_with(default_filter: &str) {
  let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
    .format_timestamp(None)
    .try_init();
}
