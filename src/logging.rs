use env_logger::Env;

/// Initializes the logger with the `env_logger` crate.
///
/// `level` is used unless `RUST_LOG` is set.
pub fn init_logger(level: &str) {
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}
