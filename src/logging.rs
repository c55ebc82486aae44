//! Log output for binaries and tests
//!
//! The library itself only emits through the `log` facade; hosts that do not
//! install their own logger can call [`init_logging`].

/// Install an env_logger writing to stderr.
///
/// Defaults to `info`; `RUST_LOG` overrides. Calling it again is harmless.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init_logging();
        init_logging();
        log::info!("logging initialised");
    }
}
