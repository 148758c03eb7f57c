//! Tracing subscriber setup for the `ragx` binary.
//!
//! `RAGX_LOG` wins over the `-v` count when set.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding an `EnvFilter` directive, e.g. `ragx=debug`.
pub const LOG_ENV: &str = "RAGX_LOG";

/// Default filter for a `-v` count when `RAGX_LOG` is unset.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the global subscriber. Logs go to stderr; stdout is for results.
pub fn init(verbosity: u8) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level_for(verbosity)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    // A second init (tests, embedding in another binary) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
