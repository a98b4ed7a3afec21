//! Logging facilities with tracing

use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbosity` picks the level for
/// this crate (0 info, 1 debug, 2+ trace) and everything else logs warnings.
/// Colors are used only when `color` is set and stderr is a terminal.
pub fn init(verbosity: u8, color: bool) {
    let crate_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(..) => EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .parse_lossy(format!("warn,dns_filter={}", crate_level)),
    };

    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_ansi(color && std::io::stderr().is_terminal())
        .with_target(verbosity >= 1)
        .with_env_filter(filter);

    // Fails only when an embedding process already installed one.
    let _ = builder.try_init();
}
