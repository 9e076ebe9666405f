//! Logging setup.
//!
//! All diagnostics go through `tracing`; this installs a compact stderr
//! subscriber so stdout stays reserved for reports and plots.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// `verbosity` counts `-v` flags: 0 → info, 1 → debug, 2+ → trace for this
/// crate. `RUST_LOG` (possibly from `.env`) takes precedence when set.
pub fn init_cli_logger(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "fmri_glm=info",
        1 => "fmri_glm=debug,info",
        _ => "fmri_glm=trace,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // `try_init` so repeated calls (tests, embedding) do not panic.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();
}
