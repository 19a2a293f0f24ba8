//! Log output for the `smokepair` binary.
//!
//! stdout is reserved for the text report, so every log line (human or JSON)
//! goes to stderr. `RUST_LOG` overrides the level picked from `--verbose`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. With `json` set, lifecycle events from
/// [`crate::obs`] come out as one JSON object per line. Only the first call
/// in a process has an effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let human = (!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));
    let machine = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(human)
        .with(machine)
        .try_init()
        .ok();
}
