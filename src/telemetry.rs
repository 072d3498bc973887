//! Logging setup.
//!
//! `RUST_LOG` takes precedence; otherwise `--verbose` selects `debug` and the
//! default is `info`. Everything is written to stderr so stdout only carries
//! the run summary.

use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

pub fn init(verbose: bool, format: LogFormat) {
    let filter = filter(verbose);
    let registry = tracing_subscriber::registry().with(filter);

    // Ignored when a subscriber is already installed.
    let _ = match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "preview_merger=debug,pmerge=debug,info"
        } else {
            "info"
        })
    })
}
