//! Tracing subscriber setup for the command line

use std::io::{self, IsTerminal};

use anyhow::{anyhow, Result};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Filter directive for a verbosity level; `base` is used at level 0
pub fn filter_directive(verbosity: u8, quiet: bool, base: &str) -> String {
    if quiet {
        return "error".to_string();
    }
    match verbosity {
        0 => format!("bigearth_select={base},warn"),
        1 => "bigearth_select=debug,info".to_string(),
        2 => "bigearth_select=trace,debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over the verbosity flags when set.
pub fn init_logging(verbosity: u8, quiet: bool, json_output: bool, base_level: &str) -> Result<()> {
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity, quiet, base_level)))
    };

    let result = if json_output {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(json_layer).try_init()
    } else if io::stdout().is_terminal() {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(fmt_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .without_time()
            .with_filter(env_filter);
        tracing_subscriber::registry().with(fmt_layer).try_init()
    };

    result.map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}
