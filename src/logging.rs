//! Diagnostics for the mailbox and device processes
//!
//! Everything goes to stderr so `analyze` and `status` keep stdout for their
//! JSON. Set `RUST_LOG=chirp_auth=debug` to see the per-attempt fit figures,
//! and `RUST_LOG_FORMAT=json` when the output is collected by journald.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "chirp_auth=info";

fn json_requested() -> bool {
    std::env::var("RUST_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Install the stderr subscriber; only the first call in a process wins
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if json_requested() {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    if installed.is_err() {
        tracing::debug!("subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init();
        init();
    }

    #[test]
    fn test_default_filter_parses() {
        let filter = EnvFilter::new(DEFAULT_FILTER);
        assert!(format!("{filter:?}").contains("chirp_auth"));
    }
}
