//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Default filter for a `-v` count: warnings only, then info, then debug.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "crm_dashboard=info,crmd=info,warn",
        _ => "crm_dashboard=debug,crmd=debug,info",
    }
}

/// Install a stderr `fmt` subscriber. `RUST_LOG` wins over `verbosity`.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(default_directive(0), "warn");
        assert!(default_directive(1).contains("crm_dashboard=info"));
        assert!(default_directive(5).contains("crm_dashboard=debug"));
    }

    #[test]
    fn init_twice_does_not_panic() {
        init(0);
        init(2);
    }
}
