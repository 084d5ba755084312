use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// `AUDIOVAULT_LOG` wins over `RUST_LOG`; both fall back to `info`.
fn resolve_filter() -> EnvFilter {
    if let Ok(raw) = std::env::var("AUDIOVAULT_LOG") {
        if let Ok(filter) = EnvFilter::try_new(raw.trim()) {
            return filter;
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(resolve_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
