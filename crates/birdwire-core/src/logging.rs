use crate::Result;

/// Initialize logging/tracing for a birdwire process.
///
/// Library code only emits `tracing` events; binaries call this once at startup.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    // Default: info for our crates, warn for everything else.
    // Can be overridden with `RUST_LOG`.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,birdwire=info,birdwire_core=info,{service_name}=info"
        ))
    });

    // Decoded output goes to stdout, so logs must stay on stderr.
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| crate::Error::Config(format!("logging already initialized: {e}")))?;

    Ok(())
}
