use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins when set; otherwise the
/// level is `info`, with `debug` for this crate when `trace_jit` is on.
pub fn init(trace_jit: bool) -> Result<(), Box<dyn std::error::Error>> {
    let default = if trace_jit { "info,stackjit=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}
