use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `filter` when set.
/// Logs go to stderr so stdout stays clean for command output.
pub fn init_tracing(filter: &str, json: bool) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().try_init().map_err(|error| error.to_string())
    } else {
        builder.try_init().map_err(|error| error.to_string())
    }
}
