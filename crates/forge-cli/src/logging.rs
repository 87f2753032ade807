use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub(crate) const LOG_ENV: &str = "FORGE_LOG";

/// Install the global subscriber on stderr; stdout carries events only.
pub(crate) fn init(json: bool, verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = installed {
        eprintln!("logging not initialized: {e}");
    }
}
