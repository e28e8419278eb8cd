use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "VAGRANT_FLEET_LOG";

/// Logs go to stderr; stdout carries the operation result.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("vagrant_fleet=debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
