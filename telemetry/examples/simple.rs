use tracing::{debug, error, info, trace, warn};

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    // Info and below land on stdout, warnings and errors on stderr, and everything in the
    // system log under the `telemetry-example` tag.
    let telemetry = glinet_telemetry::TelemetryConfig::new()
        .with_syslog("telemetry-example")
        .init();

    trace!("TRACE");
    debug!("DEBUG");
    info!("INFO");
    warn!(attempt = 1, "WARN");
    error!("ERROR");

    telemetry.flush_blocking();

    Ok(())
}
