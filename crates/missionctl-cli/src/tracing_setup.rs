/// Thin wrapper around [`missionctl_telemetry::setup_telemetry`] that
/// supplies this binary's own name and version.
pub fn setup_logging() {
    missionctl_telemetry::setup_telemetry(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
}
