pub mod telemetry;

pub use telemetry::setup_telemetry;
