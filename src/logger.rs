//! Centralized logging configuration for the sclam binaries
//!
//! This module provides a consistent logging setup with custom formatting
//! and default INFO level across all executables.

use tracing::Level;

/// Initialize the tracing subscriber with the standard configuration
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// Format includes:
/// - Timestamp (YYYY-MM-DD HH:MM:SS)
/// - Log level (INFO, WARN, ERROR, DEBUG, TRACE)
/// - Module/target path
///
/// # Example
/// ```no_run
/// use hypergraph_sclam::init_logger;
///
/// fn main() {
///     init_logger();
///     tracing::info!("Calibration started");
/// }
/// ```
///
/// # Environment Variables
/// Override the default log level using `RUST_LOG`:
/// ```bash
/// RUST_LOG=debug cargo run --bin sclam_optimizer -- sync.txt poses
/// RUST_LOG=hypergraph_sclam::optimizer=trace cargo run --bin sclam_optimizer -- sync.txt poses
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        // Custom format: [date:time LEVEL module]
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();
}
