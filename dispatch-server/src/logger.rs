//! Logging infrastructure
//!
//! Structured logging setup for development (stdout) and production (daily
//! rolling files under the work dir).

use std::path::Path;

/// Initialize the logger with stdout output and the default level
pub fn init_logger() {
    init_logger_with_file(None, None);
}

/// Initialize the logger, writing to daily rolling files when `log_dir`
/// exists
pub fn init_logger_with_file(log_level: Option<&str>, log_dir: Option<&Path>) {
    let level = log_level.unwrap_or("info");

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level.parse().unwrap_or(tracing::Level::INFO))
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);

    if let Some(dir) = log_dir
        && dir.exists()
    {
        let file_appender = tracing_appender::rolling::daily(dir, "dispatch-server");
        subscriber.with_writer(file_appender).init();
        return;
    }

    subscriber.init();
}
