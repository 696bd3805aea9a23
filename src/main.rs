//! w1-graphite - one-wire temperature relay for Graphite
//!
//! Samples a DS18B20 probe through the Linux w1 sysfs interface and streams
//! the readings to a Carbon plaintext listener.
//!
//! ## Features
//!
//! - Cadence-aligned sampling (readings land on fixed multiples of the
//!   interval from process start)
//! - Automatic reconnect with fixed backoff; never exits on its own
//! - Detaches from the terminal with a single-instance PID file
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `W1_GRAPHITE_HOST` / `W1_GRAPHITE_PORT`: collector (default: 192.168.10.20:2003)
//! - `W1_GRAPHITE_NAMESPACE`: metric path (default: server-room.temp1)
//! - `W1_GRAPHITE_SENSOR_ID`: probe id (default: 28-3c01b5563c0c)
//! - `W1_GRAPHITE_INTERVAL_SECS`: cadence (default: 5)
//! - `W1_GRAPHITE_FOREGROUND`: set to `1` to stay attached
//! - `RUST_LOG`: Logging level filter (default: info)

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use w1_graphite::client::CollectorClient;
use w1_graphite::clock::SystemClock;
use w1_graphite::config::Config;
use w1_graphite::daemon::{self, PidFile};
use w1_graphite::poll::{PollLoop, PollSettings};
use w1_graphite::sensor::SensorReader;

/// Timestamp prefix of every log line
const LOG_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

fn main() {
    // Logging is not up yet; report straight to the terminal.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("w1-graphite: {}", e);
            std::process::exit(1);
        }
    };

    let _pid_file: Option<PidFile> = if config.foreground {
        None
    } else {
        match daemon::detach(&config.work_dir, &config.pid_file) {
            Ok(pid_file) => Some(pid_file),
            Err(e) => {
                eprintln!("w1-graphite: {}", e);
                std::process::exit(1);
            }
        }
    };

    init_tracing(&config.resolved_log_file());

    info!("Starting temperature logging...");
    info!(
        collector = %config.collector_addr(),
        namespace = %config.namespace,
        sensor_id = %config.sensor_id,
        devices_dir = %config.devices_dir.display(),
        interval_secs = config.interval.as_secs(),
        failure_backoff_secs = config.failure_backoff.as_secs(),
        reconnect_delay_secs = config.reconnect_delay.as_secs(),
        foreground = config.foreground,
        "Configuration loaded"
    );

    // Everything runs on this one thread.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build async runtime");
            std::process::exit(1);
        }
    };

    let poll = PollLoop::new(
        PollSettings::from(&config),
        SensorReader::new(&config.devices_dir),
        CollectorClient::new(&config),
        SystemClock,
    );

    runtime.block_on(poll.run());
}

/// Initialize the tracing subscriber, appending to `log_file`.
///
/// Falls back to stderr when the file cannot be opened.
fn init_tracing(log_file: &Path) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let opened = OpenOptions::new().create(true).append(true).open(log_file);
    let (writer, open_error) = match opened {
        Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), None),
        Err(e) => (BoxMakeWriter::new(std::io::stderr), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    if let Some(e) = open_error {
        warn!(
            log_file = %log_file.display(),
            error = %e,
            "Cannot open log file, logging to stderr"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_time_format() {
        let stamp = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .map(|t| t.format(LOG_TIME_FORMAT).to_string());
        assert_eq!(stamp.as_deref(), Some("20240102_030405"));
    }
}
