//! w1-graphite Library
//!
//! Relays a one-wire DS18B20 temperature probe to a Graphite/Carbon
//! collector:
//!
//! - **config**: Environment-based configuration with compiled-in defaults
//! - **sensor**: Reads and parses `w1_slave` files from the w1 sysfs tree
//! - **metric**: Carbon plaintext line protocol
//! - **client**: Persistent TCP connection to the collector
//! - **clock**: Wall-clock time source and sleeper
//! - **poll**: The connect / sample / send / back-off state machine
//! - **daemon**: Terminal detaching and PID file handling
//!
//! # Example
//!
//! ```no_run
//! use w1_graphite::client::CollectorClient;
//! use w1_graphite::clock::SystemClock;
//! use w1_graphite::config::Config;
//! use w1_graphite::poll::{PollLoop, PollSettings};
//! use w1_graphite::sensor::SensorReader;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     let poll = PollLoop::new(
//!         PollSettings::from(&config),
//!         SensorReader::new(&config.devices_dir),
//!         CollectorClient::new(&config),
//!         SystemClock,
//!     );
//!
//!     // Never returns
//!     poll.run().await;
//! }
//! ```

// Module declarations
pub mod client;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod metric;
pub mod poll;
pub mod sensor;

// Re-export commonly used types at crate root for convenience
pub use client::{ClientStats, CollectorClient, CollectorError, MetricSink};
pub use clock::{Clock, SystemClock};
pub use config::{Config, ConfigError};
pub use daemon::{DaemonError, PidFile};
pub use metric::{format_line, MetricSample};
pub use poll::{aligned_delay, CycleError, LoopState, PollLoop, PollSettings, Step};
pub use sensor::{SensorError, SensorReader, SensorReading, SensorSource};
