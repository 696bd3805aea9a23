//! Configuration module for the w1-graphite relay.
//!
//! Every setting has a compiled-in default matching the reference deployment
//! (a Raspberry Pi in the server room feeding a Graphite host on the LAN).
//! Each default can be overridden through an environment variable.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default Carbon collector host
const DEFAULT_HOST: &str = "192.168.10.20";

/// Default Carbon plaintext port
const DEFAULT_PORT: u16 = 2003;

/// Default metric namespace (Graphite dotted path)
const DEFAULT_NAMESPACE: &str = "server-room.temp1";

/// Default one-wire device id of the DS18B20 probe
const DEFAULT_SENSOR_ID: &str = "28-3c01b5563c0c";

/// Default sysfs directory where the w1 bus driver registers devices
const DEFAULT_DEVICES_DIR: &str = "/sys/bus/w1/devices";

/// Default seconds between successful samples
const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Default seconds to wait after a failed cycle
const DEFAULT_FAILURE_BACKOFF_SECS: u64 = 30;

/// Default seconds between connection attempts
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 10;

const DEFAULT_LOG_FILE: &str = "w1-graphite.log";
const DEFAULT_WORK_DIR: &str = "/home/pi/Temperature";
const DEFAULT_PID_FILE: &str = "/var/run/w1-graphite.pid";

/// Lower bound for every interval setting
const MIN_INTERVAL_SECS: u64 = 1;

/// Upper bound for every interval setting
const MAX_INTERVAL_SECS: u64 = 3600;

/// Configuration for the w1-graphite relay.
///
/// Settings can be configured via environment variables:
/// - `W1_GRAPHITE_HOST` / `W1_GRAPHITE_PORT`: Carbon collector address
/// - `W1_GRAPHITE_NAMESPACE`: metric path the readings are stored under
/// - `W1_GRAPHITE_SENSOR_ID`: one-wire id of the probe to report
/// - `W1_GRAPHITE_DEVICES_DIR`: w1 device registry directory
/// - `W1_GRAPHITE_INTERVAL_SECS`: sampling cadence (default: 5)
/// - `W1_GRAPHITE_FAILURE_BACKOFF_SECS`: pause after a failed cycle (default: 30)
/// - `W1_GRAPHITE_RECONNECT_DELAY_SECS`: pause between connect attempts (default: 10)
/// - `W1_GRAPHITE_LOG_FILE`, `W1_GRAPHITE_WORK_DIR`, `W1_GRAPHITE_PID_FILE`
/// - `W1_GRAPHITE_FOREGROUND`: stay attached to the terminal
#[derive(Debug, Clone)]
pub struct Config {
    /// Hostname or IP address of the Carbon collector
    pub host: String,

    /// TCP port of the Carbon plaintext listener
    pub port: u16,

    /// Dotted metric path, e.g. `server-room.temp1`
    pub namespace: String,

    /// Device id to report, e.g. `28-3c01b5563c0c`
    pub sensor_id: String,

    /// Directory holding one sub-directory per one-wire device
    pub devices_dir: PathBuf,

    /// Cadence of successful samples, aligned to process start
    pub interval: Duration,

    /// Sleep after any failed cycle before reconnecting
    pub failure_backoff: Duration,

    /// Sleep between consecutive failed connection attempts
    pub reconnect_delay: Duration,

    /// Append-mode log file, relative paths resolve against `work_dir`
    pub log_file: PathBuf,

    /// Working directory of the detached daemon
    pub work_dir: PathBuf,

    /// PID file guarding against a second running instance
    pub pid_file: PathBuf,

    /// Skip detaching from the terminal
    pub foreground: bool,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to the compiled-in defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but malformed or outside
    /// its allowed range.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use w1_graphite::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Collector: {}", config.collector_addr());
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let launch_dir = env::current_dir().map_err(|e| ConfigError {
            message: format!("cannot determine current directory: {}", e),
            env_var: None,
        })?;

        Ok(Self::from_lookup(|key| env::var(key).ok())?.anchored_at(&launch_dir))
    }

    /// Make every relative path absolute against `base`.
    ///
    /// The daemon changes directory before it writes the PID file and opens
    /// the log, so paths must not depend on the current directory after
    /// loading. `log_file` stays relative to `work_dir`.
    pub fn anchored_at(mut self, base: &Path) -> Self {
        let anchor = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                base.join(path)
            }
        };

        self.work_dir = anchor(self.work_dir);
        self.pid_file = anchor(self.pid_file);
        self.devices_dir = anchor(self.devices_dir);
        self.log_file = self.resolved_log_file();
        self
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// `from_env` is this with `std::env::var`; tests pass a map instead so
    /// they never touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("W1_GRAPHITE_HOST")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        if host.is_empty() {
            return Err(ConfigError::for_var("W1_GRAPHITE_HOST", "host must not be empty"));
        }

        let port = Self::parse_port(&lookup)?;
        let namespace = Self::parse_namespace(&lookup)?;

        let sensor_id = lookup("W1_GRAPHITE_SENSOR_ID")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_SENSOR_ID.to_string());
        if sensor_id.is_empty() {
            return Err(ConfigError::for_var(
                "W1_GRAPHITE_SENSOR_ID",
                "sensor id must not be empty",
            ));
        }

        let devices_dir = lookup("W1_GRAPHITE_DEVICES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICES_DIR));

        let interval = Self::parse_secs(&lookup, "W1_GRAPHITE_INTERVAL_SECS", DEFAULT_INTERVAL_SECS)?;
        let failure_backoff = Self::parse_secs(
            &lookup,
            "W1_GRAPHITE_FAILURE_BACKOFF_SECS",
            DEFAULT_FAILURE_BACKOFF_SECS,
        )?;
        let reconnect_delay = Self::parse_secs(
            &lookup,
            "W1_GRAPHITE_RECONNECT_DELAY_SECS",
            DEFAULT_RECONNECT_DELAY_SECS,
        )?;

        let log_file = lookup("W1_GRAPHITE_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
        let work_dir = lookup("W1_GRAPHITE_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR));
        let pid_file = lookup("W1_GRAPHITE_PID_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_FILE));

        let foreground = Self::parse_flag(&lookup, "W1_GRAPHITE_FOREGROUND")?;

        Ok(Self {
            host,
            port,
            namespace,
            sensor_id,
            devices_dir,
            interval: Duration::from_secs(interval),
            failure_backoff: Duration::from_secs(failure_backoff),
            reconnect_delay: Duration::from_secs(reconnect_delay),
            log_file,
            work_dir,
            pid_file,
            foreground,
        })
    }

    /// `host:port` string handed to the TCP connector.
    pub fn collector_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log file path with relative paths anchored at the working directory.
    pub fn resolved_log_file(&self) -> PathBuf {
        if self.log_file.is_absolute() {
            self.log_file.clone()
        } else {
            self.work_dir.join(&self.log_file)
        }
    }

    /// Parse the collector port with validation.
    fn parse_port<F>(lookup: &F) -> Result<u16, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_var = "W1_GRAPHITE_PORT";

        match lookup(env_var) {
            Some(value) => {
                let port: u16 = value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::for_var(env_var, format!("'{}' is not a valid port", value)))?;

                if port == 0 {
                    return Err(ConfigError::for_var(env_var, "port must be greater than 0"));
                }

                Ok(port)
            }
            None => Ok(DEFAULT_PORT),
        }
    }

    /// Parse the metric namespace. Carbon splits lines on whitespace, so the
    /// namespace must not contain any.
    fn parse_namespace<F>(lookup: &F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_var = "W1_GRAPHITE_NAMESPACE";

        match lookup(env_var) {
            Some(value) => {
                let namespace = value.trim().to_string();
                if namespace.is_empty() {
                    return Err(ConfigError::for_var(env_var, "namespace must not be empty"));
                }
                if namespace.chars().any(char::is_whitespace) {
                    return Err(ConfigError::for_var(
                        env_var,
                        format!("namespace '{}' contains whitespace", namespace),
                    ));
                }
                Ok(namespace)
            }
            None => Ok(DEFAULT_NAMESPACE.to_string()),
        }
    }

    /// Parse a seconds value with range validation.
    fn parse_secs<F>(lookup: &F, env_var: &str, default: u64) -> Result<u64, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(env_var) {
            Some(value) => {
                let secs: u64 = value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::for_var(env_var, format!("'{}' is not a valid number", value)))?;

                if secs < MIN_INTERVAL_SECS {
                    return Err(ConfigError::for_var(
                        env_var,
                        format!("{}s is below minimum ({}s)", secs, MIN_INTERVAL_SECS),
                    ));
                }

                if secs > MAX_INTERVAL_SECS {
                    return Err(ConfigError::for_var(
                        env_var,
                        format!("{}s exceeds maximum ({}s)", secs, MAX_INTERVAL_SECS),
                    ));
                }

                Ok(secs)
            }
            None => Ok(default),
        }
    }

    fn parse_flag<F>(lookup: &F, env_var: &str) -> Result<bool, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(env_var) {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" | "" => Ok(false),
                other => Err(ConfigError::for_var(
                    env_var,
                    format!("'{}' is not a valid boolean", other),
                )),
            },
            None => Ok(false),
        }
    }
}

impl Default for Config {
    /// Create a configuration from the compiled-in defaults.
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            namespace: DEFAULT_NAMESPACE.to_string(),
            sensor_id: DEFAULT_SENSOR_ID.to_string(),
            devices_dir: PathBuf::from(DEFAULT_DEVICES_DIR),
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            failure_backoff: Duration::from_secs(DEFAULT_FAILURE_BACKOFF_SECS),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            foreground: false,
        }
    }
}
