//! The sampling loop: sensor → metric line → collector, forever.
//!
//! Two states. While `AwaitingConnection` the loop tries to connect every
//! `reconnect_delay`. While `Connected` each cycle reads the bus, sends the
//! target probe's temperature, then sleeps to the next cadence boundary
//! measured from the moment the loop was created. Any failure in a cycle drops
//! the sample and the connection and sleeps `failure_backoff` before going
//! back to `AwaitingConnection`.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::{CollectorError, MetricSink};
use crate::clock::Clock;
use crate::config::Config;
use crate::metric::MetricSample;
use crate::sensor::{SensorError, SensorReading, SensorSource};

/// Settings the poll loop needs, extracted from `Config`.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Device id of the probe to report
    pub sensor_id: String,

    /// Metric path the readings are stored under
    pub namespace: String,

    /// Cadence of successful samples
    pub interval: Duration,

    /// Sleep after a failed cycle
    pub failure_backoff: Duration,

    /// Sleep after a failed connection attempt
    pub reconnect_delay: Duration,
}

impl From<&Config> for PollSettings {
    fn from(config: &Config) -> Self {
        Self {
            sensor_id: config.sensor_id.clone(),
            namespace: config.namespace.clone(),
            interval: config.interval,
            failure_backoff: config.failure_backoff,
            reconnect_delay: config.reconnect_delay,
        }
    }
}

/// Connection state of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingConnection,
    Connected,
}

/// Why a connected cycle did not deliver a sample.
#[derive(Debug)]
pub enum CycleError {
    /// The target probe is not on the bus
    SensorMissing { available: Vec<String> },

    /// The target probe is present but gave no temperature
    Sensor(SensorError),

    /// The collector connection failed while sending
    Transport(CollectorError),
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::SensorMissing { available } => {
                write!(f, "Sensor not found, available devices: {:?}", available)
            }
            CycleError::Sensor(e) => write!(f, "{}", e),
            CycleError::Transport(e) => write!(f, "Unable to send temperature value: {}", e),
        }
    }
}

impl std::error::Error for CycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CycleError::SensorMissing { .. } => None,
            CycleError::Sensor(e) => Some(e),
            CycleError::Transport(e) => Some(e),
        }
    }
}

/// What a single `PollLoop::step` did. The step has already slept for the
/// duration it reports.
#[derive(Debug)]
pub enum Step {
    /// A connection was established; the next step runs a cycle at once
    Connected,

    /// Connecting failed; slept `retry_in` before the next attempt
    ConnectFailed {
        error: CollectorError,
        retry_in: Duration,
    },

    /// A sample was delivered; slept `next_in` to the next cadence boundary
    Delivered {
        sample: MetricSample,
        /// First delivery after start-up or after a failure
        recovered: bool,
        next_in: Duration,
    },

    /// The cycle failed; disconnected and slept `retry_in`
    CycleFailed { error: CycleError, retry_in: Duration },
}

/// Delay from `now` until the next multiple of `cadence` after `started_at`.
///
/// Returns a full `cadence` when `now` sits exactly on a boundary or reads
/// earlier than `started_at`.
pub fn aligned_delay(started_at: Duration, now: Duration, cadence: Duration) -> Duration {
    let cadence_nanos = cadence.as_nanos();
    if cadence_nanos == 0 {
        return Duration::ZERO;
    }

    let elapsed = now.saturating_sub(started_at).as_nanos();
    let remaining = cadence_nanos - elapsed % cadence_nanos;
    Duration::from_nanos(u64::try_from(remaining).unwrap_or(u64::MAX))
}

/// Orchestrates sensor reads and collector writes.
pub struct PollLoop<S, K, C> {
    settings: PollSettings,
    sensors: S,
    sink: K,
    clock: C,
    started_at: Duration,
    state: LoopState,
    /// Set until the first delivery and after every failed cycle, so the
    /// recovery message is logged once per failure→success edge.
    was_failing: bool,
}

impl<S, K, C> PollLoop<S, K, C>
where
    S: SensorSource,
    K: MetricSink,
    C: Clock,
{
    /// Create a loop in `AwaitingConnection`. The cadence reference point is
    /// the clock's reading at this moment.
    pub fn new(settings: PollSettings, sensors: S, sink: K, clock: C) -> Self {
        let started_at = clock.now();
        Self {
            settings,
            sensors,
            sink,
            clock,
            started_at,
            state: LoopState::AwaitingConnection,
            was_failing: true,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn was_failing(&self) -> bool {
        self.was_failing
    }

    pub fn started_at(&self) -> Duration {
        self.started_at
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Run until the process is killed.
    pub async fn run(mut self) {
        info!(
            sensor_id = %self.settings.sensor_id,
            namespace = %self.settings.namespace,
            interval_secs = self.settings.interval.as_secs(),
            "Poll loop started"
        );

        loop {
            self.step().await;
        }
    }

    /// Perform one state transition, including its sleep.
    pub async fn step(&mut self) -> Step {
        match self.state {
            LoopState::AwaitingConnection => self.connect_step().await,
            LoopState::Connected => self.cycle_step().await,
        }
    }

    async fn connect_step(&mut self) -> Step {
        info!("Connecting to collector...");

        match self.sink.connect().await {
            Ok(()) => {
                self.state = LoopState::Connected;
                Step::Connected
            }
            Err(error) => {
                let retry_in = self.settings.reconnect_delay;
                warn!(
                    error = %error,
                    retry_in_secs = retry_in.as_secs(),
                    "Connection to collector failed"
                );
                self.clock.sleep(retry_in).await;
                Step::ConnectFailed { error, retry_in }
            }
        }
    }

    async fn cycle_step(&mut self) -> Step {
        match self.poll_once().await {
            Ok(sample) => {
                let recovered = self.was_failing;
                if recovered {
                    info!(
                        namespace = %sample.namespace(),
                        "Successfully sending temperature to collector"
                    );
                    self.was_failing = false;
                }

                let next_in = aligned_delay(self.started_at, self.clock.now(), self.settings.interval);
                self.clock.sleep(next_in).await;
                Step::Delivered {
                    sample,
                    recovered,
                    next_in,
                }
            }
            Err(error) => {
                let retry_in = self.settings.failure_backoff;
                warn!(error = %error, "Sampling cycle failed");
                info!("Will reconnect in {} seconds...", retry_in.as_secs());

                self.was_failing = true;
                self.sink.disconnect();
                self.state = LoopState::AwaitingConnection;
                self.clock.sleep(retry_in).await;
                Step::CycleFailed { error, retry_in }
            }
        }
    }

    /// One connected cycle: read, look up the target probe, send.
    async fn poll_once(&mut self) -> Result<MetricSample, CycleError> {
        let readings = self.sensors.read_all();
        let celsius = self.target_temperature(&readings)?;

        let epoch_seconds = i64::try_from(self.clock.now().as_secs()).unwrap_or(i64::MAX);
        let sample = MetricSample::new(self.settings.namespace.clone(), celsius, epoch_seconds);

        self.sink
            .send_line(&sample.to_line())
            .await
            .map_err(CycleError::Transport)?;

        debug!(
            value = sample.value(),
            timestamp = sample.epoch_seconds(),
            "Temperature delivered"
        );
        Ok(sample)
    }

    fn target_temperature(&self, readings: &BTreeMap<String, SensorReading>) -> Result<f64, CycleError> {
        let sensor_id = &self.settings.sensor_id;

        let Some(reading) = readings.get(sensor_id) else {
            let snapshot: Vec<&SensorReading> = readings.values().collect();
            warn!(
                sensor_id = %sensor_id,
                readings = %serde_json::to_string(&snapshot).unwrap_or_default(),
                "Cannot find temperature sensor, possible alternatives are listed in readings"
            );
            return Err(CycleError::SensorMissing {
                available: readings.keys().cloned().collect(),
            });
        };

        reading.result.clone().map_err(|e| {
            warn!(sensor_id = %sensor_id, error = %e, "Sensor reading rejected");
            CycleError::Sensor(e)
        })
    }
}
