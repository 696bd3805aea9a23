//! Carbon plaintext protocol.
//!
//! One metric per line: `<metric path> <value> <unix timestamp>\n`. This is
//! the format Carbon accepts on its plaintext port (2003 by default).

use std::fmt;

/// A single metric data point ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    namespace: String,
    value: f64,
    epoch_seconds: i64,
}

impl MetricSample {
    pub fn new(namespace: impl Into<String>, value: f64, epoch_seconds: i64) -> Self {
        Self {
            namespace: namespace.into(),
            value,
            epoch_seconds,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn epoch_seconds(&self) -> i64 {
        self.epoch_seconds
    }

    /// Serialize into a newline-terminated protocol line.
    pub fn to_line(&self) -> String {
        format_line(&self.namespace, self.value, self.epoch_seconds)
    }
}

impl fmt::Display for MetricSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Format one plaintext protocol line.
///
/// ```
/// use w1_graphite::metric::format_line;
///
/// assert_eq!(format_line("ns", 23.5, 1700000000), "ns 23.5 1700000000\n");
/// ```
pub fn format_line(namespace: &str, value: f64, epoch_seconds: i64) -> String {
    format!("{} {} {}\n", namespace, value, epoch_seconds)
}
