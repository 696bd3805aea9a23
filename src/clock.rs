//! Time source used by the poll loop.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;

/// Wall-clock reader and sleeper.
pub trait Clock {
    /// Current time as a duration since the Unix epoch.
    fn now(&self) -> Duration;

    /// Suspend the caller for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
        (**self).sleep(duration)
    }
}

/// `Clock` backed by the system wall clock and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        let now = Utc::now();
        let secs = u64::try_from(now.timestamp()).unwrap_or(0);
        Duration::new(secs, now.timestamp_subsec_nanos().min(999_999_999))
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
