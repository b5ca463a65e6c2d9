//! Time source
//!
//! Every timed delay (retry backoff, reconnect backoff, ping interval) and
//! every timestamp goes through [`Clock`] so tests can run without real timers.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

pub trait Clock: Send + Sync {
    /// Future resolving after `duration`
    fn sleep(&self, duration: Duration) -> Sleep;

    /// Current time, epoch milliseconds
    fn now_ms(&self) -> i64;

    /// Current time as an ISO-8601 string
    fn now_iso(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.now_ms())
            .unwrap_or_default()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

/// Wall clock on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }

    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
