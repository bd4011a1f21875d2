//! Outbound request pacing
//!
//! One watermark shared by every scope: consecutive provider calls are at
//! least `min_interval` apart, measured from the end of the previous call.
//! The lock is held across the call, so calls never overlap.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RequestPacer {
    min_interval: Duration,
    last_finished: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_finished: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for the watermark, run `call`, then move the watermark
    pub async fn run<F, T>(&self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut last = self.last_finished.lock().await;
        if let Some(prev) = *last {
            tokio::time::sleep_until(prev + self.min_interval).await;
        }
        let out = call.await;
        *last = Some(Instant::now());
        out
    }
}
