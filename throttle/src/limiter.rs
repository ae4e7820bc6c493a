use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Token-bucket limiter for one direction of one stream.
///
/// Bytes accumulate in a bucket since the last reset. Whenever the bucket
/// holds more bytes than the configured rate allows for the elapsed time, the
/// caller is told to wait out the difference; once the window has been idle
/// for longer than the stall threshold the bucket is discarded instead, so a
/// resumed connection never receives stale credit as a burst.
///
/// A bandwidth of `0` disables the limiter entirely.
#[derive(Debug)]
pub struct Limiter {
    bandwidth: u64,
    bucket: u64,
    start: Instant,
    initialized: bool,
}

impl Limiter {
    pub fn new(bandwidth: u64) -> Self {
        Self {
            bandwidth,
            bucket: 0,
            start: Instant::now(),
            initialized: false,
        }
    }

    pub fn bandwidth(&self) -> u64 {
        self.bandwidth
    }

    /// Bytes accounted since the last reset.
    pub fn bucket(&self) -> u64 {
        self.bucket
    }

    pub fn init(&mut self) {
        if !self.initialized {
            self.reset();
            self.initialized = true;
        }
    }

    /// Retune the limiter. A changed rate opens a fresh window so bytes counted
    /// under the old rate are not re-priced under the new one.
    pub fn set_bandwidth(&mut self, bandwidth: u64) {
        if self.bandwidth == bandwidth {
            return;
        }
        self.bandwidth = bandwidth;
        if self.initialized {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.bucket = 0;
        self.start = Instant::now();
    }

    /// Account one completed transfer of `transferred` bytes out of a buffer of
    /// `requested` bytes and return how long the caller has to wait.
    ///
    /// When a delay is returned the caller must call [`Limiter::reset`] after
    /// waiting it out; [`Limiter::limit`] does both.
    pub fn record(&mut self, transferred: usize, requested: usize) -> Option<Duration> {
        if self.bandwidth == 0 {
            return None;
        }

        self.bucket = self.bucket.saturating_add(transferred as u64);

        let elapsed = self.start.elapsed();
        let ideal = transfer_time(self.bucket, self.bandwidth);
        if ideal > elapsed {
            let delay = ideal - elapsed;
            trace!(
                bucket = self.bucket,
                bandwidth = self.bandwidth,
                ?delay,
                "Running ahead of rate"
            );
            return Some(delay);
        }

        let stall_threshold = Duration::from_secs(1) + transfer_time(requested as u64, self.bandwidth);
        if elapsed > stall_threshold {
            trace!(?elapsed, ?stall_threshold, "Discarding stale bucket");
            self.reset();
        }
        None
    }

    /// Account a completed transfer, sleeping if the caller is ahead of the
    /// configured rate.
    pub async fn limit(&mut self, transferred: usize, requested: usize) {
        if let Some(delay) = self.record(transferred, requested) {
            tokio::time::sleep(delay).await;
            self.reset();
        }
    }
}

/// Time `bytes` should take at `bandwidth` bytes per second.
pub(crate) fn transfer_time(bytes: u64, bandwidth: u64) -> Duration {
    let nanos = u128::from(bytes) * 1_000_000_000 / u128::from(bandwidth.max(1));
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
