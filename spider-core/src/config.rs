//! Recognized spider configuration options (§6 of the specification).
//!
//! `SpiderConfig` is the in-memory, already-validated settings bundle the
//! engine consumes; loading and merging a file/CLI overlay into one of
//! these is the hosting binary's job (see `spider-cli`'s `file_config`
//! module for the on-disk side, grounded in the teacher's
//! `downloader-cli::app_config` loader).

/// Default retry budget: max admission attempts per request.
pub const DEFAULT_RETRIED_TIMES: u32 = 3;
/// Default depth limit; `0` disables the depth check.
pub const DEFAULT_DEPTH: u32 = 0;
/// Default dispatch pacing, in requests/second.
pub const DEFAULT_SPEED: f64 = 1.0;
/// Default soft cap on in-flight requests before back-pressure engages.
pub const DEFAULT_REQUESTED_QUEUE_COUNT: u32 = 5000;
/// Default idle/paused terminal threshold, in seconds.
pub const DEFAULT_EMPTY_SLEEP_TIME: u32 = 15;
/// Default in-flight timeout, in milliseconds.
///
/// Not part of the specification's literal "exhaustive recognized set" in
/// §6 (which omits it), but required by the in-flight table's documented
/// timeout sweep (§3/§4.3); carried here as a recognized option since the
/// engine cannot otherwise know what to configure the sweep with.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Minimum proxy quality score the engine will accept.
pub const MIN_PROXY_SCORE: u32 = 70;

/// Validation failure for a [`SpiderConfig`] field.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `retried_times` must be `>= 1`.
    #[error("retried_times must be >= 1, got {0}")]
    RetriedTimesTooLow(u32),
    /// `speed` must be `> 0`.
    #[error("speed must be > 0, got {0}")]
    SpeedNotPositive(f64),
    /// `requested_queue_count` must be `> 0`.
    #[error("requested_queue_count must be > 0, got {0}")]
    RequestedQueueCountNotPositive(u32),
}

/// Recognized, validated configuration for one spider.
#[derive(Debug, Clone)]
pub struct SpiderConfig {
    /// Identifier of the default data-flow sink to append to the pipeline,
    /// resolved via the [`crate::dataflow::StorageRegistry`]. `None` means
    /// no default storage stage is appended.
    pub storage: Option<String>,
    /// Max admission attempts per request.
    pub retried_times: u32,
    /// Depth limit; `0` disables the check.
    pub depth: u32,
    /// Dispatch pacing target, requests/second.
    pub speed: f64,
    /// Soft cap on in-flight requests before back-pressure pauses dispatch.
    pub requested_queue_count: u32,
    /// Idle/paused terminal threshold, in seconds.
    pub empty_sleep_time: u32,
    /// In-flight timeout, in milliseconds, before a request is swept and
    /// re-admitted.
    pub request_timeout_ms: u64,
    /// Whether to lease a proxy (minimum score [`MIN_PROXY_SCORE`]) before
    /// every publish.
    pub use_proxy: bool,
}

impl Default for SpiderConfig {
    fn default() -> Self {
        Self {
            storage: None,
            retried_times: DEFAULT_RETRIED_TIMES,
            depth: DEFAULT_DEPTH,
            speed: DEFAULT_SPEED,
            requested_queue_count: DEFAULT_REQUESTED_QUEUE_COUNT,
            empty_sleep_time: DEFAULT_EMPTY_SLEEP_TIME,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            use_proxy: false,
        }
    }
}

impl SpiderConfig {
    /// Validates range constraints on the recognized options.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retried_times < 1 {
            return Err(ConfigError::RetriedTimesTooLow(self.retried_times));
        }
        if !(self.speed > 0.0) {
            return Err(ConfigError::SpeedNotPositive(self.speed));
        }
        if self.requested_queue_count == 0 {
            return Err(ConfigError::RequestedQueueCountNotPositive(
                self.requested_queue_count,
            ));
        }
        Ok(())
    }

    /// Computes the dispatcher's pacing tuple `(interval_ms, batch)` from
    /// `speed`, per §4.3: `speed >= 1` paces by the second with a batch of
    /// `floor(speed)`; `speed < 1` stretches the interval and dispatches
    /// one request per tick.
    #[must_use]
    pub fn pacing(&self) -> (u64, usize) {
        if self.speed >= 1.0 {
            (1000, self.speed.floor() as usize)
        } else {
            let interval = (1.0 / self.speed).floor() as u64 * 1000;
            (interval, 1)
        }
    }

    /// The idle/paused terminal threshold in milliseconds.
    #[must_use]
    pub fn sleep_limit_ms(&self) -> u64 {
        u64::from(self.empty_sleep_time) * 1000
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SpiderConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_retried_times() {
        let mut cfg = SpiderConfig::default();
        cfg.retried_times = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::RetriedTimesTooLow(0))
        );
    }

    #[test]
    fn rejects_non_positive_speed() {
        let mut cfg = SpiderConfig::default();
        cfg.speed = 0.0;
        assert_eq!(cfg.validate(), Err(ConfigError::SpeedNotPositive(0.0)));
    }

    #[test]
    fn pacing_batches_when_speed_at_least_one() {
        let mut cfg = SpiderConfig::default();
        cfg.speed = 2.0;
        assert_eq!(cfg.pacing(), (1000, 2));
    }

    #[test]
    fn pacing_stretches_interval_when_speed_below_one() {
        let mut cfg = SpiderConfig::default();
        cfg.speed = 0.25;
        assert_eq!(cfg.pacing(), (4000, 1));
    }
}
