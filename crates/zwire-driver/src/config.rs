use std::time::Duration;

/// How long to wait for ACK/NAK/CAN after writing a data frame.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(1600);
/// Transmission attempts per frame, including the first.
pub const MAX_ATTEMPTS: u32 = 4;
/// Delay before the first retransmission.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
/// Extra delay added for every further retransmission.
pub const RETRY_DELAY_STEP: Duration = Duration::from_millis(1000);
/// How long a soft reset waits for the controller's startup notification.
pub const STARTUP_TIMEOUT: Duration = Duration::from_millis(1500);
/// Attempts to reopen the channel after a reset.
pub const REOPEN_ATTEMPTS: u32 = 5;
/// Pause between reopen attempts.
pub const REOPEN_DELAY: Duration = Duration::from_millis(500);
/// Consecutive bad checksums that force a channel reset.
pub const CHECKSUM_FAILURE_LIMIT: u32 = 3;

const DEFAULT_READ_CHUNK: usize = 256;

/// Wire-level timing and recovery policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Wait for an acknowledgement before counting the attempt as failed.
    pub ack_timeout: Duration,
    /// Transmission attempts per frame.
    pub max_attempts: u32,
    /// Delay before the first retransmission.
    pub retry_base_delay: Duration,
    /// Increment per further retransmission.
    pub retry_delay_step: Duration,
    /// Reopen attempts after a channel reset.
    pub reopen_attempts: u32,
    /// Pause between reopen attempts.
    pub reopen_delay: Duration,
    /// Consecutive invalid checksums that force a channel reset. 0 disables.
    pub checksum_failure_limit: u32,
    /// Read buffer growth per read call.
    pub read_chunk_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ack_timeout: ACK_TIMEOUT,
            max_attempts: MAX_ATTEMPTS,
            retry_base_delay: RETRY_BASE_DELAY,
            retry_delay_step: RETRY_DELAY_STEP,
            reopen_attempts: REOPEN_ATTEMPTS,
            reopen_delay: REOPEN_DELAY,
            checksum_failure_limit: CHECKSUM_FAILURE_LIMIT,
            read_chunk_size: DEFAULT_READ_CHUNK,
        }
    }
}

impl CoordinatorConfig {
    /// Delay before the `retry`-th retransmission (1-based).
    ///
    /// `base + (retry - 1) * step`: 100 ms, 1100 ms, 2100 ms with defaults.
    pub fn retry_delay(&self, retry: u32) -> Duration {
        match retry {
            0 => Duration::ZERO,
            n => self.retry_base_delay + self.retry_delay_step * (n - 1),
        }
    }
}

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Wire-level policy.
    pub coordinator: CoordinatorConfig,
    /// Wait for the startup notification after a soft reset.
    pub startup_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            startup_timeout: STARTUP_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delays_follow_protocol_schedule() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(2), Duration::from_millis(1100));
        assert_eq!(config.retry_delay(3), Duration::from_millis(2100));
        assert_eq!(config.retry_delay(0), Duration::ZERO);
    }

    #[test]
    fn defaults_match_protocol_constants() {
        let config = DriverConfig::default();
        assert_eq!(config.coordinator.ack_timeout, Duration::from_millis(1600));
        assert_eq!(config.coordinator.max_attempts, 4);
        assert_eq!(config.startup_timeout, Duration::from_millis(1500));
        assert_eq!(config.coordinator.checksum_failure_limit, 3);
    }
}
