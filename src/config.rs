use std::time::Duration;

use crate::retry::{Backoff, RetryPolicy};

/// Game-state polling cadence and failure policy
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Interval used once `max_failures` consecutive polls have failed
    pub degraded_interval: Duration,
    pub max_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            degraded_interval: Duration::from_secs(10),
            max_failures: 5,
        }
    }
}

/// Durations of the voting lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct VoteTiming {
    /// Local countdown shown while voting
    pub countdown: Duration,
    /// Out-of-band vote status check cadence during the countdown
    pub status_check_every: Duration,
    pub processing: Duration,
    pub results: Duration,
    /// Granularity of countdown display updates
    pub display_tick: Duration,
    /// Countdown threshold for the warning style
    pub warning_below: Duration,
}

impl Default for VoteTiming {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(30),
            status_check_every: Duration::from_secs(5),
            processing: Duration::from_millis(1500),
            results: Duration::from_secs(8),
            display_tick: Duration::from_secs(1),
            warning_below: Duration::from_secs(10),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the game server
    pub base_url: String,
    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
    pub poll: PollConfig,
    pub vote: VoteTiming,
    /// Identity lookup at session start
    pub identity_retry: RetryPolicy,
    /// Clearing a concluded vote
    pub clear_retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            request_timeout: Duration::from_secs(10),
            poll: PollConfig::default(),
            vote: VoteTiming::default(),
            identity_retry: RetryPolicy {
                max_attempts: 5,
                backoff: Backoff::Fixed(Duration::from_secs(5)),
            },
            clear_retry: RetryPolicy {
                max_attempts: 3,
                backoff: Backoff::Linear(Duration::from_secs(1)),
            },
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_url = std::env::var("SUSWORDS_BASE_URL")
            .ok()
            .and_then(|url| {
                let trimmed = url.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or(defaults.base_url);

        let request_timeout = std::env::var("SUSWORDS_REQUEST_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let poll = PollConfig {
            interval: env_millis("SUSWORDS_POLL_INTERVAL_MS").unwrap_or(defaults.poll.interval),
            degraded_interval: env_millis("SUSWORDS_DEGRADED_POLL_INTERVAL_MS")
                .unwrap_or(defaults.poll.degraded_interval),
            max_failures: std::env::var("SUSWORDS_MAX_POLL_FAILURES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.poll.max_failures),
        };

        Self {
            base_url,
            request_timeout,
            poll,
            ..defaults
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "SUSWORDS_BASE_URL",
            "SUSWORDS_REQUEST_TIMEOUT",
            "SUSWORDS_POLL_INTERVAL_MS",
            "SUSWORDS_DEGRADED_POLL_INTERVAL_MS",
            "SUSWORDS_MAX_POLL_FAILURES",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.poll.interval, Duration::from_secs(3));
        assert_eq!(config.poll.degraded_interval, Duration::from_secs(10));
        assert_eq!(config.poll.max_failures, 5);
        assert_eq!(config.vote.countdown, Duration::from_secs(30));
        assert_eq!(config.vote.processing, Duration::from_millis(1500));
        assert_eq!(config.identity_retry.max_attempts, 5);
        assert_eq!(config.clear_retry.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_from_env_without_vars_uses_defaults() {
        clear_env();
        assert_eq!(ClientConfig::from_env(), ClientConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("SUSWORDS_BASE_URL", " http://game.local:8080 ");
        std::env::set_var("SUSWORDS_POLL_INTERVAL_MS", "1500");
        std::env::set_var("SUSWORDS_MAX_POLL_FAILURES", "2");

        let config = ClientConfig::from_env();
        assert_eq!(config.base_url, "http://game.local:8080");
        assert_eq!(config.poll.interval, Duration::from_millis(1500));
        assert_eq!(config.poll.max_failures, 2);
        assert_eq!(config.poll.degraded_interval, Duration::from_secs(10));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_garbage() {
        clear_env();
        std::env::set_var("SUSWORDS_POLL_INTERVAL_MS", "soon");
        std::env::set_var("SUSWORDS_REQUEST_TIMEOUT", "-3");

        let config = ClientConfig::from_env();
        assert_eq!(config.poll.interval, Duration::from_secs(3));
        assert_eq!(config.request_timeout, Duration::from_secs(10));

        clear_env();
    }
}
