// ── Runtime coordinator configuration ──
//
// Describes *what* to poll and *how often*. Carries credentials but never
// touches disk; `dyness-config` builds one from a TOML profile.

use std::time::Duration;

use dyness_api::{Credentials, DeviceSerials, Region, TlsMode};
use secrecy::ExposeSecret;

use crate::error::CoreError;

/// Recommended cadence from the API operator.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);
/// Staleness window as a multiple of the poll interval.
pub const DEFAULT_STALENESS_FACTOR: u32 = 3;
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_SESSION_MARGIN: Duration = Duration::from_secs(60);

/// Configuration for one coordinator (one BMS + dongle pair).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub credentials: Credentials,
    pub serials: DeviceSerials,
    pub region: Region,
    pub tls: TlsMode,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Normal tick interval.
    pub poll_interval: Duration,
    /// Age past which the last snapshot no longer counts as live.
    pub staleness_window: Duration,
    /// Ceiling for failure backoff.
    pub max_backoff: Duration,
    /// Minimum spacing between requests to the API.
    pub request_floor: Duration,
    /// How long an authenticated session is trusted.
    pub session_lifetime: Duration,
    /// Refresh a session this long before it expires.
    pub session_margin: Duration,
}

impl CoordinatorConfig {
    /// Defaults from the API's published limits: 5 min cadence, 1 req/min floor.
    pub fn new(credentials: Credentials, serials: DeviceSerials) -> Self {
        Self {
            credentials,
            serials,
            region: Region::default(),
            tls: TlsMode::default(),
            timeout: dyness_api::transport::DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            staleness_window: DEFAULT_POLL_INTERVAL * DEFAULT_STALENESS_FACTOR,
            max_backoff: DEFAULT_MAX_BACKOFF,
            request_floor: dyness_api::ratelimit::DEFAULT_FLOOR,
            session_lifetime: DEFAULT_SESSION_LIFETIME,
            session_margin: DEFAULT_SESSION_MARGIN,
        }
    }

    /// Set the poll interval and rescale the staleness window to match.
    pub fn with_poll_interval(mut self, interval: Duration, staleness_factor: u32) -> Self {
        self.poll_interval = interval;
        self.with_staleness_factor(staleness_factor)
    }

    /// Staleness window as a multiple of [`Self::effective_cadence`].
    pub fn with_staleness_factor(mut self, staleness_factor: u32) -> Self {
        self.staleness_window = self
            .effective_cadence()
            .saturating_mul(staleness_factor.max(1));
        self
    }

    /// Shortest achievable spacing between successful publishes.
    ///
    /// A cycle that re-authenticates spends one floor on the probe and one
    /// on the fetch, so publishes can never come faster than two floors
    /// apart whatever the poll interval says.
    pub fn effective_cadence(&self) -> Duration {
        self.poll_interval.max(self.request_floor.saturating_mul(2))
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    /// Delay before the next cycle after `failures` consecutive failures.
    ///
    /// Doubles from the poll interval and never drops below it or exceeds
    /// the backoff ceiling.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.poll_interval;
        }
        let exponent = failures.saturating_sub(1).min(16);
        let ceiling = self.max_backoff.max(self.poll_interval);
        self.poll_interval
            .saturating_mul(1_u32 << exponent)
            .clamp(self.poll_interval, ceiling)
    }

    /// Reject configurations that can never produce a healthy cycle.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |message: &str| {
            Err(CoreError::Config {
                message: message.to_owned(),
            })
        };

        if self.credentials.api_id.trim().is_empty() {
            return invalid("api_id must not be empty");
        }
        if self.credentials.api_secret.expose_secret().is_empty() {
            return invalid("api_secret must not be empty");
        }
        if self.serials.bms.trim().is_empty() {
            return invalid("device (BMS) serial must not be empty");
        }
        if self.serials.dongle.trim().is_empty() {
            return invalid("dongle serial must not be empty");
        }
        if self.poll_interval.is_zero() {
            return invalid("poll interval must be greater than zero");
        }
        if self.staleness_window < self.effective_cadence() {
            return invalid(
                "staleness window must cover one poll interval and two request floors",
            );
        }
        if self.session_lifetime <= self.session_margin {
            return invalid("session lifetime must exceed the refresh margin");
        }
        if self.session_margin < self.request_floor {
            return invalid("session refresh margin must cover the request floor");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn config() -> CoordinatorConfig {
        CoordinatorConfig::new(
            Credentials::new("id", SecretString::from("secret".to_string())),
            DeviceSerials::new("BMS", "DONGLE"),
        )
    }

    #[test]
    fn defaults_follow_published_limits() {
        let c = config();
        assert_eq!(c.poll_interval, Duration::from_secs(300));
        assert_eq!(c.staleness_window, Duration::from_secs(900));
        assert_eq!(c.request_floor, Duration::from_secs(60));
        c.validate().unwrap();
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let c = config();
        assert_eq!(c.backoff_delay(0), Duration::from_secs(300));
        assert_eq!(c.backoff_delay(1), Duration::from_secs(300));
        assert_eq!(c.backoff_delay(2), Duration::from_secs(600));
        assert_eq!(c.backoff_delay(3), Duration::from_secs(1200));
        assert_eq!(c.backoff_delay(4), Duration::from_secs(1800));
        assert_eq!(c.backoff_delay(50), Duration::from_secs(1800));
    }

    #[test]
    fn backoff_never_faster_than_cadence() {
        let mut c = config();
        c.max_backoff = Duration::from_secs(10);
        assert_eq!(c.backoff_delay(3), c.poll_interval);
    }

    #[test]
    fn rescaling_poll_interval_moves_staleness_window() {
        let c = config().with_poll_interval(Duration::from_secs(120), 4);
        assert_eq!(c.staleness_window, Duration::from_secs(480));
    }

    #[test]
    fn fast_poll_interval_window_follows_floor() {
        let c = config().with_poll_interval(Duration::from_secs(10), 3);
        assert_eq!(c.effective_cadence(), Duration::from_secs(120));
        assert_eq!(c.staleness_window, Duration::from_secs(360));
        c.validate().unwrap();
    }

    #[test]
    fn validate_rejects_window_shorter_than_two_floors() {
        let mut c = config().with_poll_interval(Duration::from_secs(10), 3);
        c.staleness_window = Duration::from_secs(90);
        assert!(matches!(c.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn validate_rejects_empty_serials() {
        let mut c = config();
        c.serials.dongle = "  ".into();
        assert!(matches!(c.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn validate_rejects_short_margin() {
        let mut c = config();
        c.session_margin = Duration::from_secs(10);
        assert!(c.validate().is_err());
    }
}
