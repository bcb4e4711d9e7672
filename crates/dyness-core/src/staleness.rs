// ── Freshness tracking ──
//
// Communication status is derived lazily on read from the age of the last
// successful cycle; no timer flips it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommunicationStatus {
    /// No cycle has succeeded yet.
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone, Default)]
pub struct StalenessState {
    pub last_success: Option<Instant>,
    pub last_attempt: Option<Instant>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl StalenessState {
    pub fn record_attempt(&mut self, now: Instant, wall: DateTime<Utc>) {
        self.last_attempt = Some(now);
        self.last_attempt_at = Some(wall);
    }

    pub fn record_success(&mut self, now: Instant, wall: DateTime<Utc>) {
        self.last_success = Some(now);
        self.last_success_at = Some(wall);
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Online while the last success is no older than `window`.
    pub fn communication_status(&self, now: Instant, window: Duration) -> CommunicationStatus {
        match self.last_success {
            None => CommunicationStatus::Unknown,
            Some(at) if now.saturating_duration_since(at) <= window => CommunicationStatus::Online,
            Some(_) => CommunicationStatus::Offline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(900);

    #[test]
    fn unknown_until_first_success() {
        let state = StalenessState::default();
        assert_eq!(
            state.communication_status(Instant::now(), WINDOW),
            CommunicationStatus::Unknown
        );
    }

    #[test]
    fn offline_only_past_window() {
        let t0 = Instant::now();
        let mut state = StalenessState::default();
        state.record_success(t0, Utc::now());

        assert_eq!(state.communication_status(t0 + WINDOW, WINDOW), CommunicationStatus::Online);
        assert_eq!(
            state.communication_status(t0 + WINDOW + Duration::from_secs(1), WINDOW),
            CommunicationStatus::Offline
        );
    }

    #[test]
    fn success_resets_failures() {
        let mut state = StalenessState::default();
        state.record_failure();
        state.record_failure();
        assert_eq!(state.consecutive_failures, 2);
        state.record_success(Instant::now(), Utc::now());
        assert_eq!(state.consecutive_failures, 0);
    }
}
