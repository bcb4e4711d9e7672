// ── Rate-limited transport ──
//
// Every exchange with the remote service, authentication probes included,
// passes through one `RateLimiter`. A 429 stretches the floor to the
// server's retry-after before the permit is released.

use std::sync::Arc;
use std::time::Duration;

use dyness_api::{BmsApi, Credentials, DeviceSerials, RateLimiter, RawTelemetry, SessionGrant};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::auth::Session;
use crate::error::TransportError;

/// The only path to the remote API. Shared by the authenticator and the
/// fetch step so both count against the same floor.
pub struct RateLimitedTransport<A> {
    api: Arc<A>,
    limiter: RateLimiter,
}

impl<A: BmsApi> RateLimitedTransport<A> {
    pub fn new(api: Arc<A>, floor: Duration) -> Self {
        Self {
            api,
            limiter: RateLimiter::new(floor),
        }
    }

    pub fn floor(&self) -> Duration {
        self.limiter.floor()
    }

    /// Authentication probe, gated like any other exchange.
    pub(crate) async fn authenticate(
        &self,
        credentials: &Credentials,
        serials: &DeviceSerials,
    ) -> Result<SessionGrant, dyness_api::Error> {
        let mut permit = self.limiter.acquire().await;
        let result = self.api.authenticate(credentials, serials).await;
        if let Err(ref e) = result {
            if let Some(retry_after) = e.retry_after() {
                warn!(retry_after_secs = retry_after.as_secs(), "rate limited during authentication");
                permit.defer(retry_after);
            }
        }
        result
    }

    /// One logical telemetry fetch for the device pair.
    ///
    /// The session is checked again once the floor has been honoured, so a
    /// key never goes out after its expiry even if the wait was long.
    pub async fn fetch_telemetry(
        &self,
        session: &Session,
        serials: &DeviceSerials,
    ) -> Result<RawTelemetry, TransportError> {
        let mut permit = self.limiter.acquire().await;

        if session.is_expired_at(Instant::now()) {
            permit.release_unused();
            return Err(TransportError::Unauthorized {
                message: "session expired while waiting for the request floor".into(),
            });
        }

        debug!(bms = %serials.bms, dongle = %serials.dongle, "fetching telemetry");
        match self.api.fetch_telemetry(session.token(), serials).await {
            Ok(raw) => Ok(raw),
            Err(e) => {
                if let Some(retry_after) = e.retry_after() {
                    warn!(retry_after_secs = retry_after.as_secs(), "rate limited during fetch");
                    permit.defer(retry_after);
                }
                Err(e.into())
            }
        }
    }
}
