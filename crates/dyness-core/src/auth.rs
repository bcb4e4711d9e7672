// ── Session management ──
//
// The open API signs every request instead of issuing bearer tokens, so a
// "session" is signing material the service has verified recently. It is
// trusted for a fixed lifetime and refreshed a margin before that runs out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dyness_api::{BmsApi, Credentials, DeviceSerials, FieldMap, SigningKey};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::transport::RateLimitedTransport;

/// A verified signing key plus its validity window.
#[derive(Debug, Clone)]
pub struct Session {
    token: SigningKey,
    issued_at: Instant,
    expires_at: Instant,
    issued_wall: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(token: SigningKey, issued_at: Instant, lifetime: Duration) -> Self {
        Self {
            token,
            issued_at,
            expires_at: issued_at + lifetime,
            issued_wall: Utc::now(),
        }
    }

    pub fn token(&self) -> &SigningKey {
        &self.token
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Wall-clock issue time, for diagnostics.
    pub fn issued_wall(&self) -> DateTime<Utc> {
        self.issued_wall
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Usable without refresh: more than `margin` left before expiry.
    pub fn is_fresh_at(&self, now: Instant, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

/// Owns credentials and the cached session. At most one session is live.
pub struct Authenticator<A> {
    transport: Arc<RateLimitedTransport<A>>,
    credentials: Credentials,
    serials: DeviceSerials,
    lifetime: Duration,
    margin: Duration,
    session: Option<Session>,
    device_detail: Option<FieldMap>,
}

impl<A: BmsApi> Authenticator<A> {
    pub fn new(
        transport: Arc<RateLimitedTransport<A>>,
        credentials: Credentials,
        serials: DeviceSerials,
        lifetime: Duration,
        margin: Duration,
    ) -> Self {
        Self {
            transport,
            credentials,
            serials,
            lifetime,
            margin,
            session: None,
            device_detail: None,
        }
    }

    /// Cached session if it is comfortably inside its lifetime, otherwise
    /// a fresh one from the service.
    pub async fn obtain_valid_session(&mut self) -> Result<Session, AuthError> {
        if let Some(session) = &self.session {
            if session.is_fresh_at(Instant::now(), self.margin) {
                return Ok(session.clone());
            }
            debug!("session near expiry, refreshing");
        }
        self.session = None;

        let grant = match self.transport.authenticate(&self.credentials, &self.serials).await {
            Ok(grant) => grant,
            Err(e) => {
                let err = AuthError::from(e);
                warn!(error = %err, "authentication failed");
                return Err(err);
            }
        };

        let session = Session::new(grant.key, Instant::now(), self.lifetime);
        info!(api_id = session.token().api_id(), "authenticated");
        self.device_detail = Some(grant.device);
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Drop the cached session so the next call re-authenticates.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            debug!("session invalidated");
        }
    }

    pub fn current(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Device detail returned by the most recent authentication, once.
    pub fn take_device_detail(&mut self) -> Option<FieldMap> {
        self.device_detail.take()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::future::Future;
    use std::sync::atomic::{AtomicU32, Ordering};

    use dyness_api::{RawTelemetry, SessionGrant};
    use secrecy::SecretString;

    use super::*;

    #[derive(Default)]
    struct CountingApi {
        auths: AtomicU32,
        reject: bool,
    }

    impl BmsApi for CountingApi {
        fn authenticate(
            &self,
            credentials: &Credentials,
            _serials: &DeviceSerials,
        ) -> impl Future<Output = Result<SessionGrant, dyness_api::Error>> + Send {
            self.auths.fetch_add(1, Ordering::SeqCst);
            let result = if self.reject {
                Err(dyness_api::Error::Authentication {
                    message: "bad signature".into(),
                })
            } else {
                Ok(SessionGrant {
                    key: SigningKey::from_credentials(credentials),
                    device: FieldMap::new(),
                })
            };
            async move { result }
        }

        fn fetch_telemetry(
            &self,
            _key: &SigningKey,
            _serials: &DeviceSerials,
        ) -> impl Future<Output = Result<RawTelemetry, dyness_api::Error>> + Send {
            async { Ok(RawTelemetry::default()) }
        }
    }

    fn authenticator(api: Arc<CountingApi>) -> Authenticator<CountingApi> {
        let transport = Arc::new(RateLimitedTransport::new(api, Duration::from_secs(60)));
        Authenticator::new(
            transport,
            Credentials::new("id", SecretString::from("secret".to_string())),
            DeviceSerials::new("BMS", "DONGLE"),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn reuses_fresh_session() {
        let api = Arc::new(CountingApi::default());
        let mut auth = authenticator(Arc::clone(&api));

        let first = auth.obtain_valid_session().await.unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        let second = auth.obtain_valid_session().await.unwrap();

        assert_eq!(api.auths.load(Ordering::SeqCst), 1);
        assert_eq!(first.issued_at(), second.issued_at());
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_inside_margin() {
        let api = Arc::new(CountingApi::default());
        let mut auth = authenticator(Arc::clone(&api));

        auth.obtain_valid_session().await.unwrap();
        tokio::time::advance(Duration::from_secs(3600 - 30)).await;
        let session = auth.obtain_valid_session().await.unwrap();

        assert_eq!(api.auths.load(Ordering::SeqCst), 2);
        assert!(session.is_fresh_at(Instant::now(), Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_reauth() {
        let api = Arc::new(CountingApi::default());
        let mut auth = authenticator(Arc::clone(&api));

        auth.obtain_valid_session().await.unwrap();
        auth.invalidate();
        assert!(auth.current().is_none());
        auth.obtain_valid_session().await.unwrap();

        assert_eq!(api.auths.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_leaves_no_session() {
        let api = Arc::new(CountingApi {
            reject: true,
            ..CountingApi::default()
        });
        let mut auth = authenticator(api);

        let err = auth.obtain_valid_session().await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected { .. }));
        assert!(auth.current().is_none());
    }

    #[test]
    fn session_window() {
        let key = SigningKey::from_credentials(&Credentials::new(
            "id",
            SecretString::from("secret".to_string()),
        ));
        let t0 = Instant::now();
        let session = Session::new(key, t0, Duration::from_secs(100));
        assert!(session.is_fresh_at(t0, Duration::from_secs(60)));
        assert!(!session.is_fresh_at(t0 + Duration::from_secs(50), Duration::from_secs(60)));
        assert!(!session.is_expired_at(t0 + Duration::from_secs(99)));
        assert!(session.is_expired_at(t0 + Duration::from_secs(100)));
    }
}
