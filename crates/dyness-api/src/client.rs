// Dyness open API HTTP client
//
// Wraps `reqwest::Client` with request signing, `{code, info, data}`
// envelope unwrapping, and status-code classification. Endpoint methods
// return unwrapped `data` payloads.

use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};
use url::Url;

use crate::auth::{CONTENT_TYPE, Credentials, Region, SigningKey};
use crate::error::Error;
use crate::models::{
    DeviceSerials, Envelope, FieldMap, Point, RawTelemetry, SessionGrant, latest_power_record,
    points_to_map,
};
use crate::ratelimit::DEFAULT_FLOOR;
use crate::transport::TransportConfig;

pub const STORAGE_DETAIL_PATH: &str = "/v1/device/household/storage/detail";
pub const LAST_POWER_PATH: &str = "/v1/device/getLastPowerDataBySn";
pub const REALTIME_DATA_PATH: &str = "/v1/device/realTime/data";

/// Envelope codes that mean the signature or credentials were refused.
const AUTH_CODES: [&str; 2] = ["401", "403"];

/// Raw HTTP client for the Dyness open API.
///
/// Stateless apart from the connection pool: the signing key is passed
/// per call, so one client can serve a fresh session after re-auth.
#[derive(Debug, Clone)]
pub struct DynessClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl DynessClient {
    /// Create a client for a regional deployment.
    pub fn new(region: Region, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url: region.url()?,
            timeout: transport.timeout,
        })
    }

    /// Create a client with a pre-built `reqwest::Client` and arbitrary base URL.
    ///
    /// Use this to point at a mock server or a proxy.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout: crate::transport::DEFAULT_TIMEOUT,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}{path}`; the base already carries the service prefix.
    pub(crate) fn endpoint_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Storage detail for a device: model, station, firmware, update time.
    pub async fn storage_detail(&self, key: &SigningKey, device_sn: &str) -> Result<FieldMap, Error> {
        let data: Option<FieldMap> = self
            .post(key, STORAGE_DETAIL_PATH, &json!({ "deviceSn": device_sn }))
            .await?;
        Ok(data.unwrap_or_default())
    }

    /// Latest usable power record (empty map if none carries power).
    pub async fn last_power_data(&self, key: &SigningKey, device_sn: &str) -> Result<FieldMap, Error> {
        let data: Option<Vec<FieldMap>> = self
            .post(key, LAST_POWER_PATH, &json!({ "deviceSn": device_sn }))
            .await?;
        Ok(latest_power_record(data.unwrap_or_default()))
    }

    /// Real-time points for a BMS or dongle, keyed by point id.
    pub async fn realtime_points(&self, key: &SigningKey, device_sn: &str) -> Result<FieldMap, Error> {
        let data: Option<Vec<Point>> = self
            .post(key, REALTIME_DATA_PATH, &json!({ "deviceSn": device_sn }))
            .await?;
        Ok(points_to_map(data.unwrap_or_default()))
    }

    /// Verify credentials with a signed storage-detail probe.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        serials: &DeviceSerials,
    ) -> Result<SessionGrant, Error> {
        let key = SigningKey::from_credentials(credentials);
        debug!(api_id = key.api_id(), device = %serials.bms, "verifying credentials");
        let device = self.storage_detail(&key, &serials.bms).await?;
        debug!("credentials accepted");
        Ok(SessionGrant { key, device })
    }

    /// One logical telemetry fetch: detail, power, BMS points, dongle points.
    ///
    /// A dongle failure only costs the signal-strength reading, so it is
    /// logged and tolerated. Auth and rate-limit errors always propagate.
    pub async fn fetch_telemetry(
        &self,
        key: &SigningKey,
        serials: &DeviceSerials,
    ) -> Result<RawTelemetry, Error> {
        let device = self.storage_detail(key, &serials.bms).await?;
        let power = self.last_power_data(key, &serials.bms).await?;
        let bms = self.realtime_points(key, &serials.bms).await?;
        let dongle = match self.realtime_points(key, &serials.dongle).await {
            Ok(points) => points,
            Err(e) if e.is_auth_rejected() || matches!(e, Error::RateLimited { .. }) => {
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, dongle = %serials.dongle, "dongle data unavailable");
                FieldMap::new()
            }
        };

        Ok(RawTelemetry {
            device,
            power,
            bms,
            dongle,
        })
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Sign and send a POST with a compact JSON body, then unwrap the envelope.
    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        key: &SigningKey,
        path: &str,
        body: &Value,
    ) -> Result<Option<T>, Error> {
        let url = self.endpoint_url(path)?;
        let body_str = serde_json::to_string(body).map_err(|e| Error::Deserialization {
            message: format!("failed to encode request body: {e}"),
            body: String::new(),
        })?;
        let signed = key.sign(path, &body_str, Utc::now())?;

        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("Content-MD5", signed.content_md5)
            .header(reqwest::header::DATE, signed.date)
            .header(reqwest::header::AUTHORIZATION, signed.authorization)
            .body(body_str)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.parse_envelope(path, resp).await
    }

    fn map_send_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            Error::Transport(err)
        }
    }

    /// Classify the HTTP status, then parse `{code, info, data}`.
    async fn parse_envelope<T: DeserializeOwned>(
        &self,
        path: &str,
        resp: reqwest::Response,
    ) -> Result<Option<T>, Error> {
        let status = resp.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_FLOOR.as_secs());
            return Err(Error::RateLimited { retry_after_secs });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("{path} rejected (HTTP {status}): {}", preview(&body)),
            });
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                message: preview(&body).to_owned(),
            });
        }

        let body = resp.text().await.map_err(|e| self.map_send_error(e))?;
        trace!(path, bytes = body.len(), "response body received");

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body: body.clone(),
        })?;

        if envelope.is_success() {
            return Ok(envelope.data);
        }

        let code = envelope.code_str();
        let message = envelope
            .info
            .clone()
            .unwrap_or_else(|| format!("code={code}"));
        if AUTH_CODES.contains(&code.as_str()) {
            return Err(Error::Authentication {
                message: format!("{path} -> code={code} | {message}"),
            });
        }
        if code == "429" {
            return Err(Error::RateLimited {
                retry_after_secs: DEFAULT_FLOOR.as_secs(),
            });
        }
        Err(Error::Api { code, message })
    }
}

/// First 200 bytes of a body for error messages, cut on a char boundary.
fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
