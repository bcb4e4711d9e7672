// The seam between the acquisition layer and the wire.
//
// `dyness-core` is generic over this trait so the coordinator can run
// against the real HTTP client or an in-memory script.

use std::future::Future;

use crate::auth::{Credentials, SigningKey};
use crate::client::DynessClient;
use crate::error::Error;
use crate::models::{DeviceSerials, RawTelemetry, SessionGrant};

/// The two exchanges the acquisition layer needs from the remote API.
pub trait BmsApi: Send + Sync + 'static {
    /// Verify credentials and hand out signing material.
    fn authenticate(
        &self,
        credentials: &Credentials,
        serials: &DeviceSerials,
    ) -> impl Future<Output = Result<SessionGrant, Error>> + Send;

    /// Fetch one round of raw telemetry for the device pair.
    fn fetch_telemetry(
        &self,
        key: &SigningKey,
        serials: &DeviceSerials,
    ) -> impl Future<Output = Result<RawTelemetry, Error>> + Send;
}

impl BmsApi for DynessClient {
    fn authenticate(
        &self,
        credentials: &Credentials,
        serials: &DeviceSerials,
    ) -> impl Future<Output = Result<SessionGrant, Error>> + Send {
        DynessClient::authenticate(self, credentials, serials)
    }

    fn fetch_telemetry(
        &self,
        key: &SigningKey,
        serials: &DeviceSerials,
    ) -> impl Future<Output = Result<RawTelemetry, Error>> + Send {
        DynessClient::fetch_telemetry(self, key, serials)
    }
}
