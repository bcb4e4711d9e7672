//! Acquisition coordinator for Dyness batteries.
//!
//! Sits between [`dyness_api`] and consumers that want typed, fresh
//! battery metrics:
//!
//! - [`Coordinator`] drives authenticate → fetch → normalize → publish on
//!   a timer with backoff, and exposes the latest [`Snapshot`], its
//!   [`CommunicationStatus`], diagnostics, and a subscription stream.
//! - [`Authenticator`] caches a [`Session`] and refreshes it before expiry.
//! - [`RateLimitedTransport`] keeps every request behind one floor.
//! - [`normalize()`] maps raw telemetry to a validated [`Snapshot`].

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod normalize;
pub mod snapshot;
pub mod staleness;
pub mod stream;
pub mod transport;

pub use auth::{Authenticator, Session};
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CyclePhase, Reading};
pub use device::DeviceInfo;
pub use diagnostics::{Diagnostics, ErrorRecord};
pub use error::{AuthError, CoreError, CycleError, FailureClass, NormalizationError, TransportError};
pub use normalize::normalize;
pub use snapshot::{AlarmStatus, BatteryStatus, MetricValue, SensorKey, Snapshot};
pub use staleness::{CommunicationStatus, StalenessState};
pub use stream::{SnapshotBroadcastStream, SnapshotStream};
pub use transport::RateLimitedTransport;

// Re-exported so consumers need only this crate for configuration.
pub use dyness_api::{Credentials, DeviceSerials, Error as ApiError, Region, TlsMode};
