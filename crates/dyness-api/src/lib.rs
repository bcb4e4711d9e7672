//! Async client for the Dyness battery open API.
//!
//! - [`DynessClient`] signs every request (Content-MD5 + HMAC-SHA1),
//!   unwraps the `{code, info, data}` envelope, and exposes the
//!   storage-detail, power, and real-time point endpoints.
//! - [`RateLimiter`] enforces the server's one-request-per-minute floor
//!   and keeps a single exchange in flight.
//! - [`BmsApi`] is the seam `dyness-core` drives, implemented by the client.

pub mod api;
pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod ratelimit;
pub mod transport;

pub use api::BmsApi;
pub use auth::{Credentials, Region, SignedHeaders, SigningKey};
pub use client::DynessClient;
pub use error::Error;
pub use models::{DeviceSerials, FieldMap, RawTelemetry, SessionGrant};
pub use ratelimit::{Permit, RateLimiter};
pub use transport::{TlsMode, TransportConfig};
