// ── Core error types ──
//
// Acquisition-level errors. Consumers never see raw `reqwest` or JSON
// failures: the `From<dyness_api::Error>` impls translate wire errors
// into the auth / transport taxonomy the coordinator reasons about.

use serde::Serialize;
use thiserror::Error;

/// Whether a failure can heal on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureClass {
    /// Needs operator action (credentials, device serials, firmware schema).
    Fatal,
    /// Network, rate-limit, or expiry trouble that the next cycle may fix.
    Retryable,
}

// ── Authentication ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The service refused the credentials (or the device they point at).
    #[error("Credentials rejected: {message}")]
    Rejected { message: String },

    /// A session the service accepted earlier is no longer honoured.
    #[error("Session expired: {message}")]
    Expired { message: String },

    /// The authentication exchange never got a verdict.
    #[error("Network failure during authentication: {message}")]
    NetworkFailure { message: String },
}

impl From<dyness_api::Error> for AuthError {
    fn from(err: dyness_api::Error) -> Self {
        if !err.is_identity_refused() {
            return Self::NetworkFailure {
                message: err.to_string(),
            };
        }
        match err {
            dyness_api::Error::Authentication { message } => Self::Rejected { message },
            dyness_api::Error::Api { code, message } => Self::Rejected {
                message: format!("code {code}: {message}"),
            },
            other => Self::Rejected {
                message: other.to_string(),
            },
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("HTTP {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    /// Connection refused, DNS, TLS and similar pre-response failures.
    #[error("Connection failed: {message}")]
    Connection { message: String },

    /// The service answered with a failure code in its envelope.
    #[error("API error (code {code}): {message}")]
    ApiError { code: String, message: String },

    /// The signing key was refused mid-fetch.
    #[error("Session no longer accepted: {message}")]
    Unauthorized { message: String },
}

impl From<dyness_api::Error> for TransportError {
    fn from(err: dyness_api::Error) -> Self {
        match err {
            dyness_api::Error::Authentication { message } => Self::Unauthorized { message },
            dyness_api::Error::RateLimited { retry_after_secs } => {
                Self::RateLimited { retry_after_secs }
            }
            dyness_api::Error::Http { status, message } => Self::HttpError { status, message },
            dyness_api::Error::Api { code, message } => Self::ApiError { code, message },
            dyness_api::Error::Timeout { timeout_secs } => Self::Timeout { timeout_secs },
            dyness_api::Error::Transport(ref e) if e.is_timeout() => Self::Timeout { timeout_secs: 0 },
            dyness_api::Error::Transport(e) => match e.status() {
                Some(status) => Self::HttpError {
                    status: status.as_u16(),
                    message: e.to_string(),
                },
                None => Self::Connection {
                    message: e.to_string(),
                },
            },
            dyness_api::Error::Deserialization { message, .. } => {
                Self::MalformedResponse { message }
            }
            dyness_api::Error::Signing(message) | dyness_api::Error::Tls(message) => {
                Self::Connection { message }
            }
            dyness_api::Error::InvalidUrl(e) => Self::Connection {
                message: format!("Invalid URL: {e}"),
            },
        }
    }
}

// ── Normalization ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizationError {
    #[error("Required field missing or unparseable: {field}")]
    MissingField { field: String },

    #[error("Field {field} out of range: {value}")]
    OutOfRange { field: String, value: f64 },
}

// ── Cycle ────────────────────────────────────────────────────────────

/// Why one acquisition cycle produced no snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CycleError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error("Coordinator has been shut down")]
    ShutDown,
}

impl CycleError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Auth(AuthError::Rejected { .. })
            | Self::Normalization(_)
            | Self::Transport(TransportError::MalformedResponse { .. }) => FailureClass::Fatal,
            Self::Auth(_) | Self::Transport(_) | Self::ShutDown => FailureClass::Retryable,
        }
    }

    /// Credentials refused outright: surfaces `cannot_connect`, no backoff.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Auth(AuthError::Rejected { .. }))
    }

    /// Short machine-readable tag for diagnostics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(AuthError::Rejected { .. }) => "auth_rejected",
            Self::Auth(AuthError::Expired { .. }) => "auth_expired",
            Self::Auth(AuthError::NetworkFailure { .. }) => "auth_network_failure",
            Self::Transport(TransportError::RateLimited { .. }) => "rate_limited",
            Self::Transport(TransportError::HttpError { .. }) => "http_error",
            Self::Transport(TransportError::Timeout { .. }) => "timeout",
            Self::Transport(TransportError::MalformedResponse { .. }) => "malformed_response",
            Self::Transport(TransportError::Connection { .. }) => "connection_failed",
            Self::Transport(TransportError::ApiError { .. }) => "api_error",
            Self::Transport(TransportError::Unauthorized { .. }) => "unauthorized",
            Self::Normalization(NormalizationError::MissingField { .. }) => "missing_field",
            Self::Normalization(NormalizationError::OutOfRange { .. }) => "out_of_range",
            Self::ShutDown => "shut_down",
        }
    }
}

// ── Top-level ────────────────────────────────────────────────────────

/// Unified error type for the core crate's public entry points.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The initial refresh failed; the integration should not come up.
    #[error("Cannot connect to the Dyness API: {source}")]
    CannotConnect {
        #[source]
        source: CycleError,
    },

    #[error("Coordinator has been shut down")]
    ShutDown,

    #[error(transparent)]
    Api(#[from] dyness_api::Error),
}

impl From<CycleError> for CoreError {
    fn from(err: CycleError) -> Self {
        match err {
            CycleError::ShutDown => Self::ShutDown,
            source => Self::CannotConnect { source },
        }
    }
}

impl CoreError {
    /// The underlying cycle failure, if this error came from one.
    pub fn cycle_error(&self) -> Option<&CycleError> {
        match self {
            Self::CannotConnect { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_auth_error_maps_to_rejection_or_unauthorized() {
        let auth: AuthError = dyness_api::Error::Authentication {
            message: "sign error".into(),
        }
        .into();
        assert!(matches!(auth, AuthError::Rejected { .. }));

        let transport: TransportError = dyness_api::Error::Authentication {
            message: "sign error".into(),
        }
        .into();
        assert!(matches!(transport, TransportError::Unauthorized { .. }));
    }

    #[test]
    fn envelope_codes_during_auth() {
        let api = |code: &str| dyness_api::Error::Api {
            code: code.into(),
            message: "x".into(),
        };
        assert!(matches!(AuthError::from(api("10005")), AuthError::Rejected { .. }));
        assert!(matches!(AuthError::from(api("404")), AuthError::Rejected { .. }));
        assert!(matches!(AuthError::from(api("500")), AuthError::NetworkFailure { .. }));
        assert!(matches!(AuthError::from(api("system busy")), AuthError::NetworkFailure { .. }));

        let busy = CycleError::Auth(AuthError::from(api("503")));
        assert!(!busy.is_rejection());
        assert_eq!(busy.class(), FailureClass::Retryable);
    }

    #[test]
    fn api_timeout_during_auth_is_network_failure() {
        let auth: AuthError = dyness_api::Error::Timeout { timeout_secs: 20 }.into();
        assert!(matches!(auth, AuthError::NetworkFailure { .. }));
    }

    #[test]
    fn deserialization_is_malformed_and_fatal() {
        let transport: TransportError = dyness_api::Error::Deserialization {
            message: "expected value".into(),
            body: "<html>".into(),
        }
        .into();
        let err = CycleError::from(transport);
        assert_eq!(err.kind(), "malformed_response");
        assert_eq!(err.class(), FailureClass::Fatal);
    }

    #[test]
    fn classification() {
        let rejected = CycleError::Auth(AuthError::Rejected { message: String::new() });
        assert!(rejected.is_rejection());
        assert_eq!(rejected.class(), FailureClass::Fatal);

        let expired = CycleError::Auth(AuthError::Expired { message: String::new() });
        assert!(!expired.is_rejection());
        assert_eq!(expired.class(), FailureClass::Retryable);

        let limited = CycleError::Transport(TransportError::RateLimited { retry_after_secs: 60 });
        assert_eq!(limited.class(), FailureClass::Retryable);

        let missing = CycleError::Normalization(NormalizationError::MissingField {
            field: "soc".into(),
        });
        assert_eq!(missing.class(), FailureClass::Fatal);
    }

    #[test]
    fn shut_down_cycle_maps_to_core_shut_down() {
        assert!(matches!(CoreError::from(CycleError::ShutDown), CoreError::ShutDown));
        let err = CoreError::from(CycleError::Transport(TransportError::Timeout { timeout_secs: 20 }));
        assert!(err.cycle_error().is_some());
    }
}
