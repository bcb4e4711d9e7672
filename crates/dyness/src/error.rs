//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a distinct exit code per failure family.

use miette::Diagnostic;
use thiserror::Error;

use dyness_config::ConfigError;
use dyness_core::{AuthError, CoreError, CycleError, TransportError};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONFIG: i32 = 4;
    pub const DATA: i32 = 5;
    pub const RATE_LIMITED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const INTERRUPTED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the Dyness API")]
    #[diagnostic(
        code(dyness::connection_failed),
        help(
            "Check network access to the regional endpoint.\n\
             Try the other region with --region apac or --region global."
        )
    )]
    ConnectionFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("TLS setup failed: {message}")]
    #[diagnostic(
        code(dyness::tls_error),
        help("Check ca_cert in your profile, or use --insecure (-k) when testing through a proxy.")
    )]
    Tls { message: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(dyness::timeout),
        help("Increase timeout with --timeout or timeout_secs in your profile.")
    )]
    Timeout { seconds: u64 },

    #[error("Rate limited by the Dyness API (retry after {seconds}s)")]
    #[diagnostic(
        code(dyness::rate_limited),
        help("The API allows one request per minute. Wait and try again.")
    )]
    RateLimited { seconds: u64 },

    // ── Authentication ───────────────────────────────────────────────

    #[error("The Dyness API rejected the credentials for profile '{profile}'")]
    #[diagnostic(
        code(dyness::auth_failed),
        help(
            "Verify api_id, the API secret and the BMS serial in the developer portal.\n\
             Details: {message}\n\
             Re-run: dyness config init"
        )
    )]
    AuthFailed { profile: String, message: String },

    #[error("No API secret configured for profile '{profile}'")]
    #[diagnostic(
        code(dyness::no_credentials),
        help(
            "Store one with: dyness config init\n\
             Or set the DYNESS_API_SECRET environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Data ─────────────────────────────────────────────────────────

    #[error("The battery returned unusable data: {message}")]
    #[diagnostic(
        code(dyness::invalid_data),
        help(
            "The BMS serial may point at a different device type, or the\n\
             firmware reports fields this tool does not understand."
        )
    )]
    InvalidData { message: String },

    #[error("Dyness API error ({code}): {message}")]
    #[diagnostic(code(dyness::api_error))]
    ApiError { code: String, message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(dyness::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(dyness::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: dyness config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(dyness::no_config),
        help(
            "Create one with: dyness config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(dyness::config))]
    Config(ConfigError),

    // ── Lifecycle ────────────────────────────────────────────────────

    #[error("Interrupted")]
    #[diagnostic(code(dyness::interrupted))]
    Interrupted,

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(dyness::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Tls { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::RateLimited { .. } => exit_code::RATE_LIMITED,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::InvalidData { .. } => exit_code::DATA,
            Self::Validation { .. } => exit_code::USAGE,
            Self::ProfileNotFound { .. } | Self::NoConfig { .. } | Self::Config(_) => {
                exit_code::CONFIG
            }
            Self::Interrupted => exit_code::INTERRUPTED,
            Self::ApiError { .. } | Self::Io(_) | Self::Render(_) => exit_code::GENERAL,
        }
    }

    /// Attach the profile name to errors that carry one.
    pub fn for_profile(self, profile: &str) -> Self {
        match self {
            Self::AuthFailed { message, .. } => Self::AuthFailed {
                profile: profile.into(),
                message,
            },
            other => other,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::UnknownProfile { profile } => Self::ProfileNotFound {
                name: profile,
                available: String::new(),
            },
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config { message } => Self::Validation {
                field: "profile".into(),
                reason: message,
            },
            CoreError::CannotConnect { source } => source.into(),
            CoreError::ShutDown => Self::Interrupted,
            CoreError::Api(dyness_core::ApiError::Tls(message)) => Self::Tls { message },
            CoreError::Api(e) => Self::ConnectionFailed { source: e.into() },
        }
    }
}

impl From<CycleError> for CliError {
    fn from(err: CycleError) -> Self {
        match err {
            CycleError::Auth(AuthError::Rejected { message }) => Self::AuthFailed {
                profile: "current".into(),
                message,
            },
            CycleError::Transport(TransportError::Timeout { timeout_secs }) => Self::Timeout {
                seconds: timeout_secs,
            },
            CycleError::Transport(TransportError::RateLimited { retry_after_secs }) => {
                Self::RateLimited {
                    seconds: retry_after_secs,
                }
            }
            CycleError::Transport(TransportError::ApiError { code, message }) => {
                Self::ApiError { code, message }
            }
            CycleError::Transport(TransportError::MalformedResponse { message }) => {
                Self::InvalidData { message }
            }
            CycleError::Normalization(e) => Self::InvalidData {
                message: e.to_string(),
            },
            CycleError::ShutDown => Self::Interrupted,
            other => Self::ConnectionFailed {
                source: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use dyness_core::NormalizationError;

    use super::*;

    #[test]
    fn rejection_maps_to_auth_exit_code() {
        let err: CliError = CoreError::from(CycleError::Auth(AuthError::Rejected {
            message: "sign error".into(),
        }))
        .into();
        let err = err.for_profile("home");
        assert_eq!(err.exit_code(), exit_code::AUTH);
        assert!(matches!(err, CliError::AuthFailed { ref profile, .. } if profile == "home"));
    }

    #[test]
    fn cycle_failures_map_to_distinct_exit_codes() {
        let timeout: CliError =
            CycleError::Transport(TransportError::Timeout { timeout_secs: 20 }).into();
        assert_eq!(timeout.exit_code(), exit_code::TIMEOUT);

        let limited: CliError =
            CycleError::Transport(TransportError::RateLimited { retry_after_secs: 60 }).into();
        assert_eq!(limited.exit_code(), exit_code::RATE_LIMITED);

        let data: CliError = CycleError::Normalization(NormalizationError::MissingField {
            field: "soc".into(),
        })
        .into();
        assert_eq!(data.exit_code(), exit_code::DATA);

        let network: CliError = CycleError::Auth(AuthError::NetworkFailure {
            message: "dns".into(),
        })
        .into();
        assert_eq!(network.exit_code(), exit_code::CONNECTION);
    }

    #[test]
    fn config_errors_map_to_config_or_usage() {
        let missing: CliError = ConfigError::NoCredentials {
            profile: "home".into(),
        }
        .into();
        assert_eq!(missing.exit_code(), exit_code::AUTH);

        let invalid: CliError = ConfigError::Validation {
            field: "region".into(),
            reason: "bad".into(),
        }
        .into();
        assert_eq!(invalid.exit_code(), exit_code::USAGE);
    }
}
