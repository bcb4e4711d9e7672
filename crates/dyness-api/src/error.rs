use thiserror::Error;

/// Envelope code for a serial the account does not own.
pub const DEVICE_NOT_FOUND_CODE: &str = "10005";

/// Top-level error type for the `dyness-api` crate.
///
/// Covers every failure mode of a signed exchange with the open API:
/// credential rejection, rate limiting, HTTP and envelope errors,
/// transport failures, and payload decoding. `dyness-core` classifies
/// these into retryable and fatal categories.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Signature or credentials rejected (HTTP 401/403 or an auth envelope code).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The request signature could not be computed.
    #[error("Request signing failed: {0}")]
    Signing(String),

    // ── Rate limiting ───────────────────────────────────────────────
    /// HTTP 429. Includes retry-after in seconds (header value or the floor default).
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── HTTP / API ──────────────────────────────────────────────────
    /// Non-success HTTP status that is neither auth nor rate limiting.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The `{code, info, data}` envelope reported a failure code.
    #[error("Dyness API error (code {code}): {message}")]
    Api { code: String, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the server refused the credentials or signature.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if the service refused this identity or device pair:
    /// an auth rejection, a 4xx envelope code, or an unknown device.
    ///
    /// Other envelope codes (busy, internal) say nothing about the
    /// credentials.
    pub fn is_identity_refused(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Api { code, .. } => {
                code == DEVICE_NOT_FOUND_CODE
                    || code.parse::<u16>().is_ok_and(|c| (400..500).contains(&c))
            }
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Server-requested delay before the next request, if any.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => {
                Some(std::time::Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}
