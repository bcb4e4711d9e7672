// Operator-facing troubleshooting state. Contains no credentials.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{CycleError, FailureClass};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub class: FailureClass,
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(err: &CycleError, at: DateTime<Utc>) -> Self {
        Self {
            class: err.class(),
            kind: err.kind().to_owned(),
            message: err.to_string(),
            at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Credentials were refused on the most recent authentication.
    pub cannot_connect: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<ErrorRecord>,
    /// When the signing key in use was last verified by the service.
    pub session_issued_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_published_at: Option<DateTime<Utc>>,
    /// Device timestamp of the last snapshot dropped for going backwards.
    pub last_regressed_update: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub published: u64,
}
