// Request signing for the Dyness open API.
//
// The API has no bearer tokens: every request carries a Content-MD5,
// an RFC 1123 Date, and an HMAC-SHA1 signature over both plus the path.
// The secret lives inside `SigningKey` and never leaves it.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;
use url::Url;

use crate::error::Error;

type HmacSha1 = Hmac<Sha1>;

/// Content type that is both sent and signed.
pub(crate) const CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Content type as it appears in the string-to-sign.
const SIGNED_CONTENT_TYPE: &str = "application/json";

/// Which regional deployment of the open API to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Region {
    /// Global / Europe (`open-api.dyness.com`).
    #[default]
    Global,
    /// Asia-Pacific (`apacopenapi.dyness.com`).
    Apac,
}

impl Region {
    /// Base URL including the `ems-device` service prefix.
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Global => "https://open-api.dyness.com/openapi/ems-device",
            Self::Apac => "https://apacopenapi.dyness.com/openapi/ems-device",
        }
    }

    /// Parsed form of [`base_url`](Self::base_url).
    pub fn url(self) -> Result<Url, Error> {
        Ok(Url::parse(self.base_url())?)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Apac => "apac",
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" | "eu" | "europe" => Ok(Self::Global),
            "apac" | "asia" => Ok(Self::Apac),
            other => Err(format!("expected 'global' or 'apac', got '{other}'")),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API credentials issued in the Dyness developer portal.
#[derive(Clone)]
pub struct Credentials {
    pub api_id: String,
    pub api_secret: SecretString,
}

impl Credentials {
    pub fn new(api_id: impl Into<String>, api_secret: SecretString) -> Self {
        Self {
            api_id: api_id.into(),
            api_secret,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_id", &self.api_id)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Opaque signing material bound to one API identity.
///
/// Handed out by a successful authentication and carried by a session.
/// It can sign requests but never reveals the secret.
#[derive(Clone)]
pub struct SigningKey {
    api_id: String,
    secret: SecretString,
}

impl SigningKey {
    /// Derive a key from credentials. Only authentication flows should call this.
    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self {
            api_id: credentials.api_id.clone(),
            secret: credentials.api_secret.clone(),
        }
    }

    pub fn api_id(&self) -> &str {
        &self.api_id
    }

    /// Compute the signed header set for a `POST {path}` with `body`.
    pub fn sign(&self, path: &str, body: &str, now: DateTime<Utc>) -> Result<SignedHeaders, Error> {
        let content_md5 = content_md5(body);
        let date = http_date(now);
        let string_to_sign = format!("POST\n{content_md5}\n{SIGNED_CONTENT_TYPE}\n{date}\n{path}");

        let mut mac = HmacSha1::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| Error::Signing(e.to_string()))?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(SignedHeaders {
            content_md5,
            date,
            authorization: format!("API {}:{signature}", self.api_id),
        })
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("api_id", &self.api_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Header values produced by [`SigningKey::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub content_md5: String,
    pub date: String,
    pub authorization: String,
}

/// Base64 of the MD5 digest of the body.
pub fn content_md5(body: &str) -> String {
    STANDARD.encode(Md5::digest(body.as_bytes()))
}

/// RFC 1123 date in GMT, as the signature expects it.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
