//! Shared configuration for Dyness tools.
//!
//! TOML profiles, secret resolution (env + keyring + plaintext), and
//! translation to `dyness_core::CoordinatorConfig`. The core crate never
//! reads files; it receives a pre-built config.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use dyness_core::{CoordinatorConfig, CoreError, Credentials, DeviceSerials, Region, TlsMode};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Keyring service name; entries are keyed `{profile}/api-secret`.
pub const KEYRING_SERVICE: &str = "dyness";

/// Fallback variable consulted when a profile names no secret variable.
pub const SECRET_ENV: &str = "DYNESS_API_SECRET";

const ENV_PREFIX: &str = "DYNESS_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no API secret configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named battery profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Name of the profile to use: explicit choice, then `default_profile`.
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles.get(name).ok_or_else(|| ConfigError::UnknownProfile {
            profile: name.into(),
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

/// One BMS + dongle pair and the credentials to reach it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// API identifier from the Dyness developer portal.
    pub api_id: String,

    /// API secret (plaintext -- prefer keyring or env var).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,

    /// Environment variable holding the API secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret_env: Option<String>,

    /// BMS serial.
    pub device_serial: String,

    /// Dongle (data logger) serial.
    pub dongle_serial: String,

    /// "global" or "apac".
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,

    /// Staleness window as a multiple of the poll interval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staleness_factor: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backoff_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Path to a custom CA certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Skip TLS verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
}

fn default_region() -> String {
    "global".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "dyness", "dyness").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("dyness");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load defaults, then the file at `path`, then `DYNESS_`-prefixed env.
///
/// Nested keys use a double underscore:
/// `DYNESS_PROFILES__HOME__POLL_INTERVAL_SECS=120`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load the full Config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config, returning a default if the file doesn't exist or is unreadable.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

// ── Secret resolution ───────────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/api-secret"))
}

/// Store a profile's API secret in the OS keyring.
pub fn store_secret(profile_name: &str, secret: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(secret)?;
    Ok(())
}

fn keyring_lookup(profile_name: &str) -> Option<String> {
    match keyring_entry(profile_name).and_then(|entry| entry.get_password()) {
        Ok(secret) => Some(secret),
        Err(e) => {
            debug!(profile = profile_name, error = %e, "no keyring secret");
            None
        }
    }
}

/// Resolve the API secret: named env var, `DYNESS_API_SECRET`, keyring, plaintext.
pub fn resolve_api_secret(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_api_secret_with(
        profile,
        profile_name,
        |name| std::env::var(name).ok(),
        keyring_lookup,
    )
}

/// [`resolve_api_secret`] with injectable lookups.
pub fn resolve_api_secret_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    let non_empty = |v: String| (!v.is_empty()).then_some(v);

    if let Some(secret) = profile.api_secret_env.as_deref().and_then(&env).and_then(non_empty) {
        return Ok(SecretString::from(secret));
    }
    if let Some(secret) = env(SECRET_ENV).and_then(non_empty) {
        return Ok(SecretString::from(secret));
    }
    if let Some(secret) = keyring(profile_name).and_then(non_empty) {
        return Ok(SecretString::from(secret));
    }
    if let Some(secret) = profile.api_secret.clone().and_then(non_empty) {
        return Ok(SecretString::from(secret));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Translation ─────────────────────────────────────────────────────

/// Check everything that can be checked without a network call.
pub fn validate_profile(profile: &Profile) -> Result<Region, ConfigError> {
    if profile.api_id.trim().is_empty() {
        return Err(ConfigError::invalid("api_id", "must not be empty"));
    }
    if profile.device_serial.trim().is_empty() {
        return Err(ConfigError::invalid("device_serial", "must not be empty"));
    }
    if profile.dongle_serial.trim().is_empty() {
        return Err(ConfigError::invalid("dongle_serial", "must not be empty"));
    }
    if profile.poll_interval_secs == Some(0) {
        return Err(ConfigError::invalid("poll_interval_secs", "must be greater than zero"));
    }
    if profile.staleness_factor == Some(0) {
        return Err(ConfigError::invalid("staleness_factor", "must be at least 1"));
    }
    if profile.timeout_secs == Some(0) {
        return Err(ConfigError::invalid("timeout_secs", "must be greater than zero"));
    }
    profile
        .region
        .parse::<Region>()
        .map_err(|reason| ConfigError::invalid("region", reason))
}

/// Build a `CoordinatorConfig` from a profile and an already-resolved secret.
pub fn build_coordinator_config(
    profile: &Profile,
    secret: SecretString,
) -> Result<CoordinatorConfig, ConfigError> {
    let region = validate_profile(profile)?;

    let credentials = Credentials::new(profile.api_id.trim(), secret);
    let serials = DeviceSerials::new(profile.device_serial.trim(), profile.dongle_serial.trim());
    let mut config = CoordinatorConfig::new(credentials, serials).with_region(region);

    if let Some(secs) = profile.poll_interval_secs {
        let factor = profile
            .staleness_factor
            .unwrap_or(dyness_core::config::DEFAULT_STALENESS_FACTOR);
        config = config.with_poll_interval(Duration::from_secs(secs), factor);
    } else if let Some(factor) = profile.staleness_factor {
        config = config.with_staleness_factor(factor);
    }
    if let Some(secs) = profile.max_backoff_secs {
        config.max_backoff = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    config.tls = if profile.insecure.unwrap_or(false) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    config.validate().map_err(|e| match e {
        CoreError::Config { message } => ConfigError::invalid("profile", message),
        other => ConfigError::invalid("profile", other.to_string()),
    })?;
    Ok(config)
}

/// Resolve the secret and build a `CoordinatorConfig` for a named profile.
pub fn profile_to_coordinator_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<CoordinatorConfig, ConfigError> {
    validate_profile(profile)?;
    let secret = resolve_api_secret(profile, profile_name)?;
    build_coordinator_config(profile, secret)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn profile() -> Profile {
        Profile {
            api_id: "api-id".into(),
            api_secret: Some("plain".into()),
            device_serial: "BMS-001".into(),
            dongle_serial: "DONGLE-001".into(),
            region: "global".into(),
            ..Profile::default()
        }
    }

    fn resolve(
        profile: &Profile,
        env: &[(&str, &str)],
        keyring: Option<&str>,
    ) -> Result<SecretString, ConfigError> {
        resolve_api_secret_with(
            profile,
            "home",
            |name| env.iter().find(|(k, _)| *k == name).map(|(_, v)| (*v).to_owned()),
            |_| keyring.map(str::to_owned),
        )
    }

    #[test]
    fn secret_resolution_order() {
        let mut p = profile();
        p.api_secret_env = Some("HOME_SECRET".into());

        let all = [("HOME_SECRET", "named"), (SECRET_ENV, "generic")];
        assert_eq!(resolve(&p, &all, Some("ring")).unwrap().expose_secret(), "named");
        assert_eq!(
            resolve(&p, &[(SECRET_ENV, "generic")], Some("ring")).unwrap().expose_secret(),
            "generic"
        );
        assert_eq!(resolve(&p, &[], Some("ring")).unwrap().expose_secret(), "ring");
        assert_eq!(resolve(&p, &[], None).unwrap().expose_secret(), "plain");

        p.api_secret = None;
        assert!(matches!(resolve(&p, &[], None), Err(ConfigError::NoCredentials { .. })));
    }

    #[test]
    fn empty_env_value_falls_through() {
        let p = profile();
        assert_eq!(resolve(&p, &[(SECRET_ENV, "")], None).unwrap().expose_secret(), "plain");
    }

    #[test]
    fn builds_coordinator_config() {
        let mut p = profile();
        p.region = "apac".into();
        p.poll_interval_secs = Some(120);
        p.staleness_factor = Some(4);
        p.timeout_secs = Some(10);

        let config = build_coordinator_config(&p, SecretString::from("s".to_string())).unwrap();
        assert_eq!(config.region, Region::Apac);
        assert_eq!(config.poll_interval, Duration::from_secs(120));
        assert_eq!(config.staleness_window, Duration::from_secs(480));
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.serials, DeviceSerials::new("BMS-001", "DONGLE-001"));
        assert_eq!(config.tls, TlsMode::System);
    }

    #[test]
    fn fast_poll_interval_keeps_window_above_request_floor() {
        let mut p = profile();
        p.poll_interval_secs = Some(10);
        let config = build_coordinator_config(&p, SecretString::from("s".to_string())).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.staleness_window, Duration::from_secs(360));
    }

    #[test]
    fn staleness_factor_alone_scales_default_interval() {
        let mut p = profile();
        p.staleness_factor = Some(2);
        let config = build_coordinator_config(&p, SecretString::from("s".to_string())).unwrap();
        assert_eq!(config.staleness_window, Duration::from_secs(600));
    }

    #[test]
    fn validation_rejects_bad_profiles() {
        let cases: [(fn(&mut Profile), &str); 4] = [
            (|p| p.device_serial = " ".into(), "device_serial"),
            (|p| p.dongle_serial = String::new(), "dongle_serial"),
            (|p| p.region = "mars".into(), "region"),
            (|p| p.poll_interval_secs = Some(0), "poll_interval_secs"),
        ];
        for (mutate, expected) in cases {
            let mut p = profile();
            mutate(&mut p);
            match validate_profile(&p) {
                Err(ConfigError::Validation { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected validation error for {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn loads_profiles_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "home"

[profiles.home]
api_id = "abc"
api_secret_env = "HOME_DYNESS_SECRET"
device_serial = "BMS-9"
dongle_serial = "DNG-9"
region = "apac"
poll_interval_secs = 600
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.active_profile_name(None), "home");
        assert_eq!(cfg.active_profile_name(Some("other")), "other");
        let home = cfg.profile("home").unwrap();
        assert_eq!(home.device_serial, "BMS-9");
        assert_eq!(home.poll_interval_secs, Some(600));
        assert_eq!(cfg.defaults.output, "table");
        assert!(matches!(cfg.profile("nope"), Err(ConfigError::UnknownProfile { .. })));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert!(cfg.profiles.is_empty());
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
    }

    #[test]
    fn save_then_load_keeps_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.profiles.insert("default".into(), profile());

        save_config_to(&path, &cfg).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profile("default").unwrap(), &profile());
    }
}
