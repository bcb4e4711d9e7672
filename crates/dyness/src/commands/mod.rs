//! Command handlers and the shared profile → coordinator plumbing.

pub mod check;
pub mod config_cmd;
pub mod read;
pub mod watch;

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use dyness_config::{Config, Profile};
use dyness_core::Coordinator;
use dyness_core::config::DEFAULT_STALENESS_FACTOR;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Pick the active profile from the loaded config.
pub fn select_profile(cfg: &Config, global: &GlobalOpts) -> Result<(String, Profile), CliError> {
    let name = cfg.active_profile_name(global.profile.as_deref());
    if let Some(profile) = cfg.profiles.get(&name) {
        return Ok((name, profile.clone()));
    }
    if cfg.profiles.is_empty() {
        return Err(CliError::NoConfig {
            path: dyness_config::config_path().display().to_string(),
        });
    }
    let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    available.sort_unstable();
    Err(CliError::ProfileNotFound {
        name,
        available: available.join(", "),
    })
}

/// Apply command-line overrides on top of a stored profile.
pub fn apply_overrides(profile: &mut Profile, global: &GlobalOpts) {
    if let Some(ref region) = global.region {
        profile.region.clone_from(region);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout_secs = Some(timeout);
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
}

/// Load the config, resolve the profile and its secret, and build a coordinator.
pub fn build_coordinator(
    global: &GlobalOpts,
    interval: Option<Duration>,
) -> Result<(String, Coordinator), CliError> {
    let cfg = dyness_config::load_config()?;
    let (name, mut profile) = select_profile(&cfg, global)?;
    apply_overrides(&mut profile, global);

    let mut config = dyness_config::profile_to_coordinator_config(&profile, &name)?;
    if let Some(interval) = interval {
        let factor = profile.staleness_factor.unwrap_or(DEFAULT_STALENESS_FACTOR);
        config = config.with_poll_interval(interval, factor);
    }
    tracing::debug!(
        profile = %name,
        region = %config.region,
        bms = %config.serials.bms,
        interval_secs = config.poll_interval.as_secs(),
        "building coordinator"
    );

    let coordinator = Coordinator::from_config(config)?;
    Ok((name, coordinator))
}

/// Stderr spinner, hidden in quiet mode.
pub fn spinner(message: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} ({elapsed})") {
        bar.set_style(style);
    }
    bar.set_message(message.to_owned());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["dyness"];
        argv.extend_from_slice(args);
        argv.push("check");
        Cli::try_parse_from(argv).unwrap().global
    }

    fn config_with(names: &[&str]) -> Config {
        let mut cfg = Config::default();
        for name in names {
            cfg.profiles.insert((*name).to_owned(), Profile::default());
        }
        cfg
    }

    #[test]
    fn default_profile_selected() {
        let (name, _) = select_profile(&config_with(&["default"]), &global(&[])).unwrap();
        assert_eq!(name, "default");
    }

    #[test]
    fn empty_config_reports_missing_file() {
        let err = select_profile(&config_with(&[]), &global(&[])).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }

    #[test]
    fn unknown_profile_lists_available() {
        let err = select_profile(&config_with(&["home", "cabin"]), &global(&["-p", "lake"]))
            .unwrap_err();
        match err {
            CliError::ProfileNotFound { name, available } => {
                assert_eq!(name, "lake");
                assert_eq!(available, "cabin, home");
            }
            other => panic!("expected ProfileNotFound, got: {other:?}"),
        }
    }

    #[test]
    fn overrides_replace_profile_values() {
        let mut profile = Profile {
            region: "global".into(),
            ..Profile::default()
        };
        apply_overrides(&mut profile, &global(&["--region", "apac", "--timeout", "5", "-k"]));
        assert_eq!(profile.region, "apac");
        assert_eq!(profile.timeout_secs, Some(5));
        assert_eq!(profile.insecure, Some(true));
    }
}
