//! Config subcommand handlers.

use dialoguer::{Input, Password, Select};

use dyness_config::{Config, Defaults, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

const REGIONS: [&str; 2] = ["global", "apac"];

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of the config with plaintext secrets masked.
fn redacted(cfg: &Config) -> Config {
    Config {
        default_profile: cfg.default_profile.clone(),
        defaults: Defaults {
            output: cfg.defaults.output.clone(),
            color: cfg.defaults.color.clone(),
        },
        profiles: cfg
            .profiles
            .iter()
            .map(|(name, profile)| {
                let mut profile = profile.clone();
                if profile.api_secret.is_some() {
                    profile.api_secret = Some("****".into());
                }
                (name.clone(), profile)
            })
            .collect(),
    }
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn prompt_text(prompt: &str, default: Option<&str>) -> Result<String, CliError> {
    let mut input = Input::<String>::new().with_prompt(prompt);
    if let Some(default) = default {
        input = input.default(default.to_owned());
    }
    let value = input.interact_text().map_err(prompt_err)?;
    Ok(value.trim().to_owned())
}

/// Store the secret in the keyring, or hand it back for the config file.
fn prompt_secret_storage(profile_name: &str, secret: &str) -> Result<Option<String>, CliError> {
    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt("Where to store the API secret?")
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        dyness_config::store_secret(profile_name, secret)?;
        eprintln!("   ✓ API secret stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(secret.to_owned()))
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&dyness_config::config_path().display().to_string(), global.quiet);
            Ok(())
        }
        ConfigCommand::Show => show(global),
        ConfigCommand::Init => init(global),
    }
}

fn show(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = redacted(&dyness_config::load_config()?);
    let rendered = match global.output {
        OutputFormat::Json => output::render_json(&cfg, false)?,
        OutputFormat::JsonCompact => output::render_json(&cfg, true)?,
        OutputFormat::Yaml => output::render_yaml(&cfg)?,
        OutputFormat::Plain => {
            let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
            names.sort_unstable();
            names.join("\n")
        }
        OutputFormat::Table => {
            toml::to_string_pretty(&cfg).map_err(|e| CliError::Render(e.to_string()))?
        }
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let config_path = dyness_config::config_path();
    eprintln!("Dyness battery monitor: configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    let mut cfg = dyness_config::load_config_or_default();

    let profile_name = prompt_text(
        "Profile name",
        Some(global.profile.as_deref().unwrap_or("default")),
    )?;
    let api_id = prompt_text("API ID", None)?;
    let secret = Password::new()
        .with_prompt("API secret")
        .interact()
        .map_err(prompt_err)?;
    if secret.is_empty() {
        return Err(CliError::Validation {
            field: "api_secret".into(),
            reason: "API secret cannot be empty".into(),
        });
    }
    let device_serial = prompt_text("BMS serial (ends in -BMS)", None)?;
    let dongle_serial = prompt_text("Dongle serial", None)?;
    let region = Select::new()
        .with_prompt("API region")
        .items(&REGIONS)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    let mut profile = Profile {
        api_id,
        device_serial,
        dongle_serial,
        region: REGIONS.get(region).copied().unwrap_or("global").to_owned(),
        ..Profile::default()
    };
    dyness_config::validate_profile(&profile)?;

    profile.api_secret = prompt_secret_storage(&profile_name, &secret)?;

    if cfg.profiles.is_empty() {
        cfg.default_profile = Some(profile_name.clone());
    }
    cfg.profiles.insert(profile_name.clone(), profile);
    dyness_config::save_config(&cfg)?;

    eprintln!("\n   ✓ Saved profile '{profile_name}' to {}", config_path.display());
    eprintln!("   Verify with: dyness check --profile {profile_name}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_masks_plaintext_secrets_only() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "home".into(),
            Profile {
                api_secret: Some("hunter2".into()),
                ..Profile::default()
            },
        );
        cfg.profiles.insert(
            "cabin".into(),
            Profile {
                api_secret_env: Some("CABIN_SECRET".into()),
                ..Profile::default()
            },
        );

        let shown = redacted(&cfg);
        assert_eq!(shown.profiles["home"].api_secret.as_deref(), Some("****"));
        assert_eq!(shown.profiles["cabin"].api_secret, None);
        assert_eq!(
            shown.profiles["cabin"].api_secret_env.as_deref(),
            Some("CABIN_SECRET")
        );
    }
}
