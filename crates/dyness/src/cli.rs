//! Clap derive structures for the `dyness` CLI.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dyness_core::SensorKey;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// dyness -- monitor Dyness batteries through the Dyness open API
#[derive(Debug, Parser)]
#[command(
    name = "dyness",
    version,
    about = "Monitor Dyness batteries from the command line",
    long_about = "Polls a Dyness BMS through the Dyness open API, validates every reading,\n\
        and reports state of charge, power, cell voltages, temperatures and alarms.\n\n\
        All requests share one rate-limit floor (one request per minute).",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Battery profile to use
    #[arg(long, short = 'p', env = "DYNESS_PROFILE", global = true)]
    pub profile: Option<String>,

    /// API region: global or apac (overrides profile)
    #[arg(long, short = 'r', env = "DYNESS_REGION", global = true)]
    pub region: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "DYNESS_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip TLS certificate verification
    #[arg(long, short = 'k', env = "DYNESS_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "DYNESS_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain `key=value` lines (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate credentials and serials with one acquisition cycle
    Check,

    /// Run one acquisition cycle and print the metrics
    #[command(alias = "r")]
    Read(ReadArgs),

    /// Poll continuously and print each published snapshot
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Read / Watch ─────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReadArgs {
    /// Only print these metrics (e.g. soc, battery_power, cell_voltage_spread)
    #[arg(long = "metric", short = 'm', value_parser = parse_sensor_key)]
    pub metrics: Vec<SensorKey>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Poll interval, e.g. "5m" or "90s" (overrides profile)
    #[arg(long, short = 'i', value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,

    /// Stop after this many published snapshots
    #[arg(long, short = 'n')]
    pub count: Option<u64>,
}

fn parse_sensor_key(s: &str) -> Result<SensorKey, String> {
    s.parse::<SensorKey>()
        .map_err(|_| format!("unknown metric '{s}'"))
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display the current configuration (secrets masked)
    Show,

    /// Create or extend the config file with guided setup
    Init,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
