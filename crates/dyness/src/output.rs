//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders readings in the format selected by `--output`. Table uses
//! `tabled`, structured formats use serde, plain emits `key=value` lines.

use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;
use strum::IntoEnumIterator;
use tabled::{Table, Tabled, settings::Style};

use dyness_core::{
    AlarmStatus, CommunicationStatus, DeviceInfo, MetricValue, Reading, SensorKey, Snapshot,
};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

fn paint(key: SensorKey, value: &MetricValue, color: bool) -> String {
    let text = value.to_string();
    if !color {
        return text;
    }
    match (key, value) {
        (_, MetricValue::Missing) => text.dimmed().to_string(),
        (SensorKey::AlarmStatus, MetricValue::Text(s)) if s == AlarmStatus::Alarm.as_ref() => {
            text.red().bold().to_string()
        }
        (SensorKey::AlarmStatus, _) => text.green().to_string(),
        (SensorKey::CommunicationStatus, MetricValue::Text(s))
            if s == CommunicationStatus::Online.as_ref() =>
        {
            text.green().to_string()
        }
        (SensorKey::CommunicationStatus, _) => text.yellow().to_string(),
        _ => text,
    }
}

// ── Metric views ─────────────────────────────────────────────────────

/// Display unit of each metric; empty for enums, flags and text.
pub fn unit(key: SensorKey) -> &'static str {
    match key {
        SensorKey::BatteryPower => "W",
        SensorKey::BatteryCurrent | SensorKey::MaxChargeCurrent | SensorKey::MaxDischargeCurrent => {
            "A"
        }
        SensorKey::Soc | SensorKey::Soh => "%",
        SensorKey::PackVoltage
        | SensorKey::CellVoltageMax
        | SensorKey::CellVoltageMin
        | SensorKey::CellVoltageSpread
        | SensorKey::ChargeVoltageUpperLimit
        | SensorKey::ChargeVoltageLowerLimit => "V",
        SensorKey::CellTempMax
        | SensorKey::CellTempMin
        | SensorKey::MosfetTemp
        | SensorKey::BmsTempMax
        | SensorKey::BmsTempMin => "°C",
        SensorKey::SignalStrength => "dBm",
        _ => "",
    }
}

#[derive(Debug, Serialize)]
pub struct MetricEntry {
    pub key: SensorKey,
    pub label: &'static str,
    pub value: MetricValue,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub unit: &'static str,
}

/// Everything `read` prints, in serializable form.
#[derive(Debug, Serialize)]
pub struct ReadingView {
    pub device: DeviceInfo,
    pub communication_status: CommunicationStatus,
    pub available: bool,
    pub cell_imbalance: bool,
    pub metrics: Vec<MetricEntry>,
}

impl ReadingView {
    /// Build a view over `keys`, or every metric when `keys` is empty.
    pub fn new(reading: &Reading, device: DeviceInfo, keys: &[SensorKey]) -> Self {
        let selected: Vec<SensorKey> = if keys.is_empty() {
            SensorKey::iter().collect()
        } else {
            keys.to_vec()
        };
        let metrics = selected
            .into_iter()
            .map(|key| MetricEntry {
                key,
                label: key.label(),
                value: reading.value(key),
                unit: unit(key),
            })
            .collect();
        Self {
            device,
            communication_status: reading.communication_status,
            available: reading.available,
            cell_imbalance: reading
                .snapshot
                .as_ref()
                .is_some_and(|s| s.cell_imbalance()),
            metrics,
        }
    }
}

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    label: &'static str,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unit")]
    unit: &'static str,
}

// ── Render dispatchers ───────────────────────────────────────────────

pub fn render_reading(
    format: OutputFormat,
    view: &ReadingView,
    color: bool,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Table => {
            let rows: Vec<MetricRow> = view
                .metrics
                .iter()
                .map(|m| MetricRow {
                    label: m.label,
                    value: paint(m.key, &m.value, color),
                    unit: if m.value.is_missing() { "" } else { m.unit },
                })
                .collect();
            let mut out = format!("{}\n", view.device.title());
            out.push_str(&Table::new(rows).with(Style::rounded()).to_string());
            if view.cell_imbalance {
                let note = "cell imbalance: voltage spread above 20 mV";
                out.push('\n');
                out.push_str(&if color { note.yellow().to_string() } else { note.to_owned() });
            }
            Ok(out)
        }
        OutputFormat::Json => render_json(view, false),
        OutputFormat::JsonCompact => render_json(view, true),
        OutputFormat::Yaml => render_yaml(view),
        OutputFormat::Plain => Ok(view
            .metrics
            .iter()
            .map(|m| format!("{}={}", m.key, m.value))
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

/// One line per published snapshot for `watch`.
pub fn render_snapshot_line(
    format: OutputFormat,
    snapshot: &Snapshot,
    status: CommunicationStatus,
    color: bool,
) -> Result<String, CliError> {
    #[derive(Serialize)]
    struct Line<'a> {
        communication_status: CommunicationStatus,
        #[serde(flatten)]
        snapshot: &'a Snapshot,
    }

    match format {
        OutputFormat::Table | OutputFormat::Plain => {
            let alarm = snapshot.alarm_status.to_string();
            let alarm = match (color, snapshot.alarm_status) {
                (true, AlarmStatus::Alarm) => alarm.red().bold().to_string(),
                (true, AlarmStatus::Ok) => alarm.green().to_string(),
                (false, _) => alarm,
            };
            Ok(format!(
                "{}  soc {:.1}%  {:.0} W {}  pack {:.2} V  spread {:.3} V  alarm {alarm}  {status}",
                local_time(snapshot.last_data_update),
                snapshot.soc_pct,
                snapshot.battery_power_w,
                snapshot.battery_status,
                snapshot.pack_voltage_v,
                snapshot.cell_voltage_spread_v,
            ))
        }
        OutputFormat::Json | OutputFormat::JsonCompact => render_json(
            &Line {
                communication_status: status,
                snapshot,
            },
            true,
        ),
        OutputFormat::Yaml => render_yaml(&Line {
            communication_status: status,
            snapshot,
        })
        .map(|doc| format!("---\n{doc}")),
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

pub(crate) fn render_json<T: Serialize + ?Sized>(data: &T, compact: bool) -> Result<String, CliError> {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.map_err(|e| CliError::Render(e.to_string()))
}

pub(crate) fn render_yaml<T: Serialize + ?Sized>(data: &T) -> Result<String, CliError> {
    serde_yaml::to_string(data).map_err(|e| CliError::Render(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dyness_core::DeviceSerials;

    use super::*;

    fn empty_reading() -> Reading {
        Reading {
            snapshot: None,
            communication_status: CommunicationStatus::Unknown,
            available: false,
        }
    }

    fn device() -> DeviceInfo {
        DeviceInfo::new(&DeviceSerials::new("BMS-001", "DONGLE-001"))
    }

    #[test]
    fn every_metric_listed_by_default() {
        let view = ReadingView::new(&empty_reading(), device(), &[]);
        assert_eq!(view.metrics.len(), SensorKey::iter().count());
    }

    #[test]
    fn plain_output_marks_missing_values_unavailable() {
        let view = ReadingView::new(&empty_reading(), device(), &[SensorKey::Soc]);
        let out = render_reading(OutputFormat::Plain, &view, false).unwrap();
        assert_eq!(out, "soc=unavailable");
    }

    #[test]
    fn communication_status_present_without_snapshot() {
        let view = ReadingView::new(&empty_reading(), device(), &[SensorKey::CommunicationStatus]);
        let out = render_reading(OutputFormat::Plain, &view, false).unwrap();
        assert_eq!(out, "communication_status=unknown");
    }

    #[test]
    fn json_output_carries_device_and_metrics() {
        let view = ReadingView::new(&empty_reading(), device(), &[SensorKey::Soc]);
        let out = render_reading(OutputFormat::JsonCompact, &view, false).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["device"]["bms_serial"], "BMS-001");
        assert_eq!(parsed["metrics"][0]["key"], "soc");
        assert_eq!(parsed["metrics"][0]["unit"], "%");
    }

    #[test]
    fn table_output_starts_with_device_title() {
        let view = ReadingView::new(&empty_reading(), device(), &[]);
        let out = render_reading(OutputFormat::Table, &view, false).unwrap();
        assert!(out.starts_with("Dyness Battery — BMS-001"));
        assert!(out.contains("State of Charge"));
    }
}
