// Wire-level payload types.
//
// The open API is loosely typed: numbers arrive as strings or numbers,
// fields come and go between firmware versions. Everything here stays
// close to the wire; `dyness-core` owns the strict schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Loose field-name → value mapping for one section of a fetch.
pub type FieldMap = serde_json::Map<String, Value>;

/// The `{ code, info, data }` envelope every endpoint returns.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub info: Option<String>,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Envelope code rendered as a string (`"0"`, `"200"`, `"401"`...).
    pub(crate) fn code_str(&self) -> String {
        match &self.code {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub(crate) fn is_success(&self) -> bool {
        matches!(self.code_str().as_str(), "0" | "200")
    }
}

/// One `{pointId, pointValue}` entry from the real-time data endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Point {
    #[serde(rename = "pointId")]
    pub point_id: Value,
    #[serde(rename = "pointValue", default)]
    pub point_value: Value,
}

impl Point {
    pub(crate) fn key(&self) -> String {
        match &self.point_id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// The device pair one coordinator instance monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSerials {
    /// BMS serial, e.g. `XXXXX-BMS`.
    pub bms: String,
    /// Dongle (data logger) serial.
    pub dongle: String,
}

impl DeviceSerials {
    pub fn new(bms: impl Into<String>, dongle: impl Into<String>) -> Self {
        Self {
            bms: bms.into(),
            dongle: dongle.into(),
        }
    }
}

/// Everything one logical telemetry fetch returned, before normalization.
///
/// Transient: consumed by the normalizer and dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawTelemetry {
    /// Storage detail: firmware, communication status, update time.
    pub device: FieldMap,
    /// Latest power record with a non-null `realTimePower`.
    pub power: FieldMap,
    /// BMS real-time points keyed by point id.
    pub bms: FieldMap,
    /// Dongle real-time points keyed by point id.
    pub dongle: FieldMap,
}

/// Result of a successful authentication probe.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub key: crate::auth::SigningKey,
    /// Device detail returned by the probe (model, station, firmware).
    pub device: FieldMap,
}

/// Collect a point list into a map, last value wins on duplicate ids.
pub(crate) fn points_to_map(points: Vec<Point>) -> FieldMap {
    points
        .into_iter()
        .map(|p| (p.key(), p.point_value))
        .collect()
}

/// Pick the latest power record that actually carries `realTimePower`.
pub(crate) fn latest_power_record(records: Vec<FieldMap>) -> FieldMap {
    records
        .into_iter()
        .rev()
        .find(|r| r.get("realTimePower").is_some_and(|v| !v.is_null()))
        .unwrap_or_default()
}
