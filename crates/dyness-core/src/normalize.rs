// ── Snapshot normalizer ──
//
// Pure mapping from the loosely-typed wire sections to a `Snapshot`.
// Required fields fail the cycle when absent; optional ones become `None`.
// Nothing here is defaulted.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use dyness_api::{FieldMap, RawTelemetry};
use serde_json::Value;

use crate::error::NormalizationError;
use crate::snapshot::{AlarmStatus, BatteryStatus, SensorKey, Snapshot};

// BMS point ids.
const PT_SOH: &str = "1200";
const PT_PACK_VOLTAGE: &str = "600";
const PT_CELL_V_MAX: &str = "1300";
const PT_CELL_V_MIN: &str = "1500";
const PT_CELL_V_MAX_NUM: &str = "1402";
const PT_CELL_V_MIN_NUM: &str = "1602";
const PT_CHARGE_V_UPPER: &str = "3600";
const PT_CHARGE_V_LOWER: &str = "3700";
const PT_CELL_T_MAX: &str = "1800";
const PT_CELL_T_MIN: &str = "2000";
const PT_MOSFET_T: &str = "2300";
const PT_BMS_T_MAX: &str = "2800";
const PT_BMS_T_MIN: &str = "3000";
const PT_MAX_CHARGE_I: &str = "3800";
const PT_MAX_DISCHARGE_I: &str = "3900";
const PT_CHARGE_ENABLE: &str = "4008";
const PT_DISCHARGE_ENABLE: &str = "4007";
const PT_ALARM: &str = "4100";

// Dongle point ids.
const PT_SIGNAL: &str = "800000";

const ABSOLUTE_ZERO_C: f64 = -273.15;
const MAX_PLAUSIBLE_TEMP_C: f64 = 250.0;
const MAX_CELL_VOLTAGE_V: f64 = 5.0;

/// Epoch values at or above this are milliseconds, below it seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Map one raw fetch to a validated snapshot.
pub fn normalize(raw: &RawTelemetry) -> Result<Snapshot, NormalizationError> {
    let power = required(&raw.power, "realTimePower", SensorKey::BatteryPower)?;
    let current = required(&raw.power, "realTimeCurrent", SensorKey::BatteryCurrent)?;
    let soc = bounded(
        required(&raw.power, "soc", SensorKey::Soc)?,
        SensorKey::Soc,
        0.0,
        100.0,
    )?;
    let soh = optional(&raw.bms, PT_SOH)
        .map(|v| bounded(v, SensorKey::Soh, 0.0, 100.0))
        .transpose()?;
    let pack_voltage = at_least(
        required(&raw.bms, PT_PACK_VOLTAGE, SensorKey::PackVoltage)?,
        SensorKey::PackVoltage,
        0.0,
    )?;

    let cell_max = bounded(
        required(&raw.bms, PT_CELL_V_MAX, SensorKey::CellVoltageMax)?,
        SensorKey::CellVoltageMax,
        0.0,
        MAX_CELL_VOLTAGE_V,
    )?;
    let cell_min = bounded(
        required(&raw.bms, PT_CELL_V_MIN, SensorKey::CellVoltageMin)?,
        SensorKey::CellVoltageMin,
        0.0,
        MAX_CELL_VOLTAGE_V,
    )?;
    if cell_min > cell_max {
        return Err(out_of_range(SensorKey::CellVoltageMin, cell_min));
    }
    let spread = round3(cell_max - cell_min).max(0.0);

    let alarm = match text(&raw.bms, PT_ALARM) {
        Some(code) if is_zero_code(&code) => AlarmStatus::Ok,
        Some(_) => AlarmStatus::Alarm,
        None => return Err(missing(SensorKey::AlarmStatus)),
    };

    let last_update = raw
        .device
        .get("dataUpdateTime")
        .and_then(parse_timestamp)
        .ok_or_else(|| missing(SensorKey::LastDataUpdate))?;

    Ok(Snapshot {
        battery_power_w: power,
        battery_current_a: current,
        battery_status: BatteryStatus::from_power(power),
        soc_pct: soc,
        soh_pct: soh,
        pack_voltage_v: pack_voltage,
        cell_voltage_max_v: cell_max,
        cell_voltage_min_v: cell_min,
        cell_voltage_spread_v: spread,
        cell_voltage_max_index: cell_index(&raw.bms, PT_CELL_V_MAX_NUM, SensorKey::CellVoltageMaxIndex)?,
        cell_voltage_min_index: cell_index(&raw.bms, PT_CELL_V_MIN_NUM, SensorKey::CellVoltageMinIndex)?,
        charge_voltage_upper_limit_v: non_negative(&raw.bms, PT_CHARGE_V_UPPER, SensorKey::ChargeVoltageUpperLimit)?,
        charge_voltage_lower_limit_v: non_negative(&raw.bms, PT_CHARGE_V_LOWER, SensorKey::ChargeVoltageLowerLimit)?,
        cell_temp_max_c: temperature(&raw.bms, PT_CELL_T_MAX, SensorKey::CellTempMax)?,
        cell_temp_min_c: temperature(&raw.bms, PT_CELL_T_MIN, SensorKey::CellTempMin)?,
        mosfet_temp_c: temperature(&raw.bms, PT_MOSFET_T, SensorKey::MosfetTemp)?,
        bms_temp_max_c: temperature(&raw.bms, PT_BMS_T_MAX, SensorKey::BmsTempMax)?,
        bms_temp_min_c: temperature(&raw.bms, PT_BMS_T_MIN, SensorKey::BmsTempMin)?,
        max_charge_current_a: non_negative(&raw.bms, PT_MAX_CHARGE_I, SensorKey::MaxChargeCurrent)?,
        max_discharge_current_a: non_negative(&raw.bms, PT_MAX_DISCHARGE_I, SensorKey::MaxDischargeCurrent)?,
        charge_enabled: flag(&raw.bms, PT_CHARGE_ENABLE),
        discharge_enabled: flag(&raw.bms, PT_DISCHARGE_ENABLE),
        alarm_status: alarm,
        reported_communication: text(&raw.device, "deviceCommunicationStatus"),
        firmware_version: text(&raw.device, "firmwareVersion"),
        signal_strength_dbm: optional(&raw.dongle, PT_SIGNAL),
        last_data_update: last_update,
    })
}

// ── Field access ─────────────────────────────────────────────────────

fn missing(key: SensorKey) -> NormalizationError {
    NormalizationError::MissingField {
        field: key.to_string(),
    }
}

fn out_of_range(key: SensorKey, value: f64) -> NormalizationError {
    NormalizationError::OutOfRange {
        field: key.to_string(),
        value,
    }
}

/// Trimmed string form of a field; empty strings and `"null"` are absent.
fn text(map: &FieldMap, key: &str) -> Option<String> {
    let raw = match map.get(key)? {
        Value::String(s) => s.trim().to_owned(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(raw)
    }
}

/// Finite number rounded to 3 decimals; anything else is absent.
fn optional(map: &FieldMap, key: &str) -> Option<f64> {
    let value = match map.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(_) => text(map, key)?.parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then(|| round3(value))
}

fn required(map: &FieldMap, key: &str, metric: SensorKey) -> Result<f64, NormalizationError> {
    optional(map, key).ok_or_else(|| missing(metric))
}

fn bounded(value: f64, key: SensorKey, lo: f64, hi: f64) -> Result<f64, NormalizationError> {
    if (lo..=hi).contains(&value) {
        Ok(value)
    } else {
        Err(out_of_range(key, value))
    }
}

fn at_least(value: f64, key: SensorKey, lo: f64) -> Result<f64, NormalizationError> {
    if value >= lo { Ok(value) } else { Err(out_of_range(key, value)) }
}

fn non_negative(map: &FieldMap, point: &str, key: SensorKey) -> Result<Option<f64>, NormalizationError> {
    optional(map, point).map(|v| at_least(v, key, 0.0)).transpose()
}

fn temperature(map: &FieldMap, point: &str, key: SensorKey) -> Result<Option<f64>, NormalizationError> {
    match optional(map, point) {
        Some(v) if v <= ABSOLUTE_ZERO_C || v > MAX_PLAUSIBLE_TEMP_C => Err(out_of_range(key, v)),
        other => Ok(other),
    }
}

/// 1-based cell number.
fn cell_index(map: &FieldMap, point: &str, key: SensorKey) -> Result<Option<u32>, NormalizationError> {
    let Some(v) = optional(map, point) else {
        return Ok(None);
    };
    if v < 1.0 || v.fract() > 0.0 || v > f64::from(u32::MAX) {
        return Err(out_of_range(key, v));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
    let index = v as u32;
    Ok(Some(index))
}

/// `1` enables; `0` disables; anything else is unknown.
fn flag(map: &FieldMap, point: &str) -> Option<bool> {
    match text(map, point)?.as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// Alarm words arrive as `0`, `0.0`, or `"0"`; any non-zero bit is an alarm.
fn is_zero_code(code: &str) -> bool {
    code.parse::<f64>()
        .map_or(code == "0", |v| v.abs() < f64::EPSILON)
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

// ── Timestamps ───────────────────────────────────────────────────────

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), or epoch seconds / milliseconds.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => from_epoch(n.as_i64()?),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Some(t.with_timezone(&Utc));
            }
            if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(Utc.from_utc_datetime(&t));
            }
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                return from_epoch(s.parse().ok()?);
            }
            None
        }
        _ => None,
    }
}

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}
