// ── Canonical battery snapshot ──
//
// Strict, typed view of one acquisition. Fields the device may omit are
// `Option`; everything else was validated by the normalizer before a
// `Snapshot` could be built.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumCount, EnumIter, EnumString};

use crate::staleness::CommunicationStatus;

/// Cell spread (V) above which the pack is flagged as imbalanced.
pub const CELL_IMBALANCE_THRESHOLD_V: f64 = 0.020;

/// Battery power (W) beyond which the pack counts as charging or discharging.
pub const POWER_DEADBAND_W: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatteryStatus {
    Charging,
    Discharging,
    Standby,
}

impl BatteryStatus {
    /// Positive power charges the pack.
    pub fn from_power(watts: f64) -> Self {
        if watts > POWER_DEADBAND_W {
            Self::Charging
        } else if watts < -POWER_DEADBAND_W {
            Self::Discharging
        } else {
            Self::Standby
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlarmStatus {
    Ok,
    Alarm,
}

/// One validated acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub battery_power_w: f64,
    pub battery_current_a: f64,
    pub battery_status: BatteryStatus,
    pub soc_pct: f64,
    pub soh_pct: Option<f64>,
    pub pack_voltage_v: f64,
    pub cell_voltage_max_v: f64,
    pub cell_voltage_min_v: f64,
    /// `max - min`, rounded to the millivolt.
    pub cell_voltage_spread_v: f64,
    pub cell_voltage_max_index: Option<u32>,
    pub cell_voltage_min_index: Option<u32>,
    pub charge_voltage_upper_limit_v: Option<f64>,
    pub charge_voltage_lower_limit_v: Option<f64>,
    pub cell_temp_max_c: Option<f64>,
    pub cell_temp_min_c: Option<f64>,
    pub mosfet_temp_c: Option<f64>,
    pub bms_temp_max_c: Option<f64>,
    pub bms_temp_min_c: Option<f64>,
    pub max_charge_current_a: Option<f64>,
    pub max_discharge_current_a: Option<f64>,
    pub charge_enabled: Option<bool>,
    pub discharge_enabled: Option<bool>,
    pub alarm_status: AlarmStatus,
    /// Link status as the device itself reports it.
    pub reported_communication: Option<String>,
    pub firmware_version: Option<String>,
    pub signal_strength_dbm: Option<f64>,
    pub last_data_update: DateTime<Utc>,
}

impl Snapshot {
    /// Advisory only: never feeds `alarm_status`.
    pub fn cell_imbalance(&self) -> bool {
        self.cell_voltage_spread_v > CELL_IMBALANCE_THRESHOLD_V
    }

    /// Value of one published metric.
    ///
    /// `communication_status` comes from the coordinator's staleness
    /// tracking, not from the device, so the caller supplies it.
    pub fn value(&self, key: SensorKey, communication_status: CommunicationStatus) -> MetricValue {
        use MetricValue as V;
        match key {
            SensorKey::BatteryPower => V::Number(self.battery_power_w),
            SensorKey::BatteryCurrent => V::Number(self.battery_current_a),
            SensorKey::BatteryStatus => V::Text(self.battery_status.to_string()),
            SensorKey::Soc => V::Number(self.soc_pct),
            SensorKey::Soh => self.soh_pct.into(),
            SensorKey::PackVoltage => V::Number(self.pack_voltage_v),
            SensorKey::CellVoltageMax => V::Number(self.cell_voltage_max_v),
            SensorKey::CellVoltageMin => V::Number(self.cell_voltage_min_v),
            SensorKey::CellVoltageSpread => V::Number(self.cell_voltage_spread_v),
            SensorKey::CellVoltageMaxIndex => self.cell_voltage_max_index.into(),
            SensorKey::CellVoltageMinIndex => self.cell_voltage_min_index.into(),
            SensorKey::ChargeVoltageUpperLimit => self.charge_voltage_upper_limit_v.into(),
            SensorKey::ChargeVoltageLowerLimit => self.charge_voltage_lower_limit_v.into(),
            SensorKey::CellTempMax => self.cell_temp_max_c.into(),
            SensorKey::CellTempMin => self.cell_temp_min_c.into(),
            SensorKey::MosfetTemp => self.mosfet_temp_c.into(),
            SensorKey::BmsTempMax => self.bms_temp_max_c.into(),
            SensorKey::BmsTempMin => self.bms_temp_min_c.into(),
            SensorKey::MaxChargeCurrent => self.max_charge_current_a.into(),
            SensorKey::MaxDischargeCurrent => self.max_discharge_current_a.into(),
            SensorKey::ChargeEnabled => self.charge_enabled.into(),
            SensorKey::DischargeEnabled => self.discharge_enabled.into(),
            SensorKey::AlarmStatus => V::Text(self.alarm_status.to_string()),
            SensorKey::CommunicationStatus => V::Text(communication_status.to_string()),
            SensorKey::FirmwareVersion => self
                .firmware_version
                .clone()
                .map_or(V::Missing, V::Text),
            SensorKey::SignalStrength => self.signal_strength_dbm.into(),
            SensorKey::LastDataUpdate => V::Timestamp(self.last_data_update),
        }
    }
}

/// Stable identifier of each published metric.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr, EnumIter, EnumCount, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SensorKey {
    BatteryPower,
    BatteryCurrent,
    BatteryStatus,
    Soc,
    Soh,
    PackVoltage,
    CellVoltageMax,
    CellVoltageMin,
    CellVoltageSpread,
    CellVoltageMaxIndex,
    CellVoltageMinIndex,
    ChargeVoltageUpperLimit,
    ChargeVoltageLowerLimit,
    CellTempMax,
    CellTempMin,
    MosfetTemp,
    BmsTempMax,
    BmsTempMin,
    MaxChargeCurrent,
    MaxDischargeCurrent,
    ChargeEnabled,
    DischargeEnabled,
    AlarmStatus,
    CommunicationStatus,
    FirmwareVersion,
    SignalStrength,
    LastDataUpdate,
}

impl SensorKey {
    /// Human-readable name.
    pub fn label(self) -> &'static str {
        match self {
            Self::BatteryPower => "Battery Power",
            Self::BatteryCurrent => "Battery Current",
            Self::BatteryStatus => "Battery Status",
            Self::Soc => "State of Charge",
            Self::Soh => "State of Health",
            Self::PackVoltage => "Pack Voltage",
            Self::CellVoltageMax => "Cell Voltage Max",
            Self::CellVoltageMin => "Cell Voltage Min",
            Self::CellVoltageSpread => "Cell Voltage Spread",
            Self::CellVoltageMaxIndex => "Cell # Max Voltage",
            Self::CellVoltageMinIndex => "Cell # Min Voltage",
            Self::ChargeVoltageUpperLimit => "Charge Voltage Upper Limit",
            Self::ChargeVoltageLowerLimit => "Charge Voltage Lower Limit",
            Self::CellTempMax => "Cell Temperature Max",
            Self::CellTempMin => "Cell Temperature Min",
            Self::MosfetTemp => "MOSFET Temperature",
            Self::BmsTempMax => "BMS Temperature Max",
            Self::BmsTempMin => "BMS Temperature Min",
            Self::MaxChargeCurrent => "Max Charge Current",
            Self::MaxDischargeCurrent => "Max Discharge Current",
            Self::ChargeEnabled => "Charge Enabled",
            Self::DischargeEnabled => "Discharge Enabled",
            Self::AlarmStatus => "Alarm Status",
            Self::CommunicationStatus => "Communication Status",
            Self::FirmwareVersion => "Firmware Version",
            Self::SignalStrength => "Signal Strength",
            Self::LastDataUpdate => "Last Data Update",
        }
    }
}

/// A metric value as presented to consumers. `Missing` is "unavailable".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Integer(u32),
    Flag(bool),
    Text(String),
    Timestamp(DateTime<Utc>),
    Missing,
}

impl MetricValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl From<Option<f64>> for MetricValue {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Self::Missing, Self::Number)
    }
}

impl From<Option<u32>> for MetricValue {
    fn from(v: Option<u32>) -> Self {
        v.map_or(Self::Missing, Self::Integer)
    }
}

impl From<Option<bool>> for MetricValue {
    fn from(v: Option<bool>) -> Self {
        v.map_or(Self::Missing, Self::Flag)
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Flag(true) => f.write_str("enabled"),
            Self::Flag(false) => f.write_str("disabled"),
            Self::Text(s) => f.write_str(s),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Missing => f.write_str("unavailable"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn battery_status_deadband() {
        assert_eq!(BatteryStatus::from_power(250.0), BatteryStatus::Charging);
        assert_eq!(BatteryStatus::from_power(-11.0), BatteryStatus::Discharging);
        assert_eq!(BatteryStatus::from_power(10.0), BatteryStatus::Standby);
        assert_eq!(BatteryStatus::from_power(-10.0), BatteryStatus::Standby);
    }

    #[test]
    fn sensor_keys_are_unique_snake_case() {
        let keys: Vec<String> = SensorKey::iter().map(|k| k.to_string()).collect();
        assert_eq!(keys.len(), SensorKey::COUNT);
        let mut dedup = keys.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), keys.len());
        assert!(keys.contains(&"cell_voltage_spread".to_string()));
        assert_eq!("soc".parse::<SensorKey>().unwrap(), SensorKey::Soc);
    }

    #[test]
    fn missing_values_render_unavailable() {
        assert_eq!(MetricValue::from(None::<f64>).to_string(), "unavailable");
        assert_eq!(MetricValue::from(Some(true)).to_string(), "enabled");
    }
}
