// Device identity, refreshed from storage detail and BMS points.

use dyness_api::{DeviceSerials, FieldMap};
use serde::Serialize;
use serde_json::Value;

/// Sub-device point listing battery module serials, comma separated.
const MODULE_SERIAL_POINT: &str = "SUB";

const DEFAULT_MODEL: &str = "Dyness Battery";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub bms_serial: String,
    pub dongle_serial: String,
    pub model: String,
    pub station_name: Option<String>,
    pub firmware_version: Option<String>,
    pub module_serial: Option<String>,
}

impl DeviceInfo {
    pub fn new(serials: &DeviceSerials) -> Self {
        Self {
            bms_serial: serials.bms.clone(),
            dongle_serial: serials.dongle.clone(),
            model: DEFAULT_MODEL.to_owned(),
            station_name: None,
            firmware_version: None,
            module_serial: None,
        }
    }

    /// Merge storage detail. Absent fields keep their previous value.
    pub fn update_from_detail(&mut self, detail: &FieldMap) {
        if let Some(model) = text(detail, "deviceModelName").or_else(|| text(detail, "deviceName")) {
            self.model = model;
        }
        if let Some(station) = text(detail, "stationName") {
            self.station_name = Some(station);
        }
        if let Some(firmware) = text(detail, "firmwareVersion") {
            self.firmware_version = Some(firmware);
        }
    }

    pub fn update_from_points(&mut self, bms: &FieldMap) {
        let first = text(bms, MODULE_SERIAL_POINT)
            .and_then(|list| list.split(',').map(str::trim).find(|s| !s.is_empty()).map(str::to_owned));
        if let Some(serial) = first {
            self.module_serial = Some(serial);
        }
    }

    /// "model — station", falling back to the BMS serial.
    pub fn title(&self) -> String {
        let place = self.station_name.as_deref().unwrap_or(&self.bms_serial);
        format!("{} — {place}", self.model)
    }
}

fn text(map: &FieldMap, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn detail_merge_keeps_previous_values() {
        let mut info = DeviceInfo::new(&DeviceSerials::new("BMS-1", "DNG-1"));
        assert_eq!(info.title(), "Dyness Battery — BMS-1");

        let detail: FieldMap = serde_json::from_value(json!({
            "deviceModelName": "PowerBox Pro",
            "stationName": "Garage",
            "firmwareVersion": "V1.0.7"
        }))
        .unwrap();
        info.update_from_detail(&detail);
        info.update_from_detail(&FieldMap::new());

        assert_eq!(info.title(), "PowerBox Pro — Garage");
        assert_eq!(info.firmware_version.as_deref(), Some("V1.0.7"));
    }

    #[test]
    fn module_serial_from_sub_point() {
        let mut info = DeviceInfo::new(&DeviceSerials::new("BMS-1", "DNG-1"));
        let points: FieldMap = serde_json::from_value(json!({ "SUB": "MOD-42, MOD-43" })).unwrap();
        info.update_from_points(&points);
        assert_eq!(info.module_serial.as_deref(), Some("MOD-42"));
    }
}
