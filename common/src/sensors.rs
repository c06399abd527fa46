use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::{
    config::EquipmentConfig,
    types::{FaultCode, OverrideCommand, PreviousCycleSnapshot, Readings},
};

/// One logical reading, looked up under each alias in priority order.
#[derive(Debug, Clone, Copy)]
pub struct SensorField {
    pub keys: &'static [&'static str],
    pub default: f64,
}

pub const SUPPLY_TEMP: SensorField = SensorField {
    keys: &["AI4", "SupplyTemp", "Supply_Air_Temp", "SupplyAirTemp"],
    default: 65.0,
};

pub const SPACE_TEMP: SensorField = SensorField {
    keys: &["AI2", "SpaceTemp", "Space", "RoomTemp"],
    default: 70.0,
};

pub const OUTDOOR_TEMP: SensorField = SensorField {
    keys: &["Outdoor_Air", "OutdoorTemp", "OAT", "outdoorTemp"],
    default: 65.0,
};

pub const OUTDOOR_HUMIDITY: SensorField = SensorField {
    keys: &["outdoorHumidity", "OutdoorHumidity", "OAH"],
    default: 50.0,
};

pub const INDOOR_HUMIDITY: SensorField = SensorField {
    keys: &["labRh", "LabRH", "RoomRH"],
    default: 50.0,
};

const SETPOINT_KEYS: &[&str] = &["supplyAirSetpoint", "userSetpoint"];

/// Latest sensor fields as delivered by the host, keyed by source name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorSnapshot(Map<String, Value>);

impl From<Map<String, Value>> for SensorSnapshot {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl SensorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Overlays newer fields; keys absent from `update` keep their old value.
    pub fn merge(&mut self, update: Map<String, Value>) {
        self.0.extend(update);
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(parse_number)
    }

    /// First alias that parses wins; otherwise the field default.
    pub fn resolve(&self, field: &SensorField) -> f64 {
        self.first_number(field.keys).unwrap_or(field.default)
    }

    fn first_number(&self, keys: &[&str]) -> Option<f64> {
        keys.iter().find_map(|key| self.number(key))
    }
}

/// Accepts JSON numbers and numeric strings. Non-finite values are rejected.
pub fn parse_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Readings with no range checking. Used where no fault list is kept.
pub fn raw_readings(snapshot: &SensorSnapshot) -> Readings {
    Readings {
        supply_temp: snapshot.resolve(&SUPPLY_TEMP),
        space_temp: snapshot.resolve(&SPACE_TEMP),
        outdoor_temp: snapshot.resolve(&OUTDOOR_TEMP),
        outdoor_humidity: snapshot.resolve(&OUTDOOR_HUMIDITY),
        indoor_humidity: snapshot.resolve(&INDOOR_HUMIDITY),
    }
}

/// Resolves every reading and substitutes implausible supply/space values.
///
/// Substitution prefers last tick's accepted value, then the field default,
/// and tags the matching sensor fault. Outdoor values come from the weather
/// cache and are passed through unchecked.
pub fn read(
    snapshot: &SensorSnapshot,
    previous: Option<&PreviousCycleSnapshot>,
    config: &EquipmentConfig,
    faults: &mut Vec<FaultCode>,
) -> Readings {
    let mut readings = raw_readings(snapshot);
    let envelope = config.sensor_min_f..=config.sensor_max_f;

    if !envelope.contains(&readings.supply_temp) {
        let substitute = previous
            .map(|prev| prev.supply_temp)
            .unwrap_or(SUPPLY_TEMP.default);
        warn!(
            "supply temperature {:.1}F outside sane range, using {substitute:.1}F",
            readings.supply_temp
        );
        readings.supply_temp = substitute;
        faults.push(FaultCode::InvalidSupplyTempSensor);
    }

    if !envelope.contains(&readings.space_temp) {
        let substitute = previous
            .map(|prev| prev.space_temp)
            .unwrap_or(SPACE_TEMP.default);
        warn!(
            "space temperature {:.1}F outside sane range, using {substitute:.1}F",
            readings.space_temp
        );
        readings.space_temp = substitute;
        faults.push(FaultCode::InvalidSpaceTempSensor);
    }

    readings
}

/// Override setpoint, then its water alias, then snapshot fields, then the default.
pub fn resolve_setpoint(
    snapshot: &SensorSnapshot,
    overrides: Option<&OverrideCommand>,
    config: &EquipmentConfig,
) -> f64 {
    let from_override = overrides.and_then(|cmd| {
        [cmd.temperature_setpoint, cmd.water_temperature_setpoint]
            .into_iter()
            .flatten()
            .find(|value| value.is_finite())
    });

    from_override
        .or_else(|| snapshot.first_number(SETPOINT_KEYS))
        .unwrap_or(config.default_setpoint_f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> SensorSnapshot {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn first_parsable_alias_wins() {
        let snap = snapshot(json!({
            "AI4": "offline",
            "SupplyTemp": " 58.5 ",
            "SupplyAirTemp": 99.0,
        }));
        assert_eq!(snap.resolve(&SUPPLY_TEMP), 58.5);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let readings = raw_readings(&SensorSnapshot::new());
        assert_eq!(
            readings,
            Readings {
                supply_temp: 65.0,
                space_temp: 70.0,
                outdoor_temp: 65.0,
                outdoor_humidity: 50.0,
                indoor_humidity: 50.0,
            }
        );
    }

    #[test]
    fn parse_number_rejects_non_numeric() {
        assert_eq!(parse_number(&json!(true)), None);
        assert_eq!(parse_number(&json!(null)), None);
        assert_eq!(parse_number(&json!("NaN")), None);
        assert_eq!(parse_number(&json!("inf")), None);
        assert_eq!(parse_number(&json!("-12.5")), Some(-12.5));
    }

    #[test]
    fn out_of_range_supply_uses_previous_value() {
        let config = EquipmentConfig::default();
        let previous = PreviousCycleSnapshot {
            fan_enabled: true,
            heat_enabled: false,
            cooling_stage1: false,
            cooling_stage2: false,
            supply_temp: 61.0,
            space_temp: 72.0,
        };
        let mut faults = Vec::new();

        let readings = read(
            &snapshot(json!({"AI4": 450.0, "AI2": -80.0, "OAT": -70.0})),
            Some(&previous),
            &config,
            &mut faults,
        );

        assert_eq!(readings.supply_temp, 61.0);
        assert_eq!(readings.space_temp, 72.0);
        assert_eq!(readings.outdoor_temp, -70.0);
        assert_eq!(
            faults,
            vec![
                FaultCode::InvalidSupplyTempSensor,
                FaultCode::InvalidSpaceTempSensor
            ]
        );
    }

    #[test]
    fn out_of_range_without_history_uses_default() {
        let mut faults = Vec::new();
        let readings = read(
            &snapshot(json!({"SupplyTemp": 301})),
            None,
            &EquipmentConfig::default(),
            &mut faults,
        );
        assert_eq!(readings.supply_temp, 65.0);
        assert_eq!(faults, vec![FaultCode::InvalidSupplyTempSensor]);
    }

    #[test]
    fn setpoint_priority() {
        let config = EquipmentConfig::default();
        let snap = snapshot(json!({"supplyAirSetpoint": "71", "userSetpoint": 72}));

        assert_eq!(resolve_setpoint(&SensorSnapshot::new(), None, &config), 68.0);
        assert_eq!(resolve_setpoint(&snap, None, &config), 71.0);

        let water = OverrideCommand {
            water_temperature_setpoint: Some(73.0),
            ..OverrideCommand::default()
        };
        assert_eq!(resolve_setpoint(&snap, Some(&water), &config), 73.0);

        let both = OverrideCommand {
            temperature_setpoint: Some(74.0),
            ..water
        };
        assert_eq!(resolve_setpoint(&snap, Some(&both), &config), 74.0);
    }

    #[test]
    fn merge_keeps_older_fields() {
        let mut snap = snapshot(json!({"AI4": 60.0, "OAT": 40.0}));
        let update = json!({"AI4": 62.0});
        let Value::Object(update) = update else {
            unreachable!()
        };
        snap.merge(update);

        assert_eq!(snap.number("AI4"), Some(62.0));
        assert_eq!(snap.number("OAT"), Some(40.0));
    }
}
