use serde::{Deserialize, Serialize};

use crate::{error::ControlFault, schedule::OccupancySchedule};

/// Per-deployment tuning for one DOAS unit. Loaded once, never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentConfig {
    pub equipment_id: String,
    pub location_id: String,

    pub default_setpoint_f: f64,
    pub heating_setpoint_f: f64,
    pub cooling_setpoint_f: f64,

    pub high_limit_f: f64,
    pub low_limit_f: f64,
    pub heating_lockout_f: f64,
    pub cooling_lockout_f: f64,
    pub freeze_protection_f: f64,

    pub sensor_min_f: f64,
    pub sensor_max_f: f64,

    pub gas_valve_min_v: f64,
    pub gas_valve_max_v: f64,
    pub min_fire_v: f64,
    pub min_fire_hold_ms: u64,
    pub fan_full_speed_v: f64,

    pub stage1_threshold_f: f64,
    pub stage2_threshold_f: f64,

    pub dehum_outdoor_temp_f: f64,
    pub dehum_outdoor_rh_high: f64,
    pub dehum_outdoor_rh_low: f64,
    pub dehum_indoor_rh_high: f64,
    pub dehum_indoor_rh_low: f64,
    pub space_tolerance_f: f64,

    pub freeze_protection_ms: u64,
    pub fan_startup_ms: u64,
    pub stage_min_run_ms: u64,
    pub stage_min_off_ms: u64,
    /// Age after which the host treats the last sensor snapshot as stale.
    pub failover_ms: u64,

    pub occupancy: OccupancySchedule,
}

impl Default for EquipmentConfig {
    fn default() -> Self {
        Self {
            equipment_id: "doas-1".to_string(),
            location_id: "default".to_string(),
            default_setpoint_f: 68.0,
            heating_setpoint_f: 65.0,
            cooling_setpoint_f: 65.5,
            high_limit_f: 115.0,
            low_limit_f: 40.0,
            heating_lockout_f: 65.0,
            cooling_lockout_f: 50.0,
            freeze_protection_f: 40.0,
            sensor_min_f: -60.0,
            sensor_max_f: 300.0,
            gas_valve_min_v: 0.0,
            gas_valve_max_v: 5.0,
            min_fire_v: 2.28,
            min_fire_hold_ms: 180_000,
            fan_full_speed_v: 10.0,
            stage1_threshold_f: 2.0,
            stage2_threshold_f: 7.0,
            dehum_outdoor_temp_f: 55.0,
            dehum_outdoor_rh_high: 85.0,
            dehum_outdoor_rh_low: 83.0,
            dehum_indoor_rh_high: 55.0,
            dehum_indoor_rh_low: 53.0,
            space_tolerance_f: 3.0,
            freeze_protection_ms: 300_000,
            fan_startup_ms: 15_000,
            stage_min_run_ms: 420_000,
            stage_min_off_ms: 300_000,
            failover_ms: 300_000,
            occupancy: OccupancySchedule::default(),
        }
    }
}

impl EquipmentConfig {
    /// Voltage added per degree of supply error once the min-fire hold is over.
    pub fn valve_gain_v_per_f(&self) -> f64 {
        (self.gas_valve_max_v - self.gas_valve_min_v) / 10.0
    }

    pub fn validate(&self) -> Result<(), ControlFault> {
        let numbers = [
            ("default_setpoint_f", self.default_setpoint_f),
            ("heating_setpoint_f", self.heating_setpoint_f),
            ("cooling_setpoint_f", self.cooling_setpoint_f),
            ("high_limit_f", self.high_limit_f),
            ("low_limit_f", self.low_limit_f),
            ("heating_lockout_f", self.heating_lockout_f),
            ("cooling_lockout_f", self.cooling_lockout_f),
            ("freeze_protection_f", self.freeze_protection_f),
            ("sensor_min_f", self.sensor_min_f),
            ("sensor_max_f", self.sensor_max_f),
            ("gas_valve_min_v", self.gas_valve_min_v),
            ("gas_valve_max_v", self.gas_valve_max_v),
            ("min_fire_v", self.min_fire_v),
            ("fan_full_speed_v", self.fan_full_speed_v),
            ("stage1_threshold_f", self.stage1_threshold_f),
            ("stage2_threshold_f", self.stage2_threshold_f),
            ("dehum_outdoor_temp_f", self.dehum_outdoor_temp_f),
            ("dehum_outdoor_rh_high", self.dehum_outdoor_rh_high),
            ("dehum_outdoor_rh_low", self.dehum_outdoor_rh_low),
            ("dehum_indoor_rh_high", self.dehum_indoor_rh_high),
            ("dehum_indoor_rh_low", self.dehum_indoor_rh_low),
            ("space_tolerance_f", self.space_tolerance_f),
        ];
        if let Some((name, _)) = numbers.iter().find(|(_, value)| !value.is_finite()) {
            return Err(ControlFault::InvalidConfig(format!("{name} is not finite")));
        }

        if self.low_limit_f >= self.high_limit_f {
            return Err(invalid("low_limit_f must be below high_limit_f"));
        }
        if self.sensor_min_f >= self.sensor_max_f {
            return Err(invalid("sensor_min_f must be below sensor_max_f"));
        }
        if self.gas_valve_min_v >= self.gas_valve_max_v {
            return Err(invalid("gas_valve_min_v must be below gas_valve_max_v"));
        }
        if !(self.gas_valve_min_v..=self.gas_valve_max_v).contains(&self.min_fire_v) {
            return Err(invalid("min_fire_v must lie inside the gas valve range"));
        }
        if self.stage1_threshold_f > self.stage2_threshold_f {
            return Err(invalid("stage1_threshold_f must not exceed stage2_threshold_f"));
        }
        if self.dehum_outdoor_rh_low > self.dehum_outdoor_rh_high
            || self.dehum_indoor_rh_low > self.dehum_indoor_rh_high
        {
            return Err(invalid("dehumidification low thresholds must not exceed high thresholds"));
        }
        if self.space_tolerance_f < 0.0 {
            return Err(invalid("space_tolerance_f must not be negative"));
        }
        if !self.occupancy.validate() {
            return Err(invalid("occupancy window minutes must be below 1440"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ControlFault {
    ControlFault::InvalidConfig(message.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: "doas-controller".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub equipment: EquipmentConfig,
    pub timezone: String,
    pub mqtt: MqttConfig,
    pub tick_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            equipment: EquipmentConfig::default(),
            timezone: "America/Los_Angeles".to_string(),
            mqtt: MqttConfig::default(),
            tick_interval_ms: 5_000,
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.tick_interval_ms = self.tick_interval_ms.clamp(1_000, 60_000);
        if self.mqtt.client_id.is_empty() {
            self.mqtt.client_id = MqttConfig::default().client_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EquipmentConfig::default().validate().is_ok());
        assert!((EquipmentConfig::default().valve_gain_v_per_f() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rejects_min_fire_outside_valve_range() {
        let config = EquipmentConfig {
            min_fire_v: 6.0,
            ..EquipmentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ControlFault::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_non_finite_thresholds() {
        let config = EquipmentConfig {
            stage1_threshold_f: f64::NAN,
            ..EquipmentConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stage1_threshold_f"));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: EquipmentConfig =
            serde_json::from_str(r#"{"equipment_id":"doas-7","high_limit_f":120.0}"#).unwrap();
        assert_eq!(config.equipment_id, "doas-7");
        assert_eq!(config.high_limit_f, 120.0);
        assert_eq!(config.low_limit_f, 40.0);
        assert_eq!(config.occupancy, OccupancySchedule::default());
    }

    #[test]
    fn occupancy_keys_match_the_rest_of_the_file() {
        let config: EquipmentConfig = serde_json::from_str(
            r#"{"occupancy":{"start_minutes":360,"end_minutes":1200,"bypass":true}}"#,
        )
        .unwrap();
        assert_eq!(config.occupancy.start_minutes, 360);
        assert_eq!(config.occupancy.end_minutes, 1200);
        assert!(config.occupancy.bypass);

        let raw = serde_json::to_string(&config).unwrap();
        assert!(raw.contains("\"start_minutes\":360"));
    }

    #[test]
    fn sanitize_clamps_tick_interval() {
        let mut runtime = RuntimeConfig {
            tick_interval_ms: 10,
            ..RuntimeConfig::default()
        };
        runtime.mqtt.client_id.clear();
        runtime.sanitize();
        assert_eq!(runtime.tick_interval_ms, 1_000);
        assert_eq!(runtime.mqtt.client_id, "doas-controller");
    }
}
